//! cashflow deploys a project's contracts and manages Superfluid money streams.

mod cli;

use std::process::ExitCode;

use anyhow::{Context, Result};
use cashflow_deploy::{
    ArtifactRegistry, CashflowConfig, Credential, DeploymentExecutor, DeploymentLedger,
    EnvCredential, EthRpc, FlowKind, FlowOperationBuilder, FlowOperationSpec, HttpRpc, NetworkConfig,
    TransactionSubmitter, resolve,
};
use clap::Parser;
use comfy_table::{Table, presets::UTF8_FULL};

use cli::{Cli, Command};

#[tokio::main]
async fn main() -> ExitCode {
    // Environment variables from .env must be visible to clap's env fallbacks.
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    // Initialize the logger.
    tracing_subscriber::fmt()
        .with_max_level(cli.verbosity)
        .with_writer(std::io::stderr)
        .init();

    let result = run(cli).await;
    if let Err(err) = &result {
        eprint!("{}", render_error(err));
    }
    exit_code(&result)
}

fn exit_code(result: &Result<()>) -> ExitCode {
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(_) => ExitCode::FAILURE,
    }
}

/// Format a failure for stderr: `error[Kind]: message` for core errors, followed
/// by guidance on whether running the command again is safe.
fn render_error(err: &anyhow::Error) -> String {
    let Some(core) = err.downcast_ref::<cashflow_deploy::Error>() else {
        return format!("error: {err:#}\n");
    };

    let mut out = format!("error[{}]: {err:#}\n", core.kind());
    if core.is_indeterminate() {
        out.push_str(
            "note: the transaction was broadcast and may still be included. \
             Check its hash on a block explorer before running the command again.\n",
        );
    }
    match core {
        cashflow_deploy::Error::SubmissionRejected { .. } => out.push_str(
            "note: the node refused the transaction and it was never included. \
             Fix the cause, then run the command again.\n",
        ),
        cashflow_deploy::Error::TransactionReverted { .. } => out.push_str(
            "note: the transaction was mined but reverted, and its effects were rolled back. \
             Fix the cause, then run the command again.\n",
        ),
        _ => {}
    }
    out
}

async fn run(cli: Cli) -> Result<()> {
    let config = CashflowConfig::load_from_file(&cli.config)?;
    let (network_name, network) = config.network(cli.network.as_deref())?;
    let flow_kind = cli.command.flow_kind();

    match cli.command {
        Command::Deploy { tags } => deploy(&config, network_name, network, &tags).await,
        Command::CreateFlow(args) | Command::UpdateFlow(args) => {
            let kind = flow_kind.context("flow command without a flow kind")?;
            flow(network_name, network, kind, args.receiver, &args.token, args.flow_rate).await
        }
        Command::DeleteFlow(args) => {
            flow(network_name, network, FlowKind::Delete, args.receiver, &args.token, 0).await
        }
        Command::Deployments => list_deployments(&config, network_name),
    }
}

/// Build a submitter for the network and make sure the endpoint serves the configured chain.
async fn connect(
    network_name: &str,
    network: &NetworkConfig,
) -> Result<TransactionSubmitter<HttpRpc, EnvCredential>> {
    let rpc = HttpRpc::new(network.rpc_url()?)?;

    let chain_id = rpc
        .chain_id()
        .await
        .with_context(|| format!("Failed to reach the RPC endpoint of `{network_name}`"))?;
    if chain_id != network.chain_id {
        anyhow::bail!(
            "RPC endpoint of `{network_name}` serves chain {chain_id}, expected {}",
            network.chain_id
        );
    }

    Ok(TransactionSubmitter::new(
        rpc,
        network.credential(),
        network.submitter_config(),
    ))
}

async fn deploy(
    config: &CashflowConfig,
    network_name: &str,
    network: &NetworkConfig,
    tags: &[String],
) -> Result<()> {
    let ordered = resolve(tags, &config.deployments)?;
    if ordered.is_empty() {
        tracing::warn!(tags = ?tags, "No deployment matches the selected tags");
        return Ok(());
    }

    let registry = ArtifactRegistry::load_dir(&config.artifacts)?;
    let ledger = DeploymentLedger::open(&config.deployments_dir);
    let _lock = ledger.lock(network_name)?;

    let submitter = connect(network_name, network).await?;

    tracing::info!(
        network = network_name,
        tags = ?tags,
        deployments = ?ordered.iter().map(|r| r.name.as_str()).collect::<Vec<_>>(),
        "Applying deployments"
    );

    let records = DeploymentExecutor::new(&registry, &ledger, &submitter, network_name, network)
        .apply(&ordered)
        .await?;

    for record in &records {
        println!("{}: {}", record.name, record.address);
    }

    Ok(())
}

async fn flow(
    network_name: &str,
    network: &NetworkConfig,
    kind: FlowKind,
    receiver: String,
    token: &str,
    flow_rate: i128,
) -> Result<()> {
    let superfluid = network
        .superfluid
        .as_ref()
        .with_context(|| format!("Superfluid is not configured for network `{network_name}`"))?;
    let builder = FlowOperationBuilder::new(network_name, superfluid);

    // Input checks that need no key run first, so a bad rate is reported as such.
    let token = builder.resolve_token(token)?;
    builder.check_token_and_rate(kind, token, None, flow_rate)?;
    builder.parse_receiver(&receiver)?;

    let sender = network.credential().load()?.address();
    let intent = builder.build(&FlowOperationSpec {
        kind,
        sender,
        receiver,
        token,
        flow_rate,
        expected_super_token: None,
    })?;

    let submitter = connect(network_name, network).await?;
    let receipt = submitter.submit(&intent).await?.ensure_success()?;

    tracing::info!(
        %kind,
        %sender,
        network = network_name,
        transaction_hash = %receipt.transaction_hash,
        block_number = receipt.block_number,
        "Flow operation confirmed"
    );
    println!("{}", receipt.transaction_hash);

    Ok(())
}

fn list_deployments(config: &CashflowConfig, network_name: &str) -> Result<()> {
    let ledger = DeploymentLedger::open(&config.deployments_dir);
    let records = ledger.records(network_name)?;

    let mut table = Table::new();
    table.load_preset(UTF8_FULL).set_header(vec![
        "Name",
        "Address",
        "Block",
        "Transaction",
        "Deployed at",
    ]);

    for record in &records {
        let deployed_at = chrono::DateTime::from_timestamp(record.timestamp, 0)
            .map(|t| t.to_rfc3339())
            .unwrap_or_else(|| record.timestamp.to_string());
        table.add_row(vec![
            record.name.clone(),
            record.address.to_string(),
            record.block_number.to_string(),
            record.transaction_hash.to_string(),
            deployed_at,
        ]);
    }

    println!("{table}");
    tracing::debug!(network = network_name, count = records.len(), "Listed deployments");

    Ok(())
}
