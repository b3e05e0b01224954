//! End-to-end tests of the deployment and flow pipelines.
//!
//! The node is simulated in memory: it accepts raw transactions, mines them
//! immediately (unless told otherwise) and assigns each contract creation a
//! predictable address. The ledger lives in a temporary directory.

use std::{collections::BTreeMap, sync::Mutex, time::Duration};

use alloy_core::{
    json_abi::JsonAbi,
    primitives::{Address, B256, Bytes, U64, keccak256},
};
use cashflow_deploy::{
    Artifact, ArtifactRegistry, CashflowConfig, ConstructorArg, DeploymentExecutor,
    DeploymentLedger, DeploymentRequest, Error, EthRpc, FlowKind, FlowOperationBuilder,
    FlowOperationSpec, NetworkConfig, RpcError, StaticCredential, TransactionSubmitter, resolve,
    rpc::{CallRequest, RpcReceipt},
};
use serde_json::json;
use tempdir::TempDir;

const NETWORK: &str = "mumbai";
const PRIVATE_KEY: &str = "0x0101010101010101010101010101010101010101010101010101010101010101";

const CONFIG: &str = r#"
    default_network = "mumbai"

    [networks.mumbai]
    chain_id = 80001
    gas_limit = 8000000
    confirmation_timeout_secs = 1
    poll_interval_ms = 10

    [networks.mumbai.addresses]
    owner = "0x86ca23Ac60499b4E8069c439aC6FDFd897362834"

    [networks.mumbai.superfluid]
    host = "0xEB796bdb90fFA0f28255275e16936D25d3418603"
    cfa = "0x49e565Ed1bdc17F3d220f72DF0857C26FA83F873"

    [networks.mumbai.superfluid.super_tokens]
    fDAIx = "0x5d8b4c2554aeb7e86f387b4d6c00ac33499ed01f"
"#;

/// In-memory node.
#[derive(Default)]
struct MockNode {
    /// Leave broadcast transactions pending forever.
    never_mine: bool,
    /// Zero-based index of the broadcast whose receipt reports a revert.
    revert_at: Option<usize>,
    /// Fail every receipt lookup with a transport error.
    receipt_outage: bool,
    sent: Mutex<Vec<Bytes>>,
    receipts: Mutex<BTreeMap<B256, RpcReceipt>>,
}

impl MockNode {
    fn sent(&self) -> Vec<Bytes> {
        self.sent.lock().unwrap().clone()
    }

    fn contract_address(index: usize) -> Address {
        Address::with_last_byte(0x10 + index as u8)
    }
}

impl EthRpc for MockNode {
    async fn chain_id(&self) -> Result<u64, RpcError> {
        Ok(80001)
    }

    async fn transaction_count(&self, _address: Address) -> Result<u64, RpcError> {
        Ok(self.sent.lock().unwrap().len() as u64)
    }

    async fn estimate_gas(&self, _request: &CallRequest) -> Result<u64, RpcError> {
        Ok(1_000_000)
    }

    async fn gas_price(&self) -> Result<u128, RpcError> {
        Ok(30_000_000_000)
    }

    async fn send_raw_transaction(&self, raw: &Bytes) -> Result<B256, RpcError> {
        let hash = keccak256(raw);
        let mut sent = self.sent.lock().unwrap();
        let index = sent.len();
        sent.push(raw.clone());

        if !self.never_mine {
            let reverted = self.revert_at == Some(index);
            self.receipts.lock().unwrap().insert(
                hash,
                RpcReceipt {
                    transaction_hash: hash,
                    status: Some(U64::from(if reverted { 0 } else { 1 })),
                    block_number: U64::from(1_000 + index),
                    gas_used: U64::from(500_000),
                    contract_address: (!reverted).then(|| Self::contract_address(index)),
                    logs: Vec::new(),
                },
            );
        }

        Ok(hash)
    }

    async fn transaction_receipt(&self, hash: B256) -> Result<Option<RpcReceipt>, RpcError> {
        if self.receipt_outage {
            return Err(RpcError::Transport {
                method: "eth_getTransactionReceipt".to_string(),
                reason: "connection reset by peer".to_string(),
            });
        }
        Ok(self.receipts.lock().unwrap().get(&hash).cloned())
    }

    async fn block_number(&self) -> Result<u64, RpcError> {
        Ok(2_000)
    }
}

/// Test setup context containing common test infrastructure.
struct TestContext {
    _ledger_dir: TempDir,
    config: CashflowConfig,
    registry: ArtifactRegistry,
    ledger: DeploymentLedger,
}

impl TestContext {
    fn new() -> Self {
        let ledger_dir = TempDir::new("cashflow-pipeline").expect("Failed to create temp dir");
        let config = CashflowConfig::from_toml_str(CONFIG).expect("Failed to parse config");

        let mut registry = ArtifactRegistry::new();
        registry.register(artifact(
            "TokenMock",
            &[("name", "string"), ("symbol", "string")],
            &[0x60, 0x80, 0x60, 0x40, 0x52, 0x01],
        ));
        registry.register(artifact(
            "CashflowNFT",
            &[("owner", "address"), ("token", "address"), ("name", "string")],
            &[0x60, 0x80, 0x60, 0x40, 0x52, 0x02],
        ));

        Self {
            ledger: DeploymentLedger::open(ledger_dir.path()),
            _ledger_dir: ledger_dir,
            config,
            registry,
        }
    }

    fn network(&self) -> &NetworkConfig {
        &self.config.networks[NETWORK]
    }

    fn submitter(&self, node: MockNode) -> TransactionSubmitter<MockNode, StaticCredential> {
        TransactionSubmitter::new(
            node,
            StaticCredential::new(PRIVATE_KEY),
            self.network().submitter_config(),
        )
    }

    fn executor<'a>(
        &'a self,
        submitter: &'a TransactionSubmitter<MockNode, StaticCredential>,
    ) -> DeploymentExecutor<'a, MockNode, StaticCredential> {
        DeploymentExecutor::new(&self.registry, &self.ledger, submitter, NETWORK, self.network())
    }
}

fn artifact(name: &str, inputs: &[(&str, &str)], bytecode: &[u8]) -> Artifact {
    let inputs: Vec<_> = inputs
        .iter()
        .map(|(name, ty)| json!({ "name": name, "type": ty, "internalType": ty }))
        .collect();
    let abi: JsonAbi = serde_json::from_value(json!([
        { "type": "constructor", "stateMutability": "nonpayable", "inputs": inputs }
    ]))
    .expect("constructor ABI should parse");
    Artifact::new(name, abi, Bytes::copy_from_slice(bytecode))
        .expect("constructor parameter types should resolve")
}

fn declarations(token_name: &str) -> Vec<DeploymentRequest> {
    vec![
        DeploymentRequest::new("CashflowNFT")
            .tags(["all", "nft"])
            .args([
                ConstructorArg::named("owner"),
                ConstructorArg::reference("TokenMock"),
                ConstructorArg::literal("Cashflow NFT"),
            ]),
        DeploymentRequest::new("TokenMock")
            .tags(["all", "mocks"])
            .args([
                ConstructorArg::literal(token_name),
                ConstructorArg::literal("MER"),
            ]),
    ]
}

#[tokio::test]
async fn test_dependency_is_deployed_first_and_substituted() {
    let ctx = TestContext::new();
    let submitter = ctx.submitter(MockNode::default());

    let ordered = resolve(["nft"], &declarations("Mock ERC20")).unwrap();
    let records = ctx.executor(&submitter).apply(&ordered).await.unwrap();

    let names: Vec<_> = records.iter().map(|r| r.name.as_str()).collect();
    assert_eq!(names, vec!["TokenMock", "CashflowNFT"]);

    let token_address = MockNode::contract_address(0);
    assert_eq!(records[0].address, token_address);
    assert_eq!(records[1].address, MockNode::contract_address(1));

    let sent = submitter.rpc().sent();
    assert_eq!(sent.len(), 2);
    assert!(
        sent[1].windows(20).any(|w| w == token_address.as_slice()),
        "CashflowNFT constructor args should embed the TokenMock address"
    );

    let committed = ctx.ledger.records(NETWORK).unwrap();
    assert_eq!(committed.len(), 2, "both deployments should be committed");
    assert_eq!(
        ctx.ledger.lookup("CashflowNFT", NETWORK).unwrap().unwrap().address,
        MockNode::contract_address(1)
    );
}

#[tokio::test]
async fn test_second_apply_is_idempotent() {
    let ctx = TestContext::new();
    let ordered = resolve(["all"], &declarations("Mock ERC20")).unwrap();

    let first_submitter = ctx.submitter(MockNode::default());
    let first = ctx.executor(&first_submitter).apply(&ordered).await.unwrap();

    let second_submitter = ctx.submitter(MockNode::default());
    let second = ctx.executor(&second_submitter).apply(&ordered).await.unwrap();

    assert!(
        second_submitter.rpc().sent().is_empty(),
        "nothing should be submitted on a re-run"
    );
    let first_addresses: Vec<_> = first.iter().map(|r| r.address).collect();
    let second_addresses: Vec<_> = second.iter().map(|r| r.address).collect();
    assert_eq!(first_addresses, second_addresses);
}

#[tokio::test]
async fn test_changed_argument_forces_redeploy() {
    let ctx = TestContext::new();

    let first_submitter = ctx.submitter(MockNode::default());
    let ordered = resolve(["all"], &declarations("Mock ERC20")).unwrap();
    ctx.executor(&first_submitter).apply(&ordered).await.unwrap();
    let before = ctx.ledger.lookup("TokenMock", NETWORK).unwrap().unwrap();

    // The node hands out addresses by broadcast index, so start the second one later.
    let second_submitter = ctx.submitter(MockNode {
        sent: Mutex::new(vec![Bytes::new(); 5]),
        ..Default::default()
    });
    let ordered = resolve(["all"], &declarations("Renamed ERC20")).unwrap();
    let records = ctx.executor(&second_submitter).apply(&ordered).await.unwrap();

    let after = ctx.ledger.lookup("TokenMock", NETWORK).unwrap().unwrap();
    assert_ne!(
        before.constructor_args_fingerprint, after.constructor_args_fingerprint,
        "fingerprint should follow the arguments"
    );
    assert_eq!(after.address, MockNode::contract_address(5));

    // CashflowNFT depends on the new TokenMock address, so it is redeployed too.
    assert_eq!(second_submitter.rpc().sent().len(), 5 + 2);
    assert_eq!(records[1].address, MockNode::contract_address(6));
}

#[tokio::test]
async fn test_reverted_creation_fails_without_record() {
    let ctx = TestContext::new();
    let submitter = ctx.submitter(MockNode {
        revert_at: Some(1),
        ..Default::default()
    });

    let ordered = resolve(["all"], &declarations("Mock ERC20")).unwrap();
    let err = ctx.executor(&submitter).apply(&ordered).await.unwrap_err();

    match &err {
        Error::DeploymentFailed { name, reason } => {
            assert_eq!(name, "CashflowNFT");
            assert!(reason.contains("reverted"), "reason: {reason}");
        }
        other => panic!("expected DeploymentFailed, got {other:?}"),
    }

    assert!(ctx.ledger.lookup("CashflowNFT", NETWORK).unwrap().is_none());
    assert!(
        ctx.ledger.lookup("TokenMock", NETWORK).unwrap().is_some(),
        "records committed before the failure are preserved"
    );
}

#[tokio::test]
async fn test_argument_mismatch_fails_before_submission() {
    let ctx = TestContext::new();
    let submitter = ctx.submitter(MockNode::default());

    let requests = vec![
        DeploymentRequest::new("TokenMock").args([ConstructorArg::literal("only one")]),
    ];
    let err = ctx.executor(&submitter).apply(&requests).await.unwrap_err();
    assert!(matches!(&err, Error::DeploymentFailed { name, .. } if name == "TokenMock"));

    let requests = vec![
        DeploymentRequest::new("Wrapped")
            .contract("CashflowNFT")
            .args([
                ConstructorArg::named("nobody"),
                ConstructorArg::named("deployer"),
                ConstructorArg::literal("Cashflow NFT"),
            ]),
    ];
    let err = ctx.executor(&submitter).apply(&requests).await.unwrap_err();
    assert!(
        matches!(&err, Error::DeploymentFailed { reason, .. } if reason.contains("nobody")),
        "got {err:?}"
    );

    assert!(submitter.rpc().sent().is_empty(), "no transaction should be sent");
}

#[tokio::test]
async fn test_receipt_outage_after_broadcast_is_indeterminate() {
    let ctx = TestContext::new();
    let mut submitter_config = ctx.network().submitter_config();
    submitter_config.confirmation_timeout = Duration::from_millis(200);
    let submitter = TransactionSubmitter::new(
        MockNode {
            receipt_outage: true,
            ..Default::default()
        },
        StaticCredential::new(PRIVATE_KEY),
        submitter_config,
    );

    let ordered = resolve(["mocks"], &declarations("Mock ERC20")).unwrap();
    let err = ctx.executor(&submitter).apply(&ordered).await.unwrap_err();

    let sent = submitter.rpc().sent();
    assert_eq!(sent.len(), 1, "the creation must not be resubmitted");
    assert!(err.is_indeterminate(), "got {err:?}");
    match err {
        Error::ConfirmationTimeout { transaction_hash } => {
            assert_eq!(transaction_hash, keccak256(&sent[0]));
        }
        other => panic!("expected ConfirmationTimeout, got {other:?}"),
    }
    assert!(
        ctx.ledger.lookup("TokenMock", NETWORK).unwrap().is_none(),
        "unconfirmed deployments are never recorded"
    );
}

#[tokio::test]
async fn test_unsafe_deployment_name_fails_before_submission() {
    let ctx = TestContext::new();
    let submitter = ctx.submitter(MockNode::default());

    let requests = vec![
        DeploymentRequest::new("../TokenMock")
            .contract("TokenMock")
            .args([ConstructorArg::literal("Mock ERC20"), ConstructorArg::literal("MER")]),
    ];
    let err = ctx.executor(&submitter).apply(&requests).await.unwrap_err();

    assert_eq!(err.kind(), "Ledger", "got {err:?}");
    assert!(submitter.rpc().sent().is_empty(), "no transaction should be sent");
}

#[tokio::test]
async fn test_unknown_artifact() {
    let ctx = TestContext::new();
    let submitter = ctx.submitter(MockNode::default());

    let requests = vec![DeploymentRequest::new("LendiesCore")];
    let err = ctx.executor(&submitter).apply(&requests).await.unwrap_err();
    assert!(matches!(err, Error::UnknownArtifact(name) if name == "LendiesCore"));
}

#[tokio::test]
async fn test_unconfirmed_flow_times_out_with_hash() {
    let ctx = TestContext::new();
    let mut submitter_config = ctx.network().submitter_config();
    submitter_config.confirmation_timeout = Duration::from_millis(200);
    let submitter = TransactionSubmitter::new(
        MockNode {
            never_mine: true,
            ..Default::default()
        },
        StaticCredential::new(PRIVATE_KEY),
        submitter_config,
    );

    let superfluid = ctx.network().superfluid.as_ref().unwrap();
    let builder = FlowOperationBuilder::new(NETWORK, superfluid);
    let intent = builder
        .build(&FlowOperationSpec {
            kind: FlowKind::Create,
            sender: submitter.sender().unwrap(),
            receiver: "0x70997970C51812dc3A010C7d01b50e0d17dc79C8".to_string(),
            token: builder.resolve_token("fDAIx").unwrap(),
            flow_rate: 1_000_000_000,
            expected_super_token: None,
        })
        .unwrap();

    let err = submitter.submit(&intent).await.unwrap_err();
    let sent = submitter.rpc().sent();
    assert_eq!(sent.len(), 1);
    match err {
        Error::ConfirmationTimeout { transaction_hash } => {
            assert_eq!(transaction_hash, keccak256(&sent[0]));
        }
        other => panic!("expected ConfirmationTimeout, got {other:?}"),
    }
}

#[tokio::test]
async fn test_reverted_flow_is_a_typed_failure() {
    let ctx = TestContext::new();
    let submitter = ctx.submitter(MockNode {
        revert_at: Some(0),
        ..Default::default()
    });

    let superfluid = ctx.network().superfluid.as_ref().unwrap();
    let builder = FlowOperationBuilder::new(NETWORK, superfluid);
    let intent = builder
        .build(&FlowOperationSpec {
            kind: FlowKind::Delete,
            sender: submitter.sender().unwrap(),
            receiver: "0x70997970C51812dc3A010C7d01b50e0d17dc79C8".to_string(),
            token: builder.resolve_token("fDAIx").unwrap(),
            flow_rate: 0,
            expected_super_token: None,
        })
        .unwrap();

    let err = submitter
        .submit(&intent)
        .await
        .unwrap()
        .ensure_success()
        .unwrap_err();

    assert_eq!(err.kind(), "TransactionReverted");
    assert!(!err.is_indeterminate());
    assert!(
        matches!(err, Error::TransactionReverted { block_number: 1_000, .. }),
        "got {err:?}"
    );
}
