//! Applying ordered deployment requests to a network.

use std::collections::BTreeMap;

use alloy_core::{
    dyn_abi::{DynSolType, DynSolValue},
    primitives::Address,
};

use crate::{
    Error, Result,
    artifacts::{Artifact, ArtifactRegistry},
    config::{DEPLOYER_ADDRESS_KEY, NetworkConfig},
    deployment::{ConstructorArg, DeploymentRequest, ResolvedArg},
    ledger::{DeploymentLedger, DeploymentRecord},
    rpc::EthRpc,
    signing::Credential,
    submitter::{ReceiptStatus, TransactionIntent, TransactionSubmitter},
};

/// Deploys requests in order, skipping those the ledger already holds.
///
/// The executor is the only writer of the ledger. A request is deployed again
/// when its resolved constructor arguments or its artifact's bytecode differ from
/// the recorded deployment.
pub struct DeploymentExecutor<'a, R, C> {
    registry: &'a ArtifactRegistry,
    ledger: &'a DeploymentLedger,
    submitter: &'a TransactionSubmitter<R, C>,
    network_name: &'a str,
    network: &'a NetworkConfig,
}

impl<'a, R: EthRpc, C: Credential> DeploymentExecutor<'a, R, C> {
    pub fn new(
        registry: &'a ArtifactRegistry,
        ledger: &'a DeploymentLedger,
        submitter: &'a TransactionSubmitter<R, C>,
        network_name: &'a str,
        network: &'a NetworkConfig,
    ) -> Self {
        Self {
            registry,
            ledger,
            submitter,
            network_name,
            network,
        }
    }

    /// Apply `requests` in order and return one record per request.
    ///
    /// `ref` arguments resolve against addresses produced earlier in this call,
    /// so `requests` must be dependency-ordered (see [`crate::resolve`]). The first
    /// failure aborts the remaining requests; records committed before it stay.
    pub async fn apply(&self, requests: &[DeploymentRequest]) -> Result<Vec<DeploymentRecord>> {
        let mut resolved: BTreeMap<String, Address> = BTreeMap::new();
        let mut deployer: Option<Address> = None;
        let mut records = Vec::with_capacity(requests.len());

        for request in requests {
            let record = self.apply_one(request, &resolved, &mut deployer).await?;
            resolved.insert(record.name.clone(), record.address);
            records.push(record);
        }

        Ok(records)
    }

    async fn apply_one(
        &self,
        request: &DeploymentRequest,
        resolved: &BTreeMap<String, Address>,
        deployer: &mut Option<Address>,
    ) -> Result<DeploymentRecord> {
        let name = request.name.as_str();
        let network = self.network_name;
        let artifact = self.registry.get(request.artifact_name())?;

        let values = self.resolve_args(request, artifact, resolved, deployer)?;
        let args: Vec<ResolvedArg> = artifact
            .constructor_params
            .iter()
            .zip(&values)
            .map(|(param, value)| ResolvedArg::new(&param.ty, value))
            .collect();
        let fingerprint = DeploymentLedger::fingerprint(&args)?;
        let bytecode_hash = artifact.bytecode_hash();

        if let Some(existing) = self.ledger.lookup(name, network)? {
            if existing.constructor_args_fingerprint == fingerprint
                && existing.bytecode_hash == bytecode_hash
            {
                tracing::info!(
                    name,
                    address = %existing.address,
                    network,
                    "Reusing existing deployment"
                );
                return Ok(existing);
            }

            tracing::info!(
                name,
                address = %existing.address,
                network,
                "Deployment inputs changed, redeploying"
            );
        }

        let from = self.deployer_address(deployer)?;
        let mut data = artifact.bytecode.to_vec();
        data.extend(DynSolValue::Tuple(values).abi_encode_params());
        let intent = TransactionIntent::create(from, data)
            .with_gas_limit(request.gas_limit.or(self.network.gas_limit));

        tracing::info!(
            name,
            contract = %artifact.name,
            network,
            args = args.len(),
            "Deploying contract"
        );

        let receipt = self.submitter.submit(&intent).await?;

        if receipt.status == ReceiptStatus::Reverted {
            return Err(Error::deployment_failed(
                name,
                format!(
                    "creation transaction {} reverted in block {}",
                    receipt.transaction_hash, receipt.block_number
                ),
            ));
        }

        let Some(address) = receipt.contract_address else {
            return Err(Error::deployment_failed(
                name,
                format!(
                    "receipt of {} carries no contract address",
                    receipt.transaction_hash
                ),
            ));
        };

        let record = DeploymentRecord {
            name: name.to_string(),
            network: network.to_string(),
            address,
            constructor_args_fingerprint: fingerprint,
            bytecode_hash,
            transaction_hash: receipt.transaction_hash,
            block_number: receipt.block_number,
            timestamp: chrono::Utc::now().timestamp(),
            args,
        };
        self.ledger.commit(&record)?;

        tracing::info!(
            name,
            %address,
            network,
            transaction_hash = %record.transaction_hash,
            block_number = record.block_number,
            "Contract deployed"
        );

        Ok(record)
    }

    fn deployer_address(&self, cached: &mut Option<Address>) -> Result<Address> {
        if let Some(address) = cached {
            return Ok(*address);
        }
        let address = self.submitter.sender()?;
        *cached = Some(address);
        Ok(address)
    }

    /// Resolve and type every constructor argument of `request`.
    fn resolve_args(
        &self,
        request: &DeploymentRequest,
        artifact: &Artifact,
        resolved: &BTreeMap<String, Address>,
        deployer: &mut Option<Address>,
    ) -> Result<Vec<DynSolValue>> {
        let name = request.name.as_str();
        let params = &artifact.constructor_params;

        if request.args.len() != params.len() {
            return Err(Error::deployment_failed(
                name,
                format!(
                    "`{}` expects {} constructor arguments, {} given",
                    artifact.name,
                    params.len(),
                    request.args.len()
                ),
            ));
        }

        let mut values = Vec::with_capacity(params.len());
        for (arg, param) in request.args.iter().zip(params) {
            let value = match arg {
                ConstructorArg::Ref { target } => {
                    let address = resolved.get(target).copied().ok_or_else(|| {
                        Error::deployment_failed(
                            name,
                            format!("`{target}` has not been deployed in this run"),
                        )
                    })?;
                    expect_address(name, &param.name, &param.ty, address)?
                }
                ConstructorArg::Named { named } => {
                    let address = if named == DEPLOYER_ADDRESS_KEY {
                        self.deployer_address(deployer)?
                    } else {
                        self.network.named_address(named).ok_or_else(|| {
                            Error::deployment_failed(
                                name,
                                format!(
                                    "no address named `{named}` on network `{}`",
                                    self.network_name
                                ),
                            )
                        })?
                    };
                    expect_address(name, &param.name, &param.ty, address)?
                }
                ConstructorArg::Literal(literal) => literal.coerce(&param.ty).map_err(|reason| {
                    Error::deployment_failed(name, format!("argument `{}`: {reason}", param.name))
                })?,
            };
            values.push(value);
        }

        Ok(values)
    }
}

fn expect_address(
    name: &str,
    param: &str,
    ty: &DynSolType,
    address: Address,
) -> Result<DynSolValue> {
    if *ty != DynSolType::Address {
        return Err(Error::deployment_failed(
            name,
            format!("argument `{param}` is {}, an address was given", ty.sol_type_name()),
        ));
    }
    Ok(DynSolValue::Address(address))
}
