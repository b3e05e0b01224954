//! cashflow-deploy - Contract deployment and money-streaming library.
//!
//! This crate deploys a project's contracts to an EVM network in dependency
//! order, remembers what it deployed so re-runs are idempotent, and opens,
//! updates and closes Superfluid money streams.

mod artifacts;
pub use artifacts::{Artifact, ArtifactRegistry, ConstructorParam};

mod config;
pub use config::{
    CONFIG_FILENAME, CashflowConfig, DEPLOYER_ADDRESS_KEY, ENV_PREFIX, NetworkConfig,
    SuperfluidConfig,
};

mod deployment;
pub use deployment::{ALL_TAG, ConstructorArg, DeploymentRequest, Literal, ResolvedArg};

mod error;
pub use error::{Error, Result};

mod executor;
pub use executor::DeploymentExecutor;

mod flow;
pub use flow::{FlowKind, FlowOperationBuilder, FlowOperationSpec, MAX_FLOW_RATE};

mod ledger;
pub use ledger::{DeploymentLedger, DeploymentRecord, Fingerprint, LedgerLock};

mod resolver;
pub use resolver::resolve;

pub mod rpc;
pub use rpc::{EthRpc, HttpRpc, RpcError};

mod signing;
pub use signing::{Credential, EnvCredential, SignedTransaction, StaticCredential, sign_legacy};

mod submitter;
pub use submitter::{
    DEFAULT_CONFIRMATION_TIMEOUT, DEFAULT_CONFIRMATIONS, DEFAULT_POLL_INTERVAL, ReceiptStatus,
    SubmitterConfig, TransactionIntent, TransactionReceipt, TransactionSubmitter,
};
