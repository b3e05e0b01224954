//! Error taxonomy for the deployment and flow pipelines.

use alloy_core::primitives::B256;

/// Result alias used by every core operation.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Failure kinds surfaced by the core.
///
/// None of these are retried inside the library. Each one carries enough context
/// (contract name, address or transaction hash) to diagnose the failure without
/// re-running the command. The variant name doubles as the machine-readable
/// error kind, see [`Error::kind`].
#[derive(Debug, thiserror::Error, strum::IntoStaticStr)]
pub enum Error {
    /// No artifact (or deployment declaration) is registered under this name.
    #[error("unknown artifact `{0}`")]
    UnknownArtifact(String),

    /// Constructor-argument references form a cycle.
    #[error("cyclic dependency between deployments: {}", .0.join(" -> "))]
    CyclicDependency(Vec<String>),

    /// Two deployment declarations share a name.
    #[error("deployment `{0}` is declared more than once")]
    DuplicateDeployment(String),

    /// A contract could not be deployed with the declared inputs.
    #[error("deployment of `{name}` failed: {reason}")]
    DeploymentFailed { name: String, reason: String },

    /// The token is not a super-token wrapper known for the network.
    #[error("`{token}` is not a known super token on network `{network}`")]
    UnknownSuperToken { token: String, network: String },

    /// The flow rate is negative or does not fit the protocol's int96 encoding.
    #[error("invalid flow rate {rate}: must be between 0 and 2^95 - 1 wei per second")]
    InvalidFlowRate { rate: i128 },

    /// The receiver is malformed, the zero address, or the sender itself.
    #[error("invalid receiver `{receiver}`: {reason}")]
    InvalidReceiver { receiver: String, reason: String },

    /// The transaction was broadcast but not seen in a block before the deadline.
    ///
    /// This is indeterminate: the transaction may still be included later.
    #[error("transaction {transaction_hash} was not confirmed before the timeout")]
    ConfirmationTimeout { transaction_hash: B256 },

    /// The transaction was mined but execution reverted.
    #[error("transaction {transaction_hash} reverted in block {block_number}")]
    TransactionReverted {
        transaction_hash: B256,
        block_number: u64,
    },

    /// The node definitively refused the transaction; it was never included.
    #[error("transaction rejected: {reason}")]
    SubmissionRejected { reason: String },

    /// Transport or decoding failure while talking to the node.
    #[error("rpc error: {0}")]
    Rpc(#[from] crate::rpc::RpcError),

    /// The deployment ledger could not be read or written.
    #[error("ledger error: {0}")]
    Ledger(String),

    /// An artifact file exists but could not be read or parsed.
    #[error("artifact error: {0}")]
    Artifact(String),

    /// The signing credential is missing or malformed.
    #[error("signer error: {0}")]
    Signer(String),
}

impl Error {
    /// The error kind, i.e. the variant name (`"DeploymentFailed"`, ...).
    pub fn kind(&self) -> &'static str {
        self.into()
    }

    /// Whether the outcome of the operation is unknown rather than failed.
    ///
    /// Only a confirmation timeout is indeterminate: the transaction was accepted
    /// by the node and may still land, so it must not be blindly resubmitted.
    pub fn is_indeterminate(&self) -> bool {
        matches!(self, Self::ConfirmationTimeout { .. })
    }

    pub(crate) fn ledger(context: impl std::fmt::Display, err: impl std::fmt::Display) -> Self {
        Self::Ledger(format!("{context}: {err}"))
    }

    pub(crate) fn deployment_failed(name: &str, reason: impl Into<String>) -> Self {
        Self::DeploymentFailed {
            name: name.to_string(),
            reason: reason.into(),
        }
    }
}
