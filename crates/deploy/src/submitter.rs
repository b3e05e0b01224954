//! Signing, broadcasting and confirming transactions.

use std::{future::Future, time::Duration};

use alloy_consensus::TxLegacy;
use alloy_core::primitives::{Address, B256, Bytes, TxKind, U256};
use backon::{ExponentialBuilder, Retryable};

use crate::{
    Error, Result,
    rpc::{CallRequest, EthRpc, RpcError, RpcLog, RpcReceipt},
    signing::{Credential, sign_legacy},
};

/// Default number of confirmations to wait for.
pub const DEFAULT_CONFIRMATIONS: u64 = 1;

/// Default time to wait for a broadcast transaction to be confirmed.
pub const DEFAULT_CONFIRMATION_TIMEOUT: Duration = Duration::from_secs(300);

/// Default interval between receipt polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Default number of retries of a transient read failure.
const DEFAULT_READ_RETRIES: usize = 4;

/// A transaction to sign and send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionIntent {
    /// Recipient. `None` creates a contract from `data`.
    pub to: Option<Address>,
    pub data: Bytes,
    /// Expected signing account.
    pub from: Address,
    /// Explicit nonce. Fetched from the node when absent.
    pub nonce: Option<u64>,
    /// Explicit gas limit. Estimated by the node when absent.
    pub gas_limit: Option<u64>,
    pub value: U256,
}

impl TransactionIntent {
    /// A contract creation carrying `data` as init code.
    pub fn create(from: Address, data: impl Into<Bytes>) -> Self {
        Self {
            to: None,
            data: data.into(),
            from,
            nonce: None,
            gas_limit: None,
            value: U256::ZERO,
        }
    }

    /// A call to `to` with `data`.
    pub fn call(from: Address, to: Address, data: impl Into<Bytes>) -> Self {
        Self {
            to: Some(to),
            ..Self::create(from, data)
        }
    }

    pub fn with_nonce(mut self, nonce: u64) -> Self {
        self.nonce = Some(nonce);
        self
    }

    pub fn with_gas_limit(mut self, gas_limit: Option<u64>) -> Self {
        self.gas_limit = gas_limit;
        self
    }

    pub fn with_value(mut self, value: U256) -> Self {
        self.value = value;
        self
    }
}

/// Execution outcome of an included transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum ReceiptStatus {
    Success,
    Reverted,
}

/// Receipt of an included transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionReceipt {
    pub transaction_hash: B256,
    pub status: ReceiptStatus,
    pub block_number: u64,
    pub gas_used: u64,
    pub logs: Vec<RpcLog>,
    /// Address of the created contract, for contract creations.
    pub contract_address: Option<Address>,
}

impl From<RpcReceipt> for TransactionReceipt {
    fn from(receipt: RpcReceipt) -> Self {
        // Receipts without a status predate Byzantium and carry no revert flag.
        let status = match receipt.status {
            Some(status) if status.is_zero() => ReceiptStatus::Reverted,
            _ => ReceiptStatus::Success,
        };

        Self {
            transaction_hash: receipt.transaction_hash,
            status,
            block_number: receipt.block_number.to(),
            gas_used: receipt.gas_used.to(),
            logs: receipt.logs,
            contract_address: receipt.contract_address,
        }
    }
}

impl TransactionReceipt {
    /// Turn a reverted receipt into [`Error::TransactionReverted`].
    pub fn ensure_success(self) -> Result<Self> {
        match self.status {
            ReceiptStatus::Success => Ok(self),
            ReceiptStatus::Reverted => Err(Error::TransactionReverted {
                transaction_hash: self.transaction_hash,
                block_number: self.block_number,
            }),
        }
    }
}

/// Network parameters of a [`TransactionSubmitter`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmitterConfig {
    pub chain_id: u64,
    /// Blocks the receipt must be buried under, counting its own block.
    pub confirmations: u64,
    /// Deadline for inclusion and confirmations, measured from broadcast.
    pub confirmation_timeout: Duration,
    pub poll_interval: Duration,
    /// Retries of transient read failures. Broadcasts are never retried.
    pub read_retries: usize,
}

impl SubmitterConfig {
    pub fn new(chain_id: u64) -> Self {
        Self {
            chain_id,
            confirmations: DEFAULT_CONFIRMATIONS,
            confirmation_timeout: DEFAULT_CONFIRMATION_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
            read_retries: DEFAULT_READ_RETRIES,
        }
    }
}

/// Turns [`TransactionIntent`]s into confirmed [`TransactionReceipt`]s.
#[derive(Debug)]
pub struct TransactionSubmitter<R, C> {
    rpc: R,
    credential: C,
    config: SubmitterConfig,
}

impl<R: EthRpc, C: Credential> TransactionSubmitter<R, C> {
    pub fn new(rpc: R, credential: C, config: SubmitterConfig) -> Self {
        Self {
            rpc,
            credential,
            config,
        }
    }

    pub fn rpc(&self) -> &R {
        &self.rpc
    }

    pub fn config(&self) -> &SubmitterConfig {
        &self.config
    }

    /// Address of the signing account.
    pub fn sender(&self) -> Result<Address> {
        Ok(self.credential.load()?.address())
    }

    /// Sign, broadcast and wait for the confirmation of `intent`.
    ///
    /// # Errors
    /// - [`Error::SubmissionRejected`] if gas estimation fails or the node refuses
    ///   the transaction. Nothing was broadcast and nothing is retried.
    /// - [`Error::ConfirmationTimeout`] if the transaction is not confirmed within
    ///   the configured timeout. The outcome is unknown.
    /// - [`Error::Signer`] if the credential cannot be loaded or does not match
    ///   `intent.from`.
    pub async fn submit(&self, intent: &TransactionIntent) -> Result<TransactionReceipt> {
        let nonce = match intent.nonce {
            Some(nonce) => nonce,
            None => self.read(|| self.rpc.transaction_count(intent.from)).await?,
        };

        let gas_limit = match intent.gas_limit {
            Some(gas_limit) => gas_limit,
            None => self.estimate_gas(intent).await?,
        };

        let gas_price = self.read(|| self.rpc.gas_price()).await?;

        let transaction = TxLegacy {
            chain_id: Some(self.config.chain_id),
            nonce,
            gas_price,
            gas_limit,
            to: intent.to.map_or(TxKind::Create, TxKind::Call),
            value: intent.value,
            input: intent.data.clone(),
        };

        let signed = {
            let signer = self.credential.load()?;
            if signer.address() != intent.from {
                return Err(Error::Signer(format!(
                    "credential signs for {} but the transaction is from {}",
                    signer.address(),
                    intent.from
                )));
            }
            sign_legacy(transaction, &signer)?
        };

        let transaction_hash = match self.rpc.send_raw_transaction(&signed.raw).await {
            Ok(hash) => hash,
            Err(RpcError::Response { message, .. }) => {
                return Err(Error::SubmissionRejected { reason: message });
            }
            Err(err) => return Err(err.into()),
        };

        if transaction_hash != signed.hash {
            tracing::warn!(
                returned = %transaction_hash,
                computed = %signed.hash,
                "Node returned an unexpected transaction hash"
            );
        }

        tracing::info!(
            transaction_hash = %signed.hash,
            nonce,
            gas_limit,
            gas_price,
            "Transaction broadcast"
        );

        let receipt = tokio::time::timeout(
            self.config.confirmation_timeout,
            self.wait_for_confirmation(signed.hash),
        )
        .await
        .map_err(|_| Error::ConfirmationTimeout {
            transaction_hash: signed.hash,
        })?;

        tracing::info!(
            transaction_hash = %receipt.transaction_hash,
            block_number = receipt.block_number,
            gas_used = receipt.gas_used,
            status = %receipt.status,
            "Transaction confirmed"
        );

        Ok(receipt)
    }

    async fn estimate_gas(&self, intent: &TransactionIntent) -> Result<u64> {
        let request = CallRequest {
            from: intent.from,
            to: intent.to,
            data: intent.data.clone(),
            value: (!intent.value.is_zero()).then_some(intent.value),
        };

        match self.read(|| self.rpc.estimate_gas(&request)).await {
            Ok(gas) => Ok(gas),
            Err(RpcError::Response { message, .. }) => Err(Error::SubmissionRejected {
                reason: format!("gas estimation failed: {message}"),
            }),
            Err(err) => Err(err.into()),
        }
    }

    /// Poll until `hash` is included and buried under the configured number of
    /// blocks.
    ///
    /// Read failures are logged and polling goes on. The caller bounds the wait
    /// with the confirmation timeout.
    async fn wait_for_confirmation(&self, hash: B256) -> TransactionReceipt {
        let receipt = loop {
            match self.read(|| self.rpc.transaction_receipt(hash)).await {
                Ok(Some(receipt)) => break TransactionReceipt::from(receipt),
                Ok(None) => {
                    tracing::trace!(transaction_hash = %hash, "Transaction not yet included");
                }
                Err(err) => {
                    tracing::warn!(
                        transaction_hash = %hash,
                        error = %err,
                        "Failed to poll transaction receipt"
                    );
                }
            }
            tokio::time::sleep(self.config.poll_interval).await;
        };

        if self.config.confirmations > 1 {
            let target = receipt.block_number + self.config.confirmations - 1;
            loop {
                match self.read(|| self.rpc.block_number()).await {
                    Ok(head) if head >= target => break,
                    Ok(head) => {
                        tracing::debug!(
                            transaction_hash = %hash,
                            head,
                            target,
                            "Waiting for confirmations"
                        );
                    }
                    Err(err) => {
                        tracing::warn!(
                            transaction_hash = %hash,
                            error = %err,
                            "Failed to poll chain head"
                        );
                    }
                }
                tokio::time::sleep(self.config.poll_interval).await;
            }
        }

        receipt
    }

    /// Run an idempotent read, retrying transient failures with exponential backoff.
    async fn read<T, F, Fut>(&self, call: F) -> Result<T, RpcError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, RpcError>>,
    {
        call.retry(
            ExponentialBuilder::default()
                .with_min_delay(Duration::from_millis(100))
                .with_max_times(self.config.read_retries),
        )
        .when(RpcError::is_transient)
        .notify(|err, delay| {
            tracing::debug!(error = %err, ?delay, "Transient RPC failure, retrying");
        })
        .await
    }
}
