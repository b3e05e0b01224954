//! Signing credentials and legacy (EIP-155) transaction signing.

use std::str::FromStr;

use alloy_consensus::{SignableTransaction, TxEnvelope, TxLegacy};
use alloy_core::primitives::{B256, Bytes, Signature};
use alloy_eips::eip2718::Encodable2718;
use alloy_network::TxSignerSync;
use alloy_signer_local::PrivateKeySigner;

use crate::{Error, Result};

/// Source of the signing key.
///
/// The key is loaded for each signature and dropped right after, so it is never
/// held for the lifetime of a run.
pub trait Credential: Send + Sync {
    fn load(&self) -> Result<PrivateKeySigner>;
}

/// Reads a hex private key from an environment variable.
#[derive(Debug, Clone)]
pub struct EnvCredential {
    var: String,
}

impl EnvCredential {
    pub fn new(var: impl Into<String>) -> Self {
        Self { var: var.into() }
    }
}

impl Credential for EnvCredential {
    fn load(&self) -> Result<PrivateKeySigner> {
        let raw = std::env::var(&self.var)
            .map_err(|_| Error::Signer(format!("environment variable `{}` is not set", self.var)))?;
        parse_private_key(&raw)
            .map_err(|reason| Error::Signer(format!("`{}` {reason}", self.var)))
    }
}

/// A private key held in memory. Meant for tests and local nodes.
#[derive(Debug, Clone)]
pub struct StaticCredential {
    key: String,
}

impl StaticCredential {
    pub fn new(key: impl Into<String>) -> Self {
        Self { key: key.into() }
    }
}

impl Credential for StaticCredential {
    fn load(&self) -> Result<PrivateKeySigner> {
        parse_private_key(&self.key).map_err(|reason| Error::Signer(format!("key {reason}")))
    }
}

// The key material never appears in the returned reason.
fn parse_private_key(raw: &str) -> std::result::Result<PrivateKeySigner, String> {
    let bytes = B256::from_str(raw.trim())
        .map_err(|_| "is not a 32-byte hex private key".to_string())?;
    PrivateKeySigner::from_bytes(&bytes).map_err(|_| "is not a valid secp256k1 key".to_string())
}

/// A signed transaction ready for `eth_sendRawTransaction`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedTransaction {
    pub raw: Bytes,
    pub hash: B256,
    pub signature: Signature,
}

/// Sign a legacy transaction, replay-protected for its chain (EIP-155).
pub fn sign_legacy(mut tx: TxLegacy, signer: &PrivateKeySigner) -> Result<SignedTransaction> {
    if tx.chain_id.is_none() {
        return Err(Error::Signer(
            "refusing to sign a transaction without a chain id".to_string(),
        ));
    }

    let signature = signer
        .sign_transaction_sync(&mut tx)
        .map_err(|e| Error::Signer(format!("failed to sign transaction: {e}")))?;

    let signed = tx.into_signed(signature);
    let hash = *signed.hash();
    let raw = TxEnvelope::from(signed).encoded_2718();

    Ok(SignedTransaction {
        raw: raw.into(),
        hash,
        signature,
    })
}
