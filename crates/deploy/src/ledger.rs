//! Persisted record of deployed contracts.
//!
//! The ledger keeps one JSON document per (network, deployment name) under
//! `<root>/<network>/<name>.json`, the same layout hardhat-deploy uses. A record
//! is only written after its creation transaction is confirmed, so the ledger
//! always reflects confirmed successes.

use std::{
    fs::{File, OpenOptions},
    io::Write,
    path::{Path, PathBuf},
};

use alloy_core::primitives::{Address, B256};
use derive_more::{Deref, Display};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::{Error, Result, deployment::ResolvedArg};

const LOCK_FILE: &str = ".lock";

/// SHA-256 of the resolved constructor arguments, hex encoded.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Display, Deref)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Compute the fingerprint of resolved constructor arguments.
    ///
    /// The arguments are serialized to JSON (an array, so order matters, and each
    /// value carries its Solidity type) before hashing. The same arguments
    /// always produce the same fingerprint.
    pub fn of(args: &[ResolvedArg]) -> Result<Self> {
        let json = serde_json::to_vec(args)
            .map_err(|e| Error::ledger("failed to serialize constructor arguments", e))?;

        let mut hasher = Sha256::new();
        hasher.update(&json);
        Ok(Self(hex::encode(hasher.finalize())))
    }
}

/// A confirmed deployment of one named contract on one network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentRecord {
    pub name: String,
    pub network: String,
    pub address: Address,
    pub constructor_args_fingerprint: Fingerprint,
    /// Keccak-256 of the creation bytecode that was deployed.
    pub bytecode_hash: B256,
    pub transaction_hash: B256,
    pub block_number: u64,
    /// Unix timestamp (seconds) of when the record was committed.
    pub timestamp: i64,
    /// The resolved constructor arguments, kept for inspection.
    #[serde(default)]
    pub args: Vec<ResolvedArg>,
}

/// File-backed deployment ledger.
#[derive(Debug, Clone)]
pub struct DeploymentLedger {
    root: PathBuf,
}

impl DeploymentLedger {
    /// Open a ledger rooted at `root`. Nothing is created until the first commit.
    pub fn open(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Deterministic, order- and value-sensitive hash of resolved arguments.
    pub fn fingerprint(args: &[ResolvedArg]) -> Result<Fingerprint> {
        Fingerprint::of(args)
    }

    fn network_dir(&self, network: &str) -> Result<PathBuf> {
        check_path_component("network", network)?;
        Ok(self.root.join(network))
    }

    fn record_path(&self, name: &str, network: &str) -> Result<PathBuf> {
        check_path_component("deployment", name)?;
        Ok(self.network_dir(network)?.join(format!("{name}.json")))
    }

    /// Read the live record for `(name, network)`, if any.
    pub fn lookup(&self, name: &str, network: &str) -> Result<Option<DeploymentRecord>> {
        let path = self.record_path(name, network)?;
        if !path.exists() {
            return Ok(None);
        }

        let content = std::fs::read_to_string(&path)
            .map_err(|e| Error::ledger(format!("failed to read {}", path.display()), e))?;
        let record = serde_json::from_str(&content)
            .map_err(|e| Error::ledger(format!("failed to parse {}", path.display()), e))?;

        Ok(Some(record))
    }

    /// Replace the record for `(record.name, record.network)`.
    ///
    /// The new record is written to a temporary sibling file, flushed to disk and
    /// renamed over the previous one, then the directory entry is flushed too. A
    /// crash leaves either the old record or the new one in place, never a
    /// truncated file.
    pub fn commit(&self, record: &DeploymentRecord) -> Result<()> {
        let path = self.record_path(&record.name, &record.network)?;
        let dir = self.network_dir(&record.network)?;
        std::fs::create_dir_all(&dir)
            .map_err(|e| Error::ledger(format!("failed to create {}", dir.display()), e))?;

        let tmp_path = dir.join(format!(".{}.json.tmp", record.name));

        let json = serde_json::to_string_pretty(record)
            .map_err(|e| Error::ledger("failed to serialize deployment record", e))?;

        let mut file = File::create(&tmp_path)
            .map_err(|e| Error::ledger(format!("failed to create {}", tmp_path.display()), e))?;
        file.write_all(json.as_bytes())
            .and_then(|_| file.sync_all())
            .map_err(|e| Error::ledger(format!("failed to write {}", tmp_path.display()), e))?;
        drop(file);

        std::fs::rename(&tmp_path, &path).map_err(|e| {
            Error::ledger(
                format!("failed to move {} to {}", tmp_path.display(), path.display()),
                e,
            )
        })?;
        sync_dir(&dir)?;

        tracing::debug!(
            name = %record.name,
            network = %record.network,
            path = %path.display(),
            "Deployment record committed"
        );

        Ok(())
    }

    /// All records of a network, sorted by name.
    pub fn records(&self, network: &str) -> Result<Vec<DeploymentRecord>> {
        let dir = self.network_dir(network)?;
        if !dir.exists() {
            return Ok(Vec::new());
        }

        let entries = std::fs::read_dir(&dir)
            .map_err(|e| Error::ledger(format!("failed to read {}", dir.display()), e))?;

        let mut records = Vec::new();
        for entry in entries {
            let path = entry
                .map_err(|e| Error::ledger(format!("failed to read {}", dir.display()), e))?
                .path();
            let Some(name) = path
                .file_name()
                .and_then(|n| n.to_str())
                .filter(|n| !n.starts_with('.'))
                .and_then(|n| n.strip_suffix(".json"))
            else {
                continue;
            };
            if let Some(record) = self.lookup(name, network)? {
                records.push(record);
            }
        }

        records.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(records)
    }

    /// Take the exclusive lock of a network's ledger.
    ///
    /// Fails immediately if another process holds it. The lock is released when
    /// the returned guard is dropped.
    pub fn lock(&self, network: &str) -> Result<LedgerLock> {
        let dir = self.network_dir(network)?;
        std::fs::create_dir_all(&dir)
            .map_err(|e| Error::ledger(format!("failed to create {}", dir.display()), e))?;

        let path = dir.join(LOCK_FILE);
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)
            .map_err(|e| Error::ledger(format!("failed to open {}", path.display()), e))?;

        file.try_lock_exclusive().map_err(|e| {
            Error::ledger(
                format!("ledger for network `{network}` is locked by another process"),
                e,
            )
        })?;

        Ok(LedgerLock { file })
    }
}

/// Names become file and directory names under the ledger root, so they must
/// stay a single, visible path component.
fn check_path_component(what: &str, value: &str) -> Result<()> {
    let valid = !value.is_empty()
        && !value.starts_with('.')
        && !value.contains(['/', '\\', '\0']);
    if valid {
        Ok(())
    } else {
        Err(Error::Ledger(format!(
            "{what} name `{}` cannot be used as a ledger file name",
            value.escape_debug()
        )))
    }
}

/// Make a rename in `dir` durable.
#[cfg(unix)]
fn sync_dir(dir: &Path) -> Result<()> {
    File::open(dir)
        .and_then(|dir| dir.sync_all())
        .map_err(|e| Error::ledger(format!("failed to sync {}", dir.display()), e))
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) -> Result<()> {
    Ok(())
}

/// Guard holding a network's ledger lock.
#[derive(Debug)]
pub struct LedgerLock {
    file: File,
}

impl Drop for LedgerLock {
    fn drop(&mut self) {
        if let Err(err) = FileExt::unlock(&self.file) {
            tracing::warn!(%err, "Failed to release ledger lock");
        }
    }
}
