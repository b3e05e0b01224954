//! Project configuration (`Cashflow.toml`).

use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
    time::Duration,
};

use alloy_core::primitives::Address;
use anyhow::{Context, Result};
use figment::{
    Figment,
    providers::{Env, Format, Toml},
};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::{deployment::DeploymentRequest, signing::EnvCredential, submitter::SubmitterConfig};

/// Default configuration file name.
pub const CONFIG_FILENAME: &str = "Cashflow.toml";

/// Prefix of environment variables overriding configuration keys.
///
/// Nested keys are separated by `__`, e.g. `CASHFLOW_NETWORKS__MUMBAI__GAS_LIMIT`.
pub const ENV_PREFIX: &str = "CASHFLOW_";

/// The named address that always resolves to the signing account.
pub const DEPLOYER_ADDRESS_KEY: &str = "deployer";

const DEFAULT_RPC_URL_ENV: &str = "PRIVATE_RPC";
const DEFAULT_PRIVATE_KEY_ENV: &str = "PRIVATE_KEY";

fn default_artifacts() -> PathBuf {
    PathBuf::from("artifacts")
}

fn default_deployments_dir() -> PathBuf {
    PathBuf::from("deployments")
}

fn default_rpc_url_env() -> String {
    DEFAULT_RPC_URL_ENV.to_string()
}

fn default_private_key_env() -> String {
    DEFAULT_PRIVATE_KEY_ENV.to_string()
}

fn default_confirmations() -> u64 {
    crate::submitter::DEFAULT_CONFIRMATIONS
}

fn default_confirmation_timeout_secs() -> u64 {
    crate::submitter::DEFAULT_CONFIRMATION_TIMEOUT.as_secs()
}

fn default_poll_interval_ms() -> u64 {
    crate::submitter::DEFAULT_POLL_INTERVAL.as_millis() as u64
}

/// Top-level project configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CashflowConfig {
    /// Network used when none is given on the command line.
    #[serde(default)]
    pub default_network: Option<String>,
    /// Hardhat artifacts directory.
    #[serde(default = "default_artifacts")]
    pub artifacts: PathBuf,
    /// Root of the deployment ledger.
    #[serde(default = "default_deployments_dir")]
    pub deployments_dir: PathBuf,
    #[serde(default)]
    pub networks: BTreeMap<String, NetworkConfig>,
    /// Deployment declarations, in declaration order.
    #[serde(default)]
    pub deployments: Vec<DeploymentRequest>,
}

/// Settings of one target network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkConfig {
    pub chain_id: u64,
    /// Explicit RPC endpoint. Takes precedence over `rpc_url_env`.
    #[serde(default)]
    pub rpc_url: Option<Url>,
    /// Environment variable holding the RPC endpoint.
    #[serde(default = "default_rpc_url_env")]
    pub rpc_url_env: String,
    /// Environment variable holding the hex private key of the signing account.
    #[serde(default = "default_private_key_env")]
    pub private_key_env: String,
    /// Gas limit of creation transactions. Estimated when absent.
    #[serde(default)]
    pub gas_limit: Option<u64>,
    #[serde(default = "default_confirmations")]
    pub confirmations: u64,
    #[serde(default = "default_confirmation_timeout_secs")]
    pub confirmation_timeout_secs: u64,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Named addresses usable as `{ named = "..." }` constructor arguments.
    #[serde(default)]
    pub addresses: BTreeMap<String, Address>,
    #[serde(default)]
    pub superfluid: Option<SuperfluidConfig>,
}

/// Superfluid protocol contracts of a network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuperfluidConfig {
    /// The Superfluid host contract.
    pub host: Address,
    /// The constant flow agreement (CFA v1) contract.
    pub cfa: Address,
    /// Known super-token wrappers, by symbol.
    #[serde(default)]
    pub super_tokens: BTreeMap<String, Address>,
}

impl CashflowConfig {
    /// Load the configuration from a TOML file, with `CASHFLOW_*` environment overrides.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            anyhow::bail!("Configuration file not found: {}", path.display());
        }

        let config: Self = Figment::new()
            .merge(Toml::file(path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()
            .with_context(|| format!("Failed to parse configuration {}", path.display()))?;

        tracing::debug!(
            path = %path.display(),
            networks = config.networks.len(),
            deployments = config.deployments.len(),
            "Configuration loaded"
        );

        Ok(config)
    }

    /// Parse a configuration from TOML text, without environment overrides.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        Figment::new()
            .merge(Toml::string(content))
            .extract()
            .context("Failed to parse configuration")
    }

    /// Select a network by name, falling back to `default_network`.
    pub fn network<'a>(&'a self, name: Option<&'a str>) -> Result<(&'a str, &'a NetworkConfig)> {
        let name = name
            .or(self.default_network.as_deref())
            .context("No network selected: pass --network or set `default_network`")?;

        let network = self.networks.get(name).with_context(|| {
            let known: Vec<_> = self.networks.keys().map(String::as_str).collect();
            format!(
                "Network `{name}` is not configured (known networks: {})",
                known.join(", ")
            )
        })?;

        Ok((name, network))
    }
}

impl NetworkConfig {
    /// The RPC endpoint: `rpc_url`, or the URL in the `rpc_url_env` variable.
    pub fn rpc_url(&self) -> Result<Url> {
        if let Some(url) = &self.rpc_url {
            return Ok(url.clone());
        }

        let raw = std::env::var(&self.rpc_url_env).with_context(|| {
            format!(
                "No RPC endpoint: set `rpc_url` or the `{}` environment variable",
                self.rpc_url_env
            )
        })?;
        Url::parse(raw.trim())
            .with_context(|| format!("`{}` is not a valid URL", self.rpc_url_env))
    }

    /// The signing credential of this network.
    pub fn credential(&self) -> EnvCredential {
        EnvCredential::new(&self.private_key_env)
    }

    pub fn submitter_config(&self) -> SubmitterConfig {
        SubmitterConfig {
            confirmations: self.confirmations.max(1),
            confirmation_timeout: Duration::from_secs(self.confirmation_timeout_secs),
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            ..SubmitterConfig::new(self.chain_id)
        }
    }

    /// Look up a named address: the `addresses` table first, then super-token symbols.
    pub fn named_address(&self, key: &str) -> Option<Address> {
        self.addresses.get(key).copied().or_else(|| {
            self.superfluid
                .as_ref()
                .and_then(|sf| sf.super_tokens.get(key).copied())
        })
    }
}
