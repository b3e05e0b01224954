//! Deployment declarations.

use std::collections::BTreeSet;

use alloy_core::dyn_abi::{DynSolType, DynSolValue};
use serde::{Deserialize, Serialize};

/// The tag that selects every declared deployment.
pub const ALL_TAG: &str = "all";

/// A single constructor argument as declared.
///
/// In `Cashflow.toml`:
/// - `{ ref = "TokenMock" }` is the address another deployment of this run produced,
/// - `{ named = "owner" }` is a named address from the network configuration,
/// - anything else is a literal coerced to the constructor parameter's type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConstructorArg {
    Ref {
        #[serde(rename = "ref")]
        target: String,
    },
    Named {
        named: String,
    },
    Literal(Literal),
}

impl ConstructorArg {
    pub fn reference(target: impl Into<String>) -> Self {
        Self::Ref {
            target: target.into(),
        }
    }

    pub fn named(key: impl Into<String>) -> Self {
        Self::Named { named: key.into() }
    }

    pub fn literal(value: impl Into<Literal>) -> Self {
        Self::Literal(value.into())
    }
}

/// A literal constructor argument, before it is typed against the artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Literal {
    Bool(bool),
    Int(i64),
    Str(String),
}

impl From<&str> for Literal {
    fn from(value: &str) -> Self {
        Self::Str(value.to_string())
    }
}

impl From<String> for Literal {
    fn from(value: String) -> Self {
        Self::Str(value)
    }
}

impl From<i64> for Literal {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<bool> for Literal {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl Literal {
    /// Coerce the literal to a value of the given parameter type.
    ///
    /// Strings are parsed with the Solidity value syntax of `ty` (addresses, hex
    /// bytes, decimal or unit-suffixed numbers, arrays), except for `string`
    /// parameters which take the text verbatim. Returns a human-readable reason
    /// on mismatch.
    pub fn coerce(&self, ty: &DynSolType) -> Result<DynSolValue, String> {
        let raw = match (self, ty) {
            (Self::Str(s), DynSolType::String) => return Ok(DynSolValue::String(s.clone())),
            (Self::Str(s), _) => s.clone(),
            (Self::Int(i), DynSolType::Int(_) | DynSolType::Uint(_)) => i.to_string(),
            (Self::Bool(b), DynSolType::Bool) => b.to_string(),
            (literal, ty) => {
                return Err(format!("{literal:?} cannot be used as {}", ty.sol_type_name()));
            }
        };

        ty.coerce_str(&raw)
            .map_err(|e| format!("`{raw}` is not a valid {}: {e}", ty.sol_type_name()))
    }
}

/// A typed constructor argument, as recorded in the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResolvedArg {
    /// Canonical Solidity type, e.g. `uint256`.
    #[serde(rename = "type")]
    pub ty: String,
    /// Canonical rendering of the value.
    pub value: String,
}

impl ResolvedArg {
    pub fn new(ty: &DynSolType, value: &DynSolValue) -> Self {
        Self {
            ty: ty.sol_type_name().into_owned(),
            value: render(value),
        }
    }
}

fn render(value: &DynSolValue) -> String {
    match value {
        DynSolValue::Address(address) => address.to_string(),
        DynSolValue::Bool(b) => b.to_string(),
        DynSolValue::Int(i, _) => i.to_string(),
        DynSolValue::Uint(u, _) => u.to_string(),
        DynSolValue::String(s) => s.clone(),
        DynSolValue::Bytes(bytes) => format!("0x{}", hex::encode(bytes)),
        // Composite and fixed-size values are recorded by their ABI encoding.
        other => format!("0x{}", hex::encode(other.abi_encode())),
    }
}

/// A named deployment declaration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentRequest {
    /// Deployment name, unique within a project. Ledger records are keyed by it.
    pub name: String,
    /// Artifact to deploy. Defaults to `name`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contract: Option<String>,
    /// Ordered constructor arguments.
    #[serde(default)]
    pub args: Vec<ConstructorArg>,
    /// Tags selecting this deployment.
    #[serde(default)]
    pub tags: BTreeSet<String>,
    /// Gas limit override for the creation transaction.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gas_limit: Option<u64>,
}

impl DeploymentRequest {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            contract: None,
            args: Vec::new(),
            tags: BTreeSet::new(),
            gas_limit: None,
        }
    }

    pub fn contract(mut self, contract: impl Into<String>) -> Self {
        self.contract = Some(contract.into());
        self
    }

    pub fn args(mut self, args: impl IntoIterator<Item = ConstructorArg>) -> Self {
        self.args = args.into_iter().collect();
        self
    }

    pub fn tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn gas_limit(mut self, gas_limit: u64) -> Self {
        self.gas_limit = Some(gas_limit);
        self
    }

    /// The artifact name to deploy.
    pub fn artifact_name(&self) -> &str {
        self.contract.as_deref().unwrap_or(&self.name)
    }

    /// Names of the deployments whose addresses this one's constructor needs.
    pub fn dependencies(&self) -> impl Iterator<Item = &str> {
        self.args.iter().filter_map(|arg| match arg {
            ConstructorArg::Ref { target } => Some(target.as_str()),
            _ => None,
        })
    }
}
