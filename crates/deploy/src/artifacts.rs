//! Compiled contract artifacts.
//!
//! Artifacts are loaded once at process start from a Hardhat-style build output
//! directory and are read-only afterwards.

use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};

use alloy_core::{
    dyn_abi::{DynSolType, Specifier},
    json_abi::JsonAbi,
    primitives::{B256, Bytes, keccak256},
};
use serde::Deserialize;
use serde_json::Value;

use crate::{Error, Result};

/// A named constructor parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConstructorParam {
    pub name: String,
    pub ty: DynSolType,
}

/// A compiled contract: its interface, creation bytecode and constructor schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub name: String,
    pub abi: JsonAbi,
    pub bytecode: Bytes,
    pub constructor_params: Vec<ConstructorParam>,
}

impl Artifact {
    /// Build an artifact, resolving the constructor schema from the ABI.
    ///
    /// An ABI without a constructor takes no arguments. A parameter whose type
    /// cannot be resolved is an [`Error::Artifact`].
    pub fn new(name: impl Into<String>, abi: JsonAbi, bytecode: Bytes) -> Result<Self> {
        let name = name.into();

        let constructor_params = abi
            .constructor
            .iter()
            .flat_map(|constructor| &constructor.inputs)
            .map(|input| {
                let ty = input.resolve().map_err(|e| {
                    Error::Artifact(format!(
                        "`{name}` constructor parameter `{}` has an unsupported type: {e}",
                        input.name
                    ))
                })?;
                Ok(ConstructorParam {
                    name: input.name.clone(),
                    ty,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            name,
            abi,
            bytecode,
            constructor_params,
        })
    }

    /// Hash of the creation bytecode, used to detect recompiled contracts.
    pub fn bytecode_hash(&self) -> B256 {
        keccak256(&self.bytecode)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct HardhatArtifact {
    contract_name: String,
    abi: JsonAbi,
    bytecode: Bytes,
}

/// Name → artifact lookup table.
#[derive(Debug, Clone, Default)]
pub struct ArtifactRegistry {
    artifacts: BTreeMap<String, Artifact>,
}

impl ArtifactRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load every contract artifact found under `dir`.
    ///
    /// Walks the directory recursively. Debug files (`*.dbg.json`) and JSON
    /// documents that are not contract artifacts (build-info, caches) are skipped.
    /// Two artifacts with the same contract name fail the load.
    pub fn load_dir(dir: &Path) -> Result<Self> {
        let mut registry = Self::new();
        let mut pending = vec![dir.to_path_buf()];

        while let Some(current) = pending.pop() {
            let entries = std::fs::read_dir(&current).map_err(|e| {
                Error::Artifact(format!("failed to read {}: {e}", current.display()))
            })?;

            let mut paths: Vec<PathBuf> = entries
                .filter_map(|entry| entry.ok().map(|entry| entry.path()))
                .collect();
            paths.sort();

            for path in paths {
                if path.is_dir() {
                    pending.push(path);
                } else if is_artifact_file(&path) {
                    if let Some(artifact) = Self::read_artifact(&path)? {
                        registry.register_new(artifact, &path)?;
                    }
                }
            }
        }

        tracing::debug!(
            dir = %dir.display(),
            count = registry.artifacts.len(),
            "Loaded contract artifacts"
        );

        Ok(registry)
    }

    fn read_artifact(path: &Path) -> Result<Option<Artifact>> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Artifact(format!("failed to read {}: {e}", path.display())))?;

        let value: Value = serde_json::from_str(&content)
            .map_err(|e| Error::Artifact(format!("failed to parse {}: {e}", path.display())))?;

        if value.get("contractName").is_none() || value.get("bytecode").is_none() {
            tracing::trace!(path = %path.display(), "Skipping non-artifact JSON file");
            return Ok(None);
        }

        let artifact: HardhatArtifact = serde_json::from_value(value).map_err(|e| {
            Error::Artifact(format!("malformed artifact {}: {e}", path.display()))
        })?;

        Artifact::new(artifact.contract_name, artifact.abi, artifact.bytecode).map(Some)
    }

    fn register_new(&mut self, artifact: Artifact, path: &Path) -> Result<()> {
        if self.artifacts.contains_key(&artifact.name) {
            return Err(Error::Artifact(format!(
                "duplicate artifact `{}` at {}",
                artifact.name,
                path.display()
            )));
        }
        self.register(artifact);
        Ok(())
    }

    /// Register (or replace) a single artifact.
    pub fn register(&mut self, artifact: Artifact) {
        self.artifacts.insert(artifact.name.clone(), artifact);
    }

    /// Look up an artifact by contract name.
    pub fn get(&self, name: &str) -> Result<&Artifact> {
        self.artifacts
            .get(name)
            .ok_or_else(|| Error::UnknownArtifact(name.to_string()))
    }

    pub fn len(&self) -> usize {
        self.artifacts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.artifacts.is_empty()
    }
}

fn is_artifact_file(path: &Path) -> bool {
    let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
        return false;
    };
    file_name.ends_with(".json") && !file_name.ends_with(".dbg.json")
}
