use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::primitives::blockfile::DEFAULT_BLOCK_SIZE;
use crate::session::{NODES_SCHEME, STATEMENTS_SCHEME};
use crate::storage::{IndexId, StoreOptions};
use crate::types::{Result, StoreError};

/// File name of the coordinator's decision log inside the database directory.
pub const DECISION_LOG_FILE: &str = "coordinator.log";

/// One coordinator participant.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ResourceConfig {
    /// Registry scheme used to build the resource.
    pub scheme: String,
    /// Resource name; also the stem of its files.
    pub name: String,
}

impl ResourceConfig {
    /// Creates a participant entry.
    pub fn new(scheme: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            scheme: scheme.into(),
            name: name.into(),
        }
    }
}

/// Database configuration, usually read from TOML.
///
/// ```toml
/// directory = "data"
/// block_size = 4096
/// indexes = ["spog", "posg", "ospg"]
///
/// [[resources]]
/// scheme = "statements"
/// name = "statements"
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DatabaseConfig {
    /// Directory holding every resource's files and the decision log.
    pub directory: PathBuf,
    /// Block size of statement stores.
    pub block_size: usize,
    /// Decoded nodes cached per statement store.
    pub cache_blocks: usize,
    /// Maintained statement indexes by name.
    pub indexes: Vec<String>,
    /// Whether prepare fsyncs block files.
    pub sync: bool,
    /// Participants in commit order.
    pub resources: Vec<ResourceConfig>,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("."),
            block_size: DEFAULT_BLOCK_SIZE,
            cache_blocks: 1024,
            indexes: IndexId::ALL
                .iter()
                .map(|id| id.name().to_ascii_lowercase())
                .collect(),
            sync: true,
            resources: vec![
                ResourceConfig::new(STATEMENTS_SCHEME, "statements"),
                ResourceConfig::new(NODES_SCHEME, "nodes"),
            ],
        }
    }
}

impl DatabaseConfig {
    /// Default configuration rooted at `directory`.
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
            ..Self::default()
        }
    }

    /// Parses TOML.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|err| StoreError::invalid(format!("invalid config: {err}")))
    }

    /// Reads a TOML file. A relative `directory` is resolved against the file's parent.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)?;
        let mut config = Self::from_toml_str(&text)?;
        if config.directory.is_relative() {
            if let Some(parent) = path.parent() {
                config.directory = parent.join(&config.directory);
            }
        }
        Ok(config)
    }

    /// Serialises to TOML.
    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self)
            .map_err(|err| StoreError::invalid(format!("cannot serialise config: {err}")))
    }

    /// Path of the coordinator decision log.
    pub fn decision_log_path(&self) -> PathBuf {
        self.directory.join(DECISION_LOG_FILE)
    }

    /// Statement store options described by this configuration.
    pub fn store_options(&self) -> Result<StoreOptions> {
        let indexes = self
            .indexes
            .iter()
            .map(|name| name.parse::<IndexId>())
            .collect::<Result<Vec<_>>>()?;
        StoreOptions::new()
            .block_size(self.block_size)
            .cache_blocks(self.cache_blocks)
            .indexes(indexes)
            .sync(self.sync)
            .normalized()
    }

    /// Checks resource names and the participant list.
    pub fn validate(&self) -> Result<()> {
        if self.resources.is_empty() {
            return Err(StoreError::invalid("config lists no resources"));
        }
        for resource in &self.resources {
            let name = &resource.name;
            let bad = name.is_empty()
                || name == DECISION_LOG_FILE
                || name
                    .chars()
                    .any(|c| !(c.is_ascii_alphanumeric() || c == '_' || c == '-'));
            if bad {
                return Err(StoreError::invalid(format!(
                    "resource name {name:?} must be non-empty ASCII letters, digits, '-' or '_'"
                )));
            }
        }
        Ok(())
    }
}
