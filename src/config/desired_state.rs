//! The target shape of the cluster and its validation.

use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use super::ConfigError;

/// Persistence modes the data pods can run with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PersistenceMode {
    Rdb,
    Aof,
}

impl FromStr for PersistenceMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "rdb" => Ok(PersistenceMode::Rdb),
            "aof" => Ok(PersistenceMode::Aof),
            other => Err(ConfigError::Validation(format!(
                "unknown persistence mode `{other}`, expected rdb or aof"
            ))),
        }
    }
}

impl std::fmt::Display for PersistenceMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PersistenceMode::Rdb => write!(f, "rdb"),
            PersistenceMode::Aof => write!(f, "aof"),
        }
    }
}

/// Desired cluster shape, validated before any cluster interaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DesiredState {
    pub masters: u32,
    #[serde(default)]
    pub replicas_per_master: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub persistence: Vec<PersistenceMode>,
}

impl DesiredState {
    pub fn new(masters: u32, replicas_per_master: u32) -> Self {
        Self {
            masters,
            replicas_per_master,
            storage: None,
            persistence: Vec::new(),
        }
    }

    /// Parse and validate a JSON document.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let state: DesiredState = serde_json::from_str(json)?;
        state.validate()?;
        Ok(state)
    }

    /// Pods per shard: the master and its replicas.
    pub fn block(&self) -> u32 {
        self.replicas_per_master.saturating_add(1)
    }

    /// Total pods: every master plus its replicas.
    pub fn total_nodes(&self) -> u32 {
        self.masters.saturating_mul(self.block())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.masters < 1 {
            return Err(ConfigError::Validation(
                "masters must be at least 1".to_string(),
            ));
        }
        if self
            .replicas_per_master
            .checked_add(1)
            .and_then(|block| self.masters.checked_mul(block))
            .is_none()
        {
            return Err(ConfigError::Validation(format!(
                "{} masters with {} replicas each is too large",
                self.masters, self.replicas_per_master
            )));
        }
        if let Some(size) = &self.storage
            && !is_valid_storage_size(size)
        {
            return Err(ConfigError::Validation(format!(
                "invalid storage size `{size}`, expected a quantity like 10Gi"
            )));
        }
        Ok(())
    }
}

/// Check if a storage quantity string is valid (e.g. `512Mi`, `10Gi`).
pub fn is_valid_storage_size(size: &str) -> bool {
    // Pattern: ^([0-9]+)(Ki|Mi|Gi|Ti|Pi|Ei)?$
    static STORAGE_RE: LazyLock<Option<Regex>> =
        LazyLock::new(|| Regex::new(r"^([0-9]+)(Ki|Mi|Gi|Ti|Pi|Ei)?$").ok());
    STORAGE_RE.as_ref().is_some_and(|re| re.is_match(size))
}

/// Parse a comma-separated persistence list such as `rdb,aof`.
pub fn parse_persistence(list: &str) -> Result<Vec<PersistenceMode>, ConfigError> {
    let mut modes = Vec::new();
    for part in list.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let mode: PersistenceMode = part.parse()?;
        if !modes.contains(&mode) {
            modes.push(mode);
        }
    }
    Ok(modes)
}
