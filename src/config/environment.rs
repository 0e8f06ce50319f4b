//! Process configuration read from the environment.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::topology::PodNaming;

use super::ConfigError;
use super::desired_state::{DesiredState, parse_persistence};

/// Default convergence timeout for every wait after a mutation.
pub const DEFAULT_CONVERGENCE_TIMEOUT: Duration = Duration::from_secs(300);

/// Everything a command needs to find and reshape one cluster.
#[derive(Debug, Clone)]
pub struct ClusterConfig {
    pub cluster_name: String,
    pub namespace: String,
    pub desired: DesiredState,
    pub password: Option<String>,
    pub naming: PodNaming,
    pub valkey_cli: PathBuf,
    pub convergence_timeout: Duration,
}

impl ClusterConfig {
    /// Read the configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the configuration from any key lookup.
    ///
    /// `CLUSTER_NAME`, `NAMESPACE`, `MASTERS` and `REPLICAS_PER_MASTER` are
    /// required. `VALKEY_PORT`, `CLUSTER_DOMAIN`, `VALKEY_CLI` and
    /// `CONVERGENCE_TIMEOUT_SECS` fall back to defaults; `VALKEY_PASSWORD`,
    /// `STORAGE_SIZE` and `PERSISTENCE` are optional.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());
        let require = |key: &str| get(key).ok_or_else(|| ConfigError::Missing(key.to_string()));

        let cluster_name = require("CLUSTER_NAME")?;
        let namespace = require("NAMESPACE")?;

        let mut desired = DesiredState::new(
            parse_value("MASTERS", &require("MASTERS")?)?,
            parse_value("REPLICAS_PER_MASTER", &require("REPLICAS_PER_MASTER")?)?,
        );
        desired.storage = get("STORAGE_SIZE");
        if let Some(list) = get("PERSISTENCE") {
            desired.persistence = parse_persistence(&list)?;
        }
        desired.validate()?;

        let mut naming = PodNaming::for_cluster(&cluster_name, &namespace);
        if let Some(port) = get("VALKEY_PORT") {
            naming.port = parse_value("VALKEY_PORT", &port)?;
        }
        if let Some(domain) = get("CLUSTER_DOMAIN") {
            naming.cluster_domain = domain;
        }

        let convergence_timeout = match get("CONVERGENCE_TIMEOUT_SECS") {
            Some(secs) => Duration::from_secs(parse_value("CONVERGENCE_TIMEOUT_SECS", &secs)?),
            None => DEFAULT_CONVERGENCE_TIMEOUT,
        };

        Ok(Self {
            cluster_name,
            namespace,
            desired,
            password: lookup("VALKEY_PASSWORD").filter(|p| !p.is_empty()),
            naming,
            valkey_cli: get("VALKEY_CLI").map_or_else(|| PathBuf::from("valkey-cli"), PathBuf::from),
            convergence_timeout,
        })
    }
}

fn parse_value<T>(key: &str, value: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
        key: key.to_string(),
        value: value.to_string(),
        reason: e.to_string(),
    })
}
