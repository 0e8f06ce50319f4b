//! Network addresses and the pod naming convention behind them.
//!
//! Every pod of the StatefulSet has a stable DNS name of the form
//! `<statefulset>-<ordinal>.<headless-service>.<namespace>.svc.<domain>`.
//! The ordinal embedded in that name is what ties a cluster node back to its
//! deployment position, independent of the cluster's own node ids.

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default Valkey client port.
pub const DEFAULT_VALKEY_PORT: u16 = 6379;

/// Offset between the client port and the cluster bus port.
pub const CLUSTER_BUS_PORT_OFFSET: u16 = 10000;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid address `{0}`, expected host:port")]
pub struct AddressParseError(pub String);

/// A `host:port` endpoint of a cluster node.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Address {
    pub host: String,
    pub port: u16,
}

impl Address {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Deployment ordinal encoded in the host name.
    ///
    /// ```
    /// use valkey_scaler::topology::Address;
    ///
    /// assert_eq!(Address::new("valkey-0.valkey-headless.default.svc", 6379).index(), Some(0));
    /// assert_eq!(Address::new("valkey-abc.valkey-headless", 6379).index(), None);
    /// assert_eq!(Address::new("a", 6379).index(), None);
    /// assert_eq!(Address::new("valkey--5", 6379).index(), Some(5));
    /// ```
    pub fn index(&self) -> Option<u32> {
        ordinal_from_host(&self.host)
    }

    pub fn cluster_bus_port(&self) -> u16 {
        self.port.saturating_add(CLUSTER_BUS_PORT_OFFSET)
    }
}

impl std::fmt::Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl FromStr for Address {
    type Err = AddressParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (host, port) = s
            .rsplit_once(':')
            .ok_or_else(|| AddressParseError(s.to_string()))?;
        if host.is_empty() {
            return Err(AddressParseError(s.to_string()));
        }
        let port = port.parse().map_err(|_| AddressParseError(s.to_string()))?;
        Ok(Self::new(host, port))
    }
}

/// Extract the ordinal from a host name like `valkey-3.valkey-headless.ns.svc`.
///
/// Only the first dot-separated label is considered. The ordinal is the run of
/// ASCII digits after its last hyphen; anything else yields `None`.
pub fn ordinal_from_host(host: &str) -> Option<u32> {
    let pod_name = host.split('.').next()?;
    let (_, trailer) = pod_name.rsplit_once('-')?;
    if trailer.is_empty() || !trailer.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    trailer.parse().ok()
}

/// Naming convention used to derive every pod's expected address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PodNaming {
    pub statefulset: String,
    pub headless_service: String,
    pub namespace: String,
    pub cluster_domain: String,
    pub port: u16,
}

impl PodNaming {
    /// Naming for a cluster whose StatefulSet is named after the cluster and
    /// whose headless service carries the `-headless` suffix.
    pub fn for_cluster(cluster_name: &str, namespace: &str) -> Self {
        Self {
            statefulset: cluster_name.to_string(),
            headless_service: format!("{cluster_name}-headless"),
            namespace: namespace.to_string(),
            cluster_domain: "cluster.local".to_string(),
            port: DEFAULT_VALKEY_PORT,
        }
    }

    pub fn pod_name(&self, ordinal: u32) -> String {
        format!("{}-{}", self.statefulset, ordinal)
    }

    pub fn pod_dns_name(&self, ordinal: u32) -> String {
        format!(
            "{}.{}.{}.svc.{}",
            self.pod_name(ordinal),
            self.headless_service,
            self.namespace,
            self.cluster_domain
        )
    }

    pub fn address(&self, ordinal: u32) -> Address {
        Address::new(self.pod_dns_name(ordinal), self.port)
    }

    /// Addresses of pods `0..count`.
    pub fn addresses(&self, count: u32) -> Vec<Address> {
        (0..count).map(|ordinal| self.address(ordinal)).collect()
    }
}
