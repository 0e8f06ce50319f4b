//! Parsing for `INFO`-style `key:value` replies.
//!
//! All parsing functions are pure: the same input always produces the same
//! output, and unknown or malformed lines are ignored.

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;

use crate::topology::Address;

/// Matches `key:value` where key is word chars or dashes.
static KV_RE: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new(r"^([\w-]+):(.*)$").ok());

/// Split an `INFO` style reply into its `key:value` fields.
///
/// `#` section headers and blank lines are skipped; values keep any further colons.
///
/// # Example
/// ```
/// use valkey_scaler::client::parsing::parse_info_output;
///
/// let info = "# Replication\r\nrole:slave\r\nmaster_port:6379\r\n";
/// let parsed = parse_info_output(info);
/// assert_eq!(parsed.get("role"), Some(&"slave".to_string()));
/// assert_eq!(parsed.get("master_port"), Some(&"6379".to_string()));
/// ```
pub fn parse_info_output(info: &str) -> HashMap<String, String> {
    let Some(kv_regex) = KV_RE.as_ref() else {
        return HashMap::new();
    };

    info.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| {
            let caps = kv_regex.captures(line)?;
            Some((caps.get(1)?.as_str().to_string(), caps.get(2)?.as_str().to_string()))
        })
        .collect()
}

/// Replication role reported by `INFO replication`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplicationRole {
    Master,
    Replica,
    Other(String),
}

impl ReplicationRole {
    fn parse(value: &str) -> Self {
        match value.trim() {
            "master" => ReplicationRole::Master,
            "slave" | "replica" => ReplicationRole::Replica,
            other => ReplicationRole::Other(other.to_string()),
        }
    }
}

impl std::fmt::Display for ReplicationRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReplicationRole::Master => write!(f, "master"),
            ReplicationRole::Replica => write!(f, "slave"),
            ReplicationRole::Other(role) => write!(f, "{role}"),
        }
    }
}

/// Structured view of `INFO replication`.
#[derive(Debug, Clone, Default)]
pub struct ReplicationInfo {
    pub role: Option<ReplicationRole>,
    /// Host of the master this node replicates from
    pub master_host: Option<String>,
    /// Port of the master this node replicates from
    pub master_port: Option<u16>,
    /// `up` once the replica's link to its master is established.
    pub master_link_status: Option<String>,
    pub master_repl_offset: Option<i64>,
    pub slave_repl_offset: Option<i64>,
}

impl ReplicationInfo {
    /// Missing or unreadable fields stay `None`.
    pub fn parse(info: &str) -> Self {
        let parsed = parse_info_output(info);
        let number = |key: &str| parsed.get(key).and_then(|v| v.trim().parse().ok());

        ReplicationInfo {
            role: parsed.get("role").map(|r| ReplicationRole::parse(r)),
            master_host: parsed.get("master_host").map(|h| h.trim().to_string()),
            master_port: parsed
                .get("master_port")
                .and_then(|v| v.trim().parse().ok()),
            master_link_status: parsed.get("master_link_status").map(|s| s.trim().to_string()),
            master_repl_offset: number("master_repl_offset"),
            slave_repl_offset: number("slave_repl_offset"),
        }
    }

    pub fn is_master(&self) -> bool {
        self.role == Some(ReplicationRole::Master)
    }

    /// Whether this node replicates from `master`.
    ///
    /// Hosts are compared on their first DNS label, so a short pod name and
    /// a fully qualified one refer to the same pod.
    pub fn is_replica_of(&self, master: &Address) -> bool {
        let short = |host: &str| host.split('.').next().unwrap_or(host).to_string();
        self.role == Some(ReplicationRole::Replica)
            && self.master_port == Some(master.port)
            && self
                .master_host
                .as_deref()
                .is_some_and(|host| short(host) == short(&master.host))
    }

    /// Bytes the replica is behind, when both offsets are reported.
    pub fn replication_lag(&self) -> Option<i64> {
        match (self.master_repl_offset, self.slave_repl_offset) {
            (Some(master), Some(slave)) => Some(master - slave),
            _ => None,
        }
    }
}
