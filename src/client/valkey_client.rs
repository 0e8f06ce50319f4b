//! Per-node connections over `fred`.
//!
//! Every call opens a centralized connection to exactly one node. Cluster
//! mode would route commands to whichever node owns a slot; here the answer
//! has to be the addressed node's own view.

use std::time::Duration;

use fred::prelude::*;
use fred::types::cluster::ClusterSetSlotState;
use fred::types::{ClusterHash, CustomCommand, InfoKind};
use thiserror::Error;
use tokio::time::timeout;
use tracing::{debug, instrument};

use crate::slots::SlotRange;
use crate::topology::Address;

#[derive(Error, Debug)]
pub enum ValkeyError {
    #[error("cannot reach node: {0}")]
    Connection(String),

    #[error("server error: {0}")]
    Redis(#[from] fred::error::Error),

    #[error("malformed reply: {0}")]
    Parse(#[from] crate::client::types::ParseError),

    #[error("{operation} did not finish within {duration:?}")]
    Timeout {
        operation: String,
        duration: Duration,
    },

    #[error("{tool} is not installed or not on PATH")]
    ToolNotFound { tool: String },

    #[error("`{command}` failed with status {status}: {stderr}")]
    Command {
        command: String,
        status: String,
        stderr: String,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("request rejected: {0}")]
    Rejected(String),
}

/// Settings applied to every node connection.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ValkeyClientConfig {
    pub connect_timeout: Duration,
    pub command_timeout: Duration,
    pub password: Option<String>,
}

impl Default for ValkeyClientConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            command_timeout: Duration::from_secs(30),
            password: None,
        }
    }
}

impl ValkeyClientConfig {
    pub fn with_password(mut self, password: Option<String>) -> Self {
        self.password = password;
        self
    }

    pub fn with_timeouts(mut self, connect: Duration, command: Duration) -> Self {
        self.connect_timeout = connect;
        self.command_timeout = command;
        self
    }

    fn fred_config(&self, address: &Address) -> Config {
        Config {
            server: ServerConfig::Centralized {
                server: Server::new(address.host.as_str(), address.port),
            },
            password: self.password.clone(),
            ..Default::default()
        }
    }
}

/// An open connection to one node.
pub struct ValkeyClient {
    client: Client,
    address: Address,
}

impl ValkeyClient {
    #[instrument(skip_all, fields(node = %address))]
    pub async fn connect(address: &Address, config: &ValkeyClientConfig) -> Result<Self, ValkeyError> {
        let command_timeout = config.command_timeout;
        let client = Builder::from_config(config.fred_config(address))
            .with_performance_config(|perf| perf.default_command_timeout = command_timeout)
            .with_connection_config(|conn| conn.connection_timeout = config.connect_timeout)
            .build()?;

        match timeout(config.connect_timeout, client.init()).await {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => return Err(ValkeyError::Connection(format!("{address}: {e}"))),
            Err(_) => {
                return Err(ValkeyError::Timeout {
                    operation: format!("connect to {address}"),
                    duration: config.connect_timeout,
                });
            }
        }
        debug!("connected");

        Ok(Self {
            client,
            address: address.clone(),
        })
    }

    pub fn address(&self) -> &Address {
        &self.address
    }

    pub async fn quit(&self) -> Result<(), ValkeyError> {
        Ok(self.client.quit().await?)
    }

    #[instrument(skip(self), fields(node = %self.address))]
    pub async fn replication_info(&self) -> Result<String, ValkeyError> {
        Ok(self.client.info(Some(InfoKind::Replication)).await?)
    }

    #[instrument(skip(self), fields(node = %self.address))]
    pub async fn cluster_info(&self) -> Result<String, ValkeyError> {
        Ok(self.client.cluster_info().await?)
    }

    #[instrument(skip(self), fields(node = %self.address))]
    pub async fn cluster_nodes(&self) -> Result<String, ValkeyError> {
        Ok(self.client.cluster_nodes().await?)
    }

    /// `CLUSTER REPLICATE master_id` on this node.
    #[instrument(skip(self), fields(node = %self.address))]
    pub async fn replicate(&self, master_id: &str) -> Result<(), ValkeyError> {
        Ok(self.client.cluster_replicate(master_id).await?)
    }

    /// `CLUSTER FAILOVER` on this replica.
    #[instrument(skip(self), fields(node = %self.address))]
    pub async fn failover(&self) -> Result<(), ValkeyError> {
        Ok(self.client.cluster_failover(None).await?)
    }

    /// `CLUSTER ADDSLOTS` for every slot of `range`.
    #[instrument(skip(self), fields(node = %self.address, range = %range))]
    pub async fn add_slots(&self, range: SlotRange) -> Result<(), ValkeyError> {
        let slots: Vec<u16> = range.iter().collect();
        Ok(self.client.cluster_add_slots(slots).await?)
    }

    /// `CLUSTER SETSLOT slot IMPORTING source_id`.
    ///
    /// fred's own `ClusterSetSlotState::Importing` carries no node id, so the
    /// command is sent verbatim.
    pub async fn set_slot_importing(&self, slot: u16, source_id: &str) -> Result<(), ValkeyError> {
        self.set_slot_raw(slot, "IMPORTING", source_id).await
    }

    /// `CLUSTER SETSLOT slot MIGRATING destination_id`.
    pub async fn set_slot_migrating(
        &self,
        slot: u16,
        destination_id: &str,
    ) -> Result<(), ValkeyError> {
        self.set_slot_raw(slot, "MIGRATING", destination_id).await
    }

    /// `CLUSTER SETSLOT slot NODE node_id`.
    pub async fn set_slot_owner(&self, slot: u16, node_id: &str) -> Result<(), ValkeyError> {
        Ok(self
            .client
            .cluster_setslot(slot, ClusterSetSlotState::Node(node_id.to_string()))
            .await?)
    }

    async fn set_slot_raw(&self, slot: u16, state: &str, node_id: &str) -> Result<(), ValkeyError> {
        let command = CustomCommand::new_static("CLUSTER", ClusterHash::Random, false);
        let args = vec![
            "SETSLOT".to_string(),
            slot.to_string(),
            state.to_string(),
            node_id.to_string(),
        ];
        let _: Value = self.client.custom(command, args).await?;
        Ok(())
    }

    /// Up to `count` keys stored in `slot`.
    pub async fn keys_in_slot(&self, slot: u16, count: u64) -> Result<Vec<String>, ValkeyError> {
        Ok(self.client.cluster_get_keys_in_slot(slot, count).await?)
    }

    /// `MIGRATE` `keys` to `destination`, replacing keys that already exist there.
    #[instrument(skip(self, keys, password), fields(node = %self.address, keys = keys.len()))]
    pub async fn migrate_keys(
        &self,
        destination: &Address,
        keys: &[String],
        password: Option<&str>,
        timeout: Duration,
    ) -> Result<(), ValkeyError> {
        if keys.is_empty() {
            return Ok(());
        }
        let command = CustomCommand::new_static("MIGRATE", ClusterHash::Random, false);
        let args = migrate_args(destination, keys, password, timeout);
        let _: Value = self.client.custom(command, args).await?;
        Ok(())
    }
}

fn migrate_args(
    destination: &Address,
    keys: &[String],
    password: Option<&str>,
    timeout: Duration,
) -> Vec<String> {
    let millis = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
    let mut args = vec![
        destination.host.clone(),
        destination.port.to_string(),
        String::new(),
        "0".to_string(),
        millis.to_string(),
        "REPLACE".to_string(),
    ];
    if let Some(password) = password {
        args.extend(["AUTH".to_string(), password.to_string()]);
    }
    args.push("KEYS".to_string());
    args.extend(keys.iter().cloned());
    args
}
