//! The query and mutation surface the orchestrator drives.
//!
//! Both traits take node addresses, never live connections, so the
//! orchestrator can run against [`ValkeyDriver`] in production and against an
//! in-memory cluster in tests.

use std::future::Future;

use tracing::{debug, info, instrument};

use crate::slots::SlotRange;
use crate::topology::Address;

use super::cli::{RebalanceOptions, ValkeyCli};
use super::valkey_client::{ValkeyClient, ValkeyClientConfig, ValkeyError};

/// Keys fetched per `CLUSTER GETKEYSINSLOT` round while moving a slot.
const KEYS_PER_BATCH: u64 = 100;

/// A contiguous slot range moving from one master to another.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotMove {
    pub range: SlotRange,
    pub source: Address,
    pub source_id: String,
    pub destination: Address,
    pub destination_id: String,
}

/// Read-only queries against a single node.
pub trait PeerQuery {
    /// Raw `CLUSTER NODES` as seen by `node`.
    fn cluster_nodes(
        &self,
        node: &Address,
    ) -> impl Future<Output = Result<String, ValkeyError>> + Send;

    /// Raw `CLUSTER INFO` as seen by `node`.
    fn cluster_info(
        &self,
        node: &Address,
    ) -> impl Future<Output = Result<String, ValkeyError>> + Send;

    /// Raw `INFO replication` of `node`.
    fn replication_info(
        &self,
        node: &Address,
    ) -> impl Future<Output = Result<String, ValkeyError>> + Send;
}

/// Structural changes to the cluster. Every call blocks until the command
/// returns; convergence across the cluster is the caller's concern.
pub trait ClusterMutator {
    /// Fail early when the tooling behind the mutations is missing.
    fn ensure_available(&self) -> impl Future<Output = Result<(), ValkeyError>> + Send;

    /// Create a cluster. The first `len / (replicas_per_master + 1)` nodes
    /// become masters.
    fn create_cluster(
        &self,
        nodes: &[Address],
        replicas_per_master: u32,
    ) -> impl Future<Output = Result<(), ValkeyError>> + Send;

    /// Join `new_node` to the cluster `via` belongs to, as an empty master.
    fn add_node(
        &self,
        new_node: &Address,
        via: &Address,
    ) -> impl Future<Output = Result<(), ValkeyError>> + Send;

    /// Remove `node_id` from the cluster `via` belongs to.
    fn del_node(
        &self,
        via: &Address,
        node_id: &str,
    ) -> impl Future<Output = Result<(), ValkeyError>> + Send;

    /// Move slots between masters according to `options`.
    fn rebalance(
        &self,
        via: &Address,
        options: &RebalanceOptions,
    ) -> impl Future<Output = Result<(), ValkeyError>> + Send;

    /// Make `replica` follow `master_id`.
    fn replicate(
        &self,
        replica: &Address,
        master_id: &str,
    ) -> impl Future<Output = Result<(), ValkeyError>> + Send;

    /// Promote `replica` over its current master.
    fn failover(&self, replica: &Address) -> impl Future<Output = Result<(), ValkeyError>> + Send;

    /// Move every slot of `slot_move.range`, keys included, to the destination.
    fn migrate_slots(
        &self,
        slot_move: &SlotMove,
    ) -> impl Future<Output = Result<(), ValkeyError>> + Send;

    /// Assign the unowned slots of `range` to the master at `node`.
    fn add_slots(
        &self,
        node: &Address,
        range: SlotRange,
    ) -> impl Future<Output = Result<(), ValkeyError>> + Send;
}

/// Production driver: fred for per-node commands, `valkey-cli` for membership.
#[derive(Debug, Clone)]
pub struct ValkeyDriver {
    cli: ValkeyCli,
    client_config: ValkeyClientConfig,
}

impl ValkeyDriver {
    pub fn new(cli: ValkeyCli, client_config: ValkeyClientConfig) -> Self {
        Self { cli, client_config }
    }

    async fn connect(&self, node: &Address) -> Result<ValkeyClient, ValkeyError> {
        ValkeyClient::connect(node, &self.client_config).await
    }

    /// IMPORTING on the destination, MIGRATING on the source, keys in
    /// batches, then ownership on both sides.
    async fn move_slot(
        &self,
        source: &ValkeyClient,
        destination: &ValkeyClient,
        slot_move: &SlotMove,
        slot: u16,
    ) -> Result<(), ValkeyError> {
        destination
            .set_slot_importing(slot, &slot_move.source_id)
            .await?;
        source
            .set_slot_migrating(slot, &slot_move.destination_id)
            .await?;

        let mut moved = 0usize;
        loop {
            let keys = source.keys_in_slot(slot, KEYS_PER_BATCH).await?;
            if keys.is_empty() {
                break;
            }
            source
                .migrate_keys(
                    &slot_move.destination,
                    &keys,
                    self.client_config.password.as_deref(),
                    self.client_config.command_timeout,
                )
                .await?;
            moved += keys.len();
        }
        if moved > 0 {
            debug!(slot, keys = moved, "slot keys migrated");
        }

        destination
            .set_slot_owner(slot, &slot_move.destination_id)
            .await?;
        source.set_slot_owner(slot, &slot_move.destination_id).await
    }
}

impl PeerQuery for ValkeyDriver {
    async fn cluster_nodes(&self, node: &Address) -> Result<String, ValkeyError> {
        let client = self.connect(node).await?;
        let nodes = client.cluster_nodes().await;
        let _ = client.quit().await;
        nodes
    }

    async fn cluster_info(&self, node: &Address) -> Result<String, ValkeyError> {
        let client = self.connect(node).await?;
        let info = client.cluster_info().await;
        let _ = client.quit().await;
        info
    }

    async fn replication_info(&self, node: &Address) -> Result<String, ValkeyError> {
        let client = self.connect(node).await?;
        let info = client.replication_info().await;
        let _ = client.quit().await;
        info
    }
}

impl ClusterMutator for ValkeyDriver {
    async fn ensure_available(&self) -> Result<(), ValkeyError> {
        self.cli.ensure_available().await
    }

    #[instrument(skip(self, nodes), fields(nodes = nodes.len()))]
    async fn create_cluster(
        &self,
        nodes: &[Address],
        replicas_per_master: u32,
    ) -> Result<(), ValkeyError> {
        let args = self.cli.create_args(nodes, replicas_per_master);
        self.cli.run("create", args).await?;
        info!("Cluster created");
        Ok(())
    }

    #[instrument(skip(self), fields(new_node = %new_node, via = %via))]
    async fn add_node(&self, new_node: &Address, via: &Address) -> Result<(), ValkeyError> {
        let args = self.cli.add_node_args(new_node, via);
        self.cli.run("add-node", args).await?;
        Ok(())
    }

    #[instrument(skip(self), fields(via = %via))]
    async fn del_node(&self, via: &Address, node_id: &str) -> Result<(), ValkeyError> {
        let args = self.cli.del_node_args(via, node_id);
        self.cli.run("del-node", args).await?;
        Ok(())
    }

    #[instrument(skip(self, options), fields(via = %via))]
    async fn rebalance(&self, via: &Address, options: &RebalanceOptions) -> Result<(), ValkeyError> {
        let args = self.cli.rebalance_args(via, options);
        self.cli.run("rebalance", args).await?;
        Ok(())
    }

    #[instrument(skip(self), fields(replica = %replica))]
    async fn replicate(&self, replica: &Address, master_id: &str) -> Result<(), ValkeyError> {
        let client = self.connect(replica).await?;
        let result = client.replicate(master_id).await;
        let _ = client.quit().await;
        result
    }

    #[instrument(skip(self), fields(replica = %replica))]
    async fn failover(&self, replica: &Address) -> Result<(), ValkeyError> {
        let client = self.connect(replica).await?;
        let result = client.failover().await;
        let _ = client.quit().await;
        result
    }

    #[instrument(skip(self, slot_move), fields(range = %slot_move.range, from = %slot_move.source, to = %slot_move.destination))]
    async fn migrate_slots(&self, slot_move: &SlotMove) -> Result<(), ValkeyError> {
        let source = self.connect(&slot_move.source).await?;
        let destination = match self.connect(&slot_move.destination).await {
            Ok(client) => client,
            Err(e) => {
                let _ = source.quit().await;
                return Err(e);
            }
        };

        let mut result = Ok(());
        for slot in slot_move.range.iter() {
            result = self.move_slot(&source, &destination, slot_move, slot).await;
            if result.is_err() {
                break;
            }
        }
        let _ = source.quit().await;
        let _ = destination.quit().await;
        result?;
        info!(slots = slot_move.range.count(), "Slots migrated");
        Ok(())
    }

    #[instrument(skip(self), fields(node = %node, range = %range))]
    async fn add_slots(&self, node: &Address, range: SlotRange) -> Result<(), ValkeyError> {
        let client = self.connect(node).await?;
        let result = client.add_slots(range).await;
        let _ = client.quit().await;
        result
    }
}
