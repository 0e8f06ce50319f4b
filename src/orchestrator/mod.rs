//! Scaling orchestration.
//!
//! [`Orchestrator`] drives `init`, `scale-up` and `scale-down` against a
//! cluster through the driver traits. Every mutation is issued on its own and
//! followed by a bounded convergence wait; topology snapshots are re-fetched
//! after each step rather than patched in place.
//!
//! ## Module Structure
//!
//! - [`error`]: command-level error and its classification
//! - [`wait`]: bounded, fan-out convergence polling
//! - [`pods`]: StatefulSet readiness
//! - [`layout`]: shard placement, replica alignment and slot settling
//! - `init`, `scale_up`, `scale_down`: the three commands

pub mod error;
mod init;
pub mod layout;
pub mod pods;
mod scale_down;
mod scale_up;
pub mod wait;

pub use error::{Error, Result};
pub use layout::{ShardPlacement, place_shards};
pub use pods::{KubeStatefulSetSource, PodStatusSource, StatefulSetStatus};
pub use wait::WaitOptions;

use tracing::{debug, info, warn};

use crate::client::{ClusterInfo, ClusterMutator, PeerQuery, ReplicationInfo};
use crate::config::{ClusterConfig, DesiredState};
use crate::slots::{ReconcilePlan, calculate_slots_to_reconcile, verify_in_flight_migrations};
use crate::topology::{Address, ClusterTopology, PodNaming, parse_cluster_topology};

use wait::{wait_for_all, wait_until};

/// Inputs shared by every command.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub desired: DesiredState,
    pub naming: PodNaming,
    pub wait: WaitOptions,
}

impl OrchestratorConfig {
    pub fn new(desired: DesiredState, naming: PodNaming) -> Self {
        Self {
            desired,
            naming,
            wait: WaitOptions::default(),
        }
    }

    pub fn with_wait(mut self, wait: WaitOptions) -> Self {
        self.wait = wait;
        self
    }

    /// Number of pods in the desired cluster; ordinals below it are safe.
    pub fn desired_total(&self) -> u32 {
        self.desired.total_nodes()
    }

    /// Pods per shard.
    pub fn block(&self) -> u32 {
        self.desired.block()
    }
}

impl From<&ClusterConfig> for OrchestratorConfig {
    fn from(config: &ClusterConfig) -> Self {
        Self::new(config.desired.clone(), config.naming.clone())
            .with_wait(WaitOptions::default().with_timeout(config.convergence_timeout))
    }
}

/// Addressable members left once `node_id` is gone, and the known-node count
/// they should converge on. Members without an address still count.
fn survivors_of(topology: &ClusterTopology, node_id: &str) -> (Vec<Address>, u32) {
    let remaining = topology.nodes().filter(|n| n.id != node_id).count();
    let survivors = topology
        .nodes()
        .filter(|n| n.id != node_id)
        .filter_map(|n| n.address.clone())
        .collect();
    (survivors, u32::try_from(remaining).unwrap_or(u32::MAX))
}

/// Runs cluster commands through a driver `D` and a pod status source `P`.
pub struct Orchestrator<D, P> {
    driver: D,
    pods: P,
    config: OrchestratorConfig,
}

impl<D, P> Orchestrator<D, P>
where
    D: PeerQuery + ClusterMutator + Sync,
    P: PodStatusSource + Sync,
{
    pub fn new(driver: D, pods: P, config: OrchestratorConfig) -> Self {
        Self {
            driver,
            pods,
            config,
        }
    }

    pub fn driver(&self) -> &D {
        &self.driver
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Node every cluster-wide query and membership change goes through.
    pub fn seed(&self) -> Address {
        self.config.naming.address(0)
    }

    /// The analytic topology the commands converge on.
    pub fn desired_topology(&self) -> ClusterTopology {
        ClusterTopology::desired(
            self.config.desired.masters,
            self.config.desired.replicas_per_master,
            &self.config.naming,
        )
    }

    /// Slot work still needed to reach the desired distribution.
    pub async fn plan(&self) -> Result<ReconcilePlan> {
        let current = self.fetch_topology(&self.seed()).await?;
        verify_in_flight_migrations(&current)?;
        Ok(calculate_slots_to_reconcile(
            &current,
            &self.desired_topology(),
        )?)
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    /// The cluster as `via` sees it.
    pub async fn fetch_topology(&self, via: &Address) -> Result<ClusterTopology> {
        let raw = self
            .driver
            .cluster_nodes(via)
            .await
            .map_err(|e| Error::driver("CLUSTER NODES", via, e))?;
        Ok(parse_cluster_topology(&raw))
    }

    pub async fn cluster_info(&self, node: &Address) -> Result<ClusterInfo> {
        let raw = self
            .driver
            .cluster_info(node)
            .await
            .map_err(|e| Error::driver("CLUSTER INFO", node, e))?;
        ClusterInfo::parse(&raw).map_err(|e| Error::driver("CLUSTER INFO", node, e.into()))
    }

    pub async fn replication_info(&self, node: &Address) -> Result<ReplicationInfo> {
        let raw = self
            .driver
            .replication_info(node)
            .await
            .map_err(|e| Error::driver("INFO replication", node, e))?;
        Ok(ReplicationInfo::parse(&raw))
    }

    /// Refuse to touch a cluster that reports problems.
    pub async fn check_health(&self, topology: &ClusterTopology) -> Result<()> {
        let issues = topology.health_issues();
        if !issues.is_empty() {
            let listed: Vec<String> = issues.iter().map(ToString::to_string).collect();
            return Err(Error::Unhealthy(listed.join("; ")));
        }

        let seed = self.seed();
        let info = self.cluster_info(&seed).await?;
        if !info.is_healthy() {
            return Err(Error::Unhealthy(format!(
                "{seed} reports cluster_state {}, {} slots assigned, {} failing",
                info.state,
                info.slots_assigned,
                info.slots_fail + info.slots_pfail
            )));
        }
        Ok(())
    }

    async fn ensure_tooling(&self) -> Result<()> {
        self.driver
            .ensure_available()
            .await
            .map_err(|e| Error::driver("cluster manager check", &self.seed(), e))
    }

    // ------------------------------------------------------------------
    // Convergence waits
    // ------------------------------------------------------------------

    async fn wait_for_pods(&self, expected: u32) -> Result<()> {
        info!(expected, "Waiting for pods to be ready");
        wait_until("pods ready", &self.config.wait, || async move {
            let status = self.pods.statefulset_status().await?;
            debug!(ready = status.ready, desired = status.desired, "pod readiness");
            Ok(status.is_stable_at(expected))
        })
        .await
    }

    /// Every node in `members` reports `expected` known nodes.
    async fn wait_for_known_nodes(&self, members: Vec<Address>, expected: u32) -> Result<()> {
        wait_for_all("known node count", members, &self.config.wait, |node| async move {
            Ok(self.cluster_info(&node).await?.known_nodes == expected)
        })
        .await
    }

    /// Every node in `members` reports `cluster_state:ok` and `expected` known nodes.
    async fn wait_for_cluster_ok(&self, members: Vec<Address>, expected: u32) -> Result<()> {
        wait_for_all("cluster state ok", members, &self.config.wait, |node| async move {
            let info = self.cluster_info(&node).await?;
            Ok(info.is_healthy() && info.known_nodes == expected)
        })
        .await
    }

    /// Every node in `members` lists `target` in its gossip table.
    async fn wait_for_node_visible(&self, members: Vec<Address>, target: &Address) -> Result<()> {
        wait_for_all("new node visible", members, &self.config.wait, |node| async move {
            Ok(self
                .fetch_topology(&node)
                .await?
                .node_by_address(target)
                .is_some())
        })
        .await
    }

    /// Every node in `members` sees the node at `replica` following `master_id`.
    async fn wait_for_replica_relation(
        &self,
        members: Vec<Address>,
        replica: &Address,
        master_id: &str,
    ) -> Result<()> {
        wait_for_all("replica relation", members, &self.config.wait, |node| async move {
            Ok(self
                .fetch_topology(&node)
                .await?
                .node_by_address(replica)
                .and_then(|n| n.master_id())
                == Some(master_id))
        })
        .await
    }

    /// Every node in `members` sees `master_id` as a master without slots.
    async fn wait_for_drained(&self, members: Vec<Address>, master_id: &str) -> Result<()> {
        wait_for_all("master drained", members, &self.config.wait, |node| async move {
            Ok(self
                .fetch_topology(&node)
                .await?
                .node(master_id)
                .is_some_and(|m| m.is_master() && m.slot_count() == 0))
        })
        .await
    }

    // ------------------------------------------------------------------
    // Shared mutations
    // ------------------------------------------------------------------

    /// Fail if `node` already belongs to a cluster of more than itself.
    async fn ensure_not_member(&self, node: &Address) -> Result<()> {
        let info = self.cluster_info(node).await?;
        if info.known_nodes > 1 {
            return Err(Error::logic(format!(
                "{node} already knows {} nodes and cannot be added again",
                info.known_nodes
            )));
        }
        Ok(())
    }

    /// Add `new_node` as an empty master and wait until every member sees it.
    async fn join(&self, new_node: &Address, topology: &ClusterTopology) -> Result<()> {
        let seed = self.seed();
        self.ensure_not_member(new_node).await?;
        self.driver
            .add_node(new_node, &seed)
            .await
            .map_err(|e| Error::driver("add-node", new_node, e))?;
        self.wait_for_node_visible(topology.addresses(), new_node)
            .await
    }

    /// Wait until `node` has learned about `master_id` through gossip.
    async fn wait_for_master_known(&self, node: &Address, master_id: &str) -> Result<()> {
        wait_until("master known to node", &self.config.wait, || async move {
            Ok(self.fetch_topology(node).await?.node(master_id).is_some())
        })
        .await
    }

    /// Remove `node_id` through the seed and wait for the survivors to forget it.
    async fn delete_node(&self, node_id: &str, address: Option<&Address>) -> Result<()> {
        let seed = self.seed();
        let topology = self.fetch_topology(&seed).await?;
        let (survivors, expected) = survivors_of(&topology, node_id);

        info!(
            node_id,
            node = ?address,
            "Removing node from cluster"
        );
        self.driver
            .del_node(&seed, node_id)
            .await
            .map_err(|e| Error::driver("del-node", &seed, e))?;
        self.wait_for_known_nodes(survivors, expected).await
    }

    /// Promote the replica at `candidate` over the master `old_master_id`.
    ///
    /// Returns once `INFO replication` on both sides agrees on the new roles
    /// and every member sees the old master following the new one.
    async fn failover_to(&self, old_master_id: &str, candidate: &Address) -> Result<()> {
        let seed = self.seed();
        let topology = self.fetch_topology(&seed).await?;
        let old_address = topology
            .node(old_master_id)
            .and_then(|n| n.address.clone())
            .ok_or_else(|| Error::logic(format!("master {old_master_id} has no address")))?;
        let new_id = topology
            .node_by_address(candidate)
            .map(|n| n.id.clone())
            .ok_or_else(|| Error::logic(format!("{candidate} is not a cluster member")))?;

        info!(from = %old_address, to = %candidate, "Failing over master");
        self.driver
            .failover(candidate)
            .await
            .map_err(|e| Error::driver("failover", candidate, e))?;

        let old = &old_address;
        let new_id = new_id.as_str();
        wait_until("failover roles", &self.config.wait, || async move {
            if !self.replication_info(candidate).await?.is_master() {
                return Ok(false);
            }
            let demoted = self.replication_info(old).await?;
            if demoted.is_replica_of(candidate) {
                debug!(
                    lag = ?demoted.replication_lag(),
                    link = ?demoted.master_link_status,
                    "old master follows the promoted replica"
                );
                return Ok(true);
            }
            Ok(self
                .fetch_topology(old)
                .await?
                .node_by_address(old)
                .and_then(|n| n.master_id())
                == Some(new_id))
        })
        .await?;

        self.wait_for_replica_relation(topology.addresses(), old, new_id)
            .await
    }

    /// Log how far the slot layout is from the desired distribution.
    fn log_plan(&self, current: &ClusterTopology) {
        match calculate_slots_to_reconcile(current, &self.desired_topology()) {
            Ok(plan) => info!(
                slots_to_add = plan.slots_to_add(),
                slots_to_migrate = plan.slots_to_migrate(),
                "Slot distribution against desired layout"
            ),
            Err(e) => warn!(error = %e, "Could not compare slot distribution"),
        }
    }
}
