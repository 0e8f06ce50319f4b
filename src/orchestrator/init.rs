//! Cluster creation.

use tracing::{info, instrument};

use crate::client::{ClusterMutator, ClusterState, PeerQuery};
use crate::topology::Address;

use super::error::{Error, Result};
use super::pods::PodStatusSource;
use super::Orchestrator;

/// Order `addresses` so that a cluster manager which takes the first
/// `masters` nodes as masters and hands out the rest round-robin reproduces
/// the shard-contiguous layout.
///
/// Masters come first (ordinal `k * block` for shard `k`), followed by the
/// replicas grouped by their position within the shard.
pub fn creation_order(addresses: &[Address], masters: u32, replicas_per_master: u32) -> Vec<Address> {
    let block = replicas_per_master.saturating_add(1);
    let at = |ordinal: u32| addresses.get(ordinal as usize).cloned();

    let mut ordered: Vec<Address> = (0..masters).filter_map(|k| at(k * block)).collect();
    for offset in 1..=replicas_per_master {
        ordered.extend((0..masters).filter_map(|k| at(k * block + offset)));
    }
    ordered
}

impl<D, P> Orchestrator<D, P>
where
    D: PeerQuery + ClusterMutator + Sync,
    P: PodStatusSource + Sync,
{
    /// Create the cluster from scratch.
    ///
    /// Skipped whenever the seed already reports `cluster_state:ok`, whatever
    /// its size; resizing is left to scale-up and scale-down.
    #[instrument(skip(self), fields(masters = self.config.desired.masters, replicas_per_master = self.config.desired.replicas_per_master))]
    pub async fn init(&self) -> Result<()> {
        self.ensure_tooling().await?;

        let desired = &self.config.desired;
        let total = self.config.desired_total();
        self.wait_for_pods(total).await?;

        let seed = self.seed();
        let info = self.cluster_info(&seed).await?;
        if info.state == ClusterState::Ok {
            info!(
                known_nodes = info.known_nodes,
                expected = total,
                "Cluster already initialized"
            );
            return Ok(());
        }

        let addresses = self.config.naming.addresses(total);
        let ordered = creation_order(&addresses, desired.masters, desired.replicas_per_master);
        info!(nodes = ordered.len(), "Creating cluster");
        self.driver
            .create_cluster(&ordered, desired.replicas_per_master)
            .await
            .map_err(|e| Error::driver("create", &seed, e))?;

        self.wait_for_cluster_ok(addresses, total).await?;
        // The cluster manager may hand replicas to masters round-robin in a
        // different order.
        self.align_replicas().await?;

        info!("Cluster initialized");
        Ok(())
    }
}
