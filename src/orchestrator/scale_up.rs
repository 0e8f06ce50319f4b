//! Growing the cluster: new masters first, then replicas, then slots.
//!
//! Masters that end up off their shard's first ordinal are failed over onto
//! it before replicas are added, so every shard keeps its ordinal block.

use tracing::{info, instrument};

use crate::client::{ClusterMutator, PeerQuery, RebalanceOptions};
use crate::topology::ClusterTopology;

use super::error::{Error, Result};
use super::pods::PodStatusSource;
use super::Orchestrator;

/// Lowest ordinal below `total` that is not a member of `topology`.
fn lowest_free_ordinal(topology: &ClusterTopology, total: u32) -> Option<u32> {
    let used = topology.ordinals();
    (0..total).find(|ordinal| !used.contains(ordinal))
}

impl<D, P> Orchestrator<D, P>
where
    D: PeerQuery + ClusterMutator + Sync,
    P: PodStatusSource + Sync,
{
    #[instrument(skip(self), fields(masters = self.config.desired.masters, replicas_per_master = self.config.desired.replicas_per_master))]
    pub async fn scale_up(&self) -> Result<()> {
        self.ensure_tooling().await?;
        self.wait_for_pods(self.config.desired_total()).await?;

        let seed = self.seed();
        let current = self.fetch_topology(&seed).await?;
        if current.is_same_shape(&self.desired_topology()) {
            info!("Cluster already has the desired shape");
            return Ok(());
        }

        let desired_masters = self.config.desired.masters as usize;
        if current.master_count() > desired_masters {
            return Err(Error::logic(format!(
                "cluster has {} masters, more than the {} requested; use scale-down",
                current.master_count(),
                desired_masters
            )));
        }
        let wanted = self.config.desired.replicas_per_master as usize;
        for master in current.masters() {
            let have = current.replicas_of(&master.id).len();
            if have > wanted {
                return Err(Error::logic(format!(
                    "master {} has {have} replicas, more than the {wanted} requested",
                    master.label()
                )));
            }
        }

        self.add_masters().await?;
        self.place_masters().await?;
        self.add_replicas().await?;
        self.align_replicas().await?;
        self.finalize_scale_up().await
    }

    /// Join empty masters one at a time until the master count is reached.
    async fn add_masters(&self) -> Result<()> {
        let seed = self.seed();
        let total = self.config.desired_total();
        let mut topology = self.fetch_topology(&seed).await?;

        while topology.master_count() < self.config.desired.masters as usize {
            let shard = u32::try_from(topology.master_count()).unwrap_or(u32::MAX);
            let layout_ordinal = shard.saturating_mul(self.config.block());
            let ordinal = if layout_ordinal < total && topology.node_by_ordinal(layout_ordinal).is_none() {
                layout_ordinal
            } else {
                lowest_free_ordinal(&topology, total).ok_or_else(|| {
                    Error::logic("no free pod left for a new master")
                })?
            };

            let new_node = self.config.naming.address(ordinal);
            self.join(&new_node, &topology).await?;
            info!(node = %new_node, ordinal, "Master added");
            topology = self.fetch_topology(&seed).await?;
        }
        Ok(())
    }

    /// Give every master its full set of replicas, filling the shard's own
    /// ordinals first.
    async fn add_replicas(&self) -> Result<()> {
        let seed = self.seed();
        let total = self.config.desired_total();
        let replicas_per_master = self.config.desired.replicas_per_master;
        let wanted = replicas_per_master as usize;
        let mut topology = self.fetch_topology(&seed).await?;

        for placement in self.shard_placements().await? {
            let master_id = placement.master_id.as_str();
            while topology.replicas_of(master_id).len() < wanted {
                let own = placement
                    .replica_ordinals(replicas_per_master)
                    .find(|ordinal| topology.node_by_ordinal(*ordinal).is_none());
                let ordinal = own
                    .or_else(|| lowest_free_ordinal(&topology, total))
                    .ok_or_else(|| {
                        Error::logic(format!("no free pod left for a replica of {master_id}"))
                    })?;
                let new_node = self.config.naming.address(ordinal);
                self.join(&new_node, &topology).await?;
                self.follow(&new_node, master_id).await?;
                info!(node = %new_node, master_id, "Replica added");
                topology = self.fetch_topology(&seed).await?;
            }
        }
        Ok(())
    }

    /// Spread slots over every master, settle them onto the even
    /// distribution and wait for the cluster to converge.
    async fn finalize_scale_up(&self) -> Result<()> {
        let seed = self.seed();
        let topology = self.fetch_topology(&seed).await?;
        self.check_health(&topology).await?;

        info!(masters = topology.master_count(), "Rebalancing slots");
        self.driver
            .rebalance(&seed, &RebalanceOptions::spread())
            .await
            .map_err(|e| Error::driver("rebalance", &seed, e))?;

        let expected = u32::try_from(topology.len()).unwrap_or(u32::MAX);
        self.wait_for_cluster_ok(topology.addresses(), expected).await?;
        self.settle_slots().await?;

        let settled = self.fetch_topology(&seed).await?;
        self.log_plan(&settled);
        info!(
            masters = settled.master_count(),
            replicas = settled.replica_count(),
            desired_shape = settled.is_same_shape(&self.desired_topology()),
            "Scale-up complete"
        );
        Ok(())
    }
}
