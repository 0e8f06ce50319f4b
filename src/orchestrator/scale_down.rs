//! Shrinking the cluster so the StatefulSet can drop its highest ordinals.
//!
//! Pods at ordinals at or above the desired total are about to disappear.
//! Scale-down first removes whole shards and moves masters out of that
//! danger zone. Surplus replicas there go next. Masters and replicas inside
//! the window are then realigned onto their shard blocks before the zone is
//! emptied and the slots settle onto the even distribution.

use tracing::{info, instrument, warn};

use crate::client::{ClusterMutator, PeerQuery, RebalanceOptions};
use crate::topology::{Address, ClusterNode};

use super::error::{Error, Result};
use super::pods::PodStatusSource;
use super::Orchestrator;

/// Whether `node` sits at or above the desired total and disappears with
/// the scale-down.
fn outside_window(node: &ClusterNode, total: u32) -> bool {
    node.ordinal().is_some_and(|ordinal| ordinal >= total)
}

impl<D, P> Orchestrator<D, P>
where
    D: PeerQuery + ClusterMutator + Sync,
    P: PodStatusSource + Sync,
{
    #[instrument(skip(self), fields(masters = self.config.desired.masters, replicas_per_master = self.config.desired.replicas_per_master))]
    pub async fn scale_down(&self) -> Result<()> {
        self.ensure_tooling().await?;

        let seed = self.seed();
        let desired = self.desired_topology();
        let current = self.fetch_topology(&seed).await?;
        self.check_health(&current).await?;

        if current.is_same_shape(&desired) {
            info!("Cluster already has the desired shape");
            return Ok(());
        }
        let desired_masters = self.config.desired.masters as usize;
        if desired_masters > current.master_count() {
            return Err(Error::logic(format!(
                "{} masters requested but the cluster only has {}; use scale-up",
                desired_masters,
                current.master_count()
            )));
        }

        self.remove_shards().await?;
        self.make_room_for_masters().await?;
        self.remove_replicas_from_masters().await?;
        self.move_masters_to_safe_spots().await?;
        self.align_replicas().await?;
        self.remove_danger_zone_nodes().await?;
        self.settle_slots().await?;

        let settled = self.fetch_topology(&seed).await?;
        self.log_plan(&settled);
        info!(
            masters = settled.master_count(),
            replicas = settled.replica_count(),
            desired_shape = settled.is_same_shape(&desired),
            "Scale-down complete"
        );
        Ok(())
    }

    /// Remove surplus shards, least safe first.
    async fn remove_shards(&self) -> Result<()> {
        let topology = self.fetch_topology(&self.seed()).await?;
        let shards = topology.shards();
        let excess = shards
            .len()
            .saturating_sub(self.config.desired.masters as usize);

        for shard in shards.iter().rev().take(excess) {
            info!(shard = shard.index, master_id = %shard.master_id, "Removing shard");
            self.remove_shard(&shard.master_id).await?;
        }
        Ok(())
    }

    /// Delete a shard's replicas, drain its master and delete the master.
    async fn remove_shard(&self, master_id: &str) -> Result<()> {
        let seed = self.seed();
        let topology = self.fetch_topology(&seed).await?;

        let replicas: Vec<(String, Option<Address>)> = topology
            .replicas_of(master_id)
            .into_iter()
            .map(|r| (r.id.clone(), r.address.clone()))
            .collect();
        for (replica_id, address) in &replicas {
            self.delete_node(replica_id, address.as_ref()).await?;
        }

        let topology = self.fetch_topology(&seed).await?;
        let others: Vec<&str> = topology
            .masters()
            .filter(|m| m.id != master_id)
            .map(|m| m.id.as_str())
            .collect();
        if others.is_empty() {
            return Err(Error::logic(format!(
                "cannot drain {master_id}: no other master would receive its slots"
            )));
        }
        let master_address = topology.node(master_id).and_then(|m| m.address.clone());

        if topology.node(master_id).is_some_and(|m| m.slot_count() > 0) {
            info!(master_id, "Draining slots");
            self.driver
                .rebalance(&seed, &RebalanceOptions::drain(master_id, others))
                .await
                .map_err(|e| Error::driver("rebalance", &seed, e))?;
            self.wait_for_drained(topology.addresses(), master_id).await?;
        }

        self.delete_node(master_id, master_address.as_ref()).await
    }

    /// Move every master outside the window onto its layout ordinal, then
    /// delete the demoted node.
    async fn make_room_for_masters(&self) -> Result<()> {
        let total = self.config.desired_total();
        for placement in self.shard_placements().await? {
            if placement.ordinal < total {
                continue;
            }
            let old_address = self.config.naming.address(placement.ordinal);
            self.promote_onto(&placement).await?;
            self.delete_node(&placement.master_id, Some(&old_address))
                .await?;
        }
        Ok(())
    }

    /// Delete replicas beyond the requested count, highest ordinals first.
    ///
    /// Only replicas outside the window are deleted; surplus replicas inside
    /// it are re-pointed to the shard that owns their ordinal later.
    async fn remove_replicas_from_masters(&self) -> Result<()> {
        let total = self.config.desired_total();
        let wanted = self.config.desired.replicas_per_master as usize;
        let topology = self.fetch_topology(&self.seed()).await?;

        let mut surplus: Vec<(String, Option<Address>)> = Vec::new();
        for master in topology.masters() {
            let replicas = topology.replicas_of(&master.id);
            let excess = replicas.len().saturating_sub(wanted);
            // replicas_of sorts by ascending ordinal
            surplus.extend(
                replicas
                    .iter()
                    .rev()
                    .filter(|r| outside_window(r, total))
                    .take(excess)
                    .map(|r| (r.id.clone(), r.address.clone())),
            );
        }

        for (replica_id, address) in surplus {
            self.delete_node(&replica_id, address.as_ref()).await?;
        }
        Ok(())
    }

    /// Fail over masters inside the window that sit off their layout
    /// ordinal; the demoted node stays as a replica.
    async fn move_masters_to_safe_spots(&self) -> Result<()> {
        let total = self.config.desired_total();
        for placement in self.shard_placements().await? {
            if !placement.is_in_place() && placement.ordinal < total {
                self.promote_onto(&placement).await?;
            }
        }
        Ok(())
    }

    /// Delete every node at or above the desired total.
    async fn remove_danger_zone_nodes(&self) -> Result<()> {
        let total = self.config.desired_total();
        let topology = self.fetch_topology(&self.seed()).await?;

        let mut doomed: Vec<&ClusterNode> = Vec::new();
        for node in topology.nodes() {
            match node.ordinal() {
                None => warn!(node = %node.label(), "Node has no ordinal, leaving it in place"),
                Some(_) if !outside_window(node, total) => {}
                Some(_) if node.is_master() && node.slot_count() > 0 => {
                    return Err(Error::logic(format!(
                        "master {} outside the kept ordinals still owns {} slots",
                        node.label(),
                        node.slot_count()
                    )));
                }
                Some(_) => doomed.push(node),
            }
        }
        doomed.sort_by_key(|n| std::cmp::Reverse(n.ordinal()));

        for node in doomed {
            self.delete_node(&node.id, node.address.as_ref()).await?;
        }
        Ok(())
    }
}
