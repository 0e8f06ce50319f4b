//! Keeping every shard on its block of ordinals.
//!
//! Shard `k` owns ordinals `k * block ..= k * block + replicas_per_master`,
//! master first. Live masters are mapped onto shards so that masters already
//! sitting on a shard's first ordinal keep it; the rest take the free shards
//! in ordinal order.

use std::collections::BTreeSet;

use tracing::{debug, info};

use crate::client::{ClusterMutator, PeerQuery, SlotMove};
use crate::slots::{calculate_slots_to_reconcile, verify_in_flight_migrations};
use crate::topology::{Address, ClusterTopology};

use super::error::{Error, Result};
use super::pods::PodStatusSource;
use super::Orchestrator;

/// A live master and the ordinal its shard's master belongs on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardPlacement {
    pub shard: u32,
    pub master_id: String,
    pub ordinal: u32,
    pub target: u32,
}

impl ShardPlacement {
    pub fn is_in_place(&self) -> bool {
        self.ordinal == self.target
    }

    /// Ordinals the shard's replicas belong on.
    pub fn replica_ordinals(&self, replicas_per_master: u32) -> impl Iterator<Item = u32> + use<> {
        let target = self.target;
        (1..=replicas_per_master).map(move |offset| target + offset)
    }
}

/// Map the masters of `topology` onto `masters` shards of `block` ordinals.
///
/// Fails when the master count differs or a master has no ordinal.
pub fn place_shards(
    topology: &ClusterTopology,
    masters: u32,
    block: u32,
) -> Result<Vec<ShardPlacement>> {
    if topology.master_count() != masters as usize {
        return Err(Error::logic(format!(
            "cannot lay out {} masters over {masters} shards",
            topology.master_count()
        )));
    }
    let total = masters.saturating_mul(block);

    let mut live: Vec<(u32, String)> = Vec::new();
    for master in topology.masters() {
        let ordinal = master.ordinal().ok_or_else(|| {
            Error::logic(format!("master {} has no ordinal", master.label()))
        })?;
        live.push((ordinal, master.id.clone()));
    }
    live.sort();

    let mut placements = Vec::new();
    let mut claimed = BTreeSet::new();
    let mut movers = Vec::new();
    for (ordinal, master_id) in live {
        if ordinal < total && ordinal % block == 0 {
            claimed.insert(ordinal / block);
            placements.push(ShardPlacement {
                shard: ordinal / block,
                master_id,
                ordinal,
                target: ordinal,
            });
        } else {
            movers.push((ordinal, master_id));
        }
    }

    let free = (0..masters).filter(|shard| !claimed.contains(shard));
    for (shard, (ordinal, master_id)) in free.zip(movers) {
        placements.push(ShardPlacement {
            shard,
            master_id,
            ordinal,
            target: shard * block,
        });
    }
    placements.sort_by_key(|p| p.shard);
    Ok(placements)
}

impl<D, P> Orchestrator<D, P>
where
    D: PeerQuery + ClusterMutator + Sync,
    P: PodStatusSource + Sync,
{
    pub(super) async fn shard_placements(&self) -> Result<Vec<ShardPlacement>> {
        let topology = self.fetch_topology(&self.seed()).await?;
        place_shards(&topology, self.config.desired.masters, self.config.block())
    }

    /// Move a shard's master onto its target ordinal by promoting the node
    /// there. The old master stays behind as a replica of the new one.
    pub(super) async fn promote_onto(&self, placement: &ShardPlacement) -> Result<()> {
        let topology = self.fetch_topology(&self.seed()).await?;
        let target = self.config.naming.address(placement.target);
        let master_id = placement.master_id.as_str();

        match topology.node_by_ordinal(placement.target) {
            None => {
                self.join(&target, &topology).await?;
                self.follow(&target, master_id).await?;
            }
            Some(node) if node.is_master() => {
                return Err(Error::logic(format!(
                    "ordinal {} of shard {} is held by master {}",
                    placement.target,
                    placement.shard,
                    node.label()
                )));
            }
            Some(node) if node.master_id() == Some(master_id) => {}
            Some(_) => self.follow(&target, master_id).await?,
        }

        info!(
            shard = placement.shard,
            from = placement.ordinal,
            to = placement.target,
            "Moving master onto its layout ordinal"
        );
        self.failover_to(master_id, &target).await
    }

    /// Fail over every master that sits off its shard's first ordinal.
    pub(super) async fn place_masters(&self) -> Result<()> {
        for placement in self.shard_placements().await? {
            if !placement.is_in_place() {
                self.promote_onto(&placement).await?;
            }
        }
        Ok(())
    }

    /// Point every replica ordinal of every shard at the shard's master,
    /// joining pods that are not members yet.
    pub(super) async fn align_replicas(&self) -> Result<()> {
        let seed = self.seed();
        let replicas_per_master = self.config.desired.replicas_per_master;

        for placement in self.shard_placements().await? {
            let master_id = placement.master_id.as_str();
            for ordinal in placement.replica_ordinals(replicas_per_master) {
                let topology = self.fetch_topology(&seed).await?;
                let address = self.config.naming.address(ordinal);
                match topology.node_by_ordinal(ordinal) {
                    Some(node) if node.master_id() == Some(master_id) => continue,
                    Some(node) if node.is_master() => {
                        return Err(Error::logic(format!(
                            "replica ordinal {ordinal} of shard {} is held by master {}",
                            placement.shard,
                            node.label()
                        )));
                    }
                    Some(_) => {}
                    None => self.join(&address, &topology).await?,
                }
                info!(replica = %address, master_id, "Moving replica to its layout shard");
                self.follow(&address, master_id).await?;
            }
        }
        Ok(())
    }

    /// Make `node` replicate `master_id` and wait until every member agrees.
    pub(super) async fn follow(&self, node: &Address, master_id: &str) -> Result<()> {
        self.wait_for_master_known(node, master_id).await?;
        self.driver
            .replicate(node, master_id)
            .await
            .map_err(|e| Error::driver("CLUSTER REPLICATE", node, e))?;
        let members = self.fetch_topology(&self.seed()).await?.addresses();
        self.wait_for_replica_relation(members, node, master_id)
            .await
    }

    /// Assign and migrate slots until every master owns exactly its range of
    /// the even distribution.
    ///
    /// Expects the masters to sit on their layout ordinals already. Slots of
    /// an unfinished migration are left alone.
    pub async fn settle_slots(&self) -> Result<()> {
        let seed = self.seed();
        let current = self.fetch_topology(&seed).await?;
        verify_in_flight_migrations(&current)?;
        let plan = calculate_slots_to_reconcile(&current, &self.desired_topology())?;
        if plan.is_empty() {
            debug!("slot distribution already settled");
            return Ok(());
        }
        info!(
            slots_to_add = plan.slots_to_add(),
            slots_to_migrate = plan.slots_to_migrate(),
            "Settling slot distribution"
        );

        let master_at = |ordinal: u32| -> Result<(String, Address)> {
            current
                .node_by_ordinal(ordinal)
                .filter(|n| n.is_master())
                .and_then(|n| Some((n.id.clone(), n.address.clone()?)))
                .ok_or_else(|| {
                    Error::logic(format!("no master at ordinal {ordinal} to carry its slots"))
                })
        };

        for (ordinal, tracker) in plan.add_slots.iter().enumerate() {
            let Some(tracker) = tracker else {
                continue;
            };
            let ordinal = u32::try_from(ordinal).unwrap_or(u32::MAX);
            let (_, address) = master_at(ordinal)?;
            for range in tracker.ranges() {
                self.driver
                    .add_slots(&address, *range)
                    .await
                    .map_err(|e| Error::driver("CLUSTER ADDSLOTS", &address, e))?;
            }
        }

        let mut routes: Vec<_> = plan.migrations.iter().collect();
        routes.sort_by_key(|(route, _)| **route);
        for (route, tracker) in routes {
            let (source_id, source) = master_at(route.source)?;
            let (destination_id, destination) = master_at(route.destination)?;
            for range in tracker.ranges() {
                let slot_move = SlotMove {
                    range: *range,
                    source: source.clone(),
                    source_id: source_id.clone(),
                    destination: destination.clone(),
                    destination_id: destination_id.clone(),
                };
                self.driver
                    .migrate_slots(&slot_move)
                    .await
                    .map_err(|e| Error::driver("slot migration", &source, e))?;
            }
        }

        let expected = u32::try_from(current.len()).unwrap_or(u32::MAX);
        self.wait_for_cluster_ok(current.addresses(), expected)
            .await
    }
}
