//! Typed view of a cluster: nodes, roles, shards and in-flight migrations.
//!
//! A [`ClusterTopology`] is built either analytically from a desired shape
//! ([`ClusterTopology::desired`]) or from live `CLUSTER NODES` text
//! ([`crate::topology::parse_cluster_topology`]). Both paths produce the same
//! type so they can be compared and diffed directly.

use std::collections::{BTreeSet, HashMap};

use serde::Serialize;

use crate::slots::{
    SlotBitset, SlotError, SlotRange, SlotRangeTracker, TOTAL_SLOTS, desired_slot_ranges,
};

use super::address::{Address, PodNaming};

// ============================================================================
// Nodes
// ============================================================================

/// Flags reported for a node in `CLUSTER NODES`, besides its role.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeFlags {
    /// This is the node that produced the report.
    pub myself: bool,
    /// Node is in PFAIL state (potentially failed).
    pub pfail: bool,
    /// Node is in FAIL state.
    pub fail: bool,
    /// Node is in handshake state.
    pub handshake: bool,
    /// Node has no address yet.
    pub noaddr: bool,
}

impl NodeFlags {
    /// Parse the comma-separated flag field. Role flags are ignored here.
    pub fn parse(flags: &str) -> Self {
        let mut parsed = NodeFlags::default();
        for flag in flags.split(',') {
            match flag.trim() {
                "myself" => parsed.myself = true,
                "pfail" | "fail?" => parsed.pfail = true,
                "fail" => parsed.fail = true,
                "handshake" => parsed.handshake = true,
                "noaddr" => parsed.noaddr = true,
                _ => {}
            }
        }
        parsed
    }

    /// Not failing, not in handshake, and addressable.
    pub fn is_healthy(&self) -> bool {
        !self.fail && !self.pfail && !self.handshake && !self.noaddr
    }
}

/// Role of a node, carrying the data that is only valid for that role.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeRole {
    Master { slots: Vec<SlotRange> },
    Replica { master_id: String },
    /// Reported without a master or replica flag, e.g. while in handshake.
    Pending,
}

/// An open importing/migrating slot marker (`[slot->-id]` / `[slot-<-id]`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlotMarker {
    /// The node is handing `slot` over to `node_id`.
    Migrating { slot: u16, node_id: String },
    /// The node is receiving `slot` from `node_id`.
    Importing { slot: u16, node_id: String },
}

impl SlotMarker {
    pub fn slot(&self) -> u16 {
        match self {
            SlotMarker::Migrating { slot, .. } | SlotMarker::Importing { slot, .. } => *slot,
        }
    }
}

/// A member of the cluster as seen in one topology snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterNode {
    pub id: String,
    /// Unset when the reported address could not be parsed.
    pub address: Option<Address>,
    pub role: NodeRole,
    pub connected: bool,
    pub flags: NodeFlags,
    pub markers: Vec<SlotMarker>,
}

impl ClusterNode {
    pub fn master(id: impl Into<String>, address: Option<Address>, slots: Vec<SlotRange>) -> Self {
        Self {
            id: id.into(),
            address,
            role: NodeRole::Master { slots },
            connected: true,
            flags: NodeFlags::default(),
            markers: Vec::new(),
        }
    }

    pub fn replica(
        id: impl Into<String>,
        address: Option<Address>,
        master_id: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            address,
            role: NodeRole::Replica {
                master_id: master_id.into(),
            },
            connected: true,
            flags: NodeFlags::default(),
            markers: Vec::new(),
        }
    }

    /// Deployment ordinal derived from the node's host name.
    pub fn ordinal(&self) -> Option<u32> {
        self.address.as_ref().and_then(Address::index)
    }

    pub fn is_master(&self) -> bool {
        matches!(self.role, NodeRole::Master { .. })
    }

    pub fn is_replica(&self) -> bool {
        matches!(self.role, NodeRole::Replica { .. })
    }

    pub fn is_pending(&self) -> bool {
        matches!(self.role, NodeRole::Pending)
    }

    /// Owned slot ranges; always empty for replicas.
    pub fn slot_ranges(&self) -> &[SlotRange] {
        match &self.role {
            NodeRole::Master { slots } => slots,
            NodeRole::Replica { .. } | NodeRole::Pending => &[],
        }
    }

    pub fn slot_count(&self) -> u32 {
        self.slot_ranges().iter().map(SlotRange::count).sum()
    }

    pub fn master_id(&self) -> Option<&str> {
        match &self.role {
            NodeRole::Replica { master_id } => Some(master_id),
            NodeRole::Master { .. } | NodeRole::Pending => None,
        }
    }

    pub fn host(&self) -> Option<&str> {
        self.address.as_ref().map(|a| a.host.as_str())
    }

    pub fn is_healthy(&self) -> bool {
        self.connected && self.flags.is_healthy()
    }

    /// Readable label for logs: the address when known, otherwise the id.
    pub fn label(&self) -> String {
        match &self.address {
            Some(address) => address.to_string(),
            None => self.id.clone(),
        }
    }
}

// ============================================================================
// Routes, shards, health
// ============================================================================

/// Source and destination master ordinals of a slot migration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct MigrationRoute {
    pub source: u32,
    pub destination: u32,
}

impl MigrationRoute {
    pub fn new(source: u32, destination: u32) -> Self {
        Self {
            source,
            destination,
        }
    }
}

impl std::fmt::Display for MigrationRoute {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}->{}", self.source, self.destination)
    }
}

/// A master and its replicas, ranked by the lowest ordinal among them.
///
/// Lower indexes survive a StatefulSet scale-down longer, so they are the
/// safer shards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Shard {
    pub index: u32,
    pub master_id: String,
}

/// Something that makes a topology unfit for structural changes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealthIssue {
    Disconnected { node: String },
    Failing { node: String },
    MissingAddress { node: String },
    OrphanReplica { node: String, master_id: String },
    OpenSlot { node: String, slot: u16 },
    NoRole { node: String },
    UnassignedSlots { count: u32 },
}

impl std::fmt::Display for HealthIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HealthIssue::Disconnected { node } => write!(f, "node {node} is disconnected"),
            HealthIssue::Failing { node } => write!(f, "node {node} is flagged as failing"),
            HealthIssue::MissingAddress { node } => write!(f, "node {node} has no address"),
            HealthIssue::OrphanReplica { node, master_id } => {
                write!(f, "replica {node} follows unknown master {master_id}")
            }
            HealthIssue::OpenSlot { node, slot } => {
                write!(f, "slot {slot} is importing or migrating on {node}")
            }
            HealthIssue::NoRole { node } => {
                write!(f, "node {node} is neither a master nor a replica yet")
            }
            HealthIssue::UnassignedSlots { count } => write!(f, "{count} slots are unassigned"),
        }
    }
}

// ============================================================================
// Topology
// ============================================================================

/// Snapshot of cluster membership, roles and slot ownership.
#[derive(Debug, Clone, Default)]
pub struct ClusterTopology {
    nodes: HashMap<String, ClusterNode>,
    masters: Vec<String>,
    replicas: Vec<String>,
    migrations: HashMap<MigrationRoute, SlotRangeTracker>,
}

impl ClusterTopology {
    pub fn new() -> Self {
        Self::default()
    }

    /// Analytic topology for `masters` shards of `replicas_per_master` replicas.
    ///
    /// Shards occupy contiguous ordinal blocks: shard `k` has its master at
    /// ordinal `k * (replicas_per_master + 1)` followed by its replicas. Slot
    /// range `k` of [`desired_slot_ranges`] belongs to shard `k`. Node ids are
    /// synthetic, so comparisons against live topologies must use
    /// [`ClusterTopology::is_same_shape`].
    pub fn desired(masters: u32, replicas_per_master: u32, naming: &PodNaming) -> Self {
        let block = replicas_per_master.saturating_add(1);
        let mut topology = Self::new();

        for (shard, range) in (0..masters).zip(desired_slot_ranges(masters as usize)) {
            let master_ordinal = shard * block;
            let master_id = format!("desired-{master_ordinal}");
            topology.insert_node(ClusterNode::master(
                master_id.clone(),
                Some(naming.address(master_ordinal)),
                vec![range],
            ));
            for offset in 1..=replicas_per_master {
                let ordinal = master_ordinal + offset;
                topology.insert_node(ClusterNode::replica(
                    format!("desired-{ordinal}"),
                    Some(naming.address(ordinal)),
                    master_id.clone(),
                ));
            }
        }
        topology
    }

    /// Add or replace a node, filing it under its role.
    ///
    /// Pending nodes are kept in the node map only.
    pub fn insert_node(&mut self, node: ClusterNode) {
        let id = node.id.clone();
        if self.nodes.contains_key(&id) {
            self.masters.retain(|m| m != &id);
            self.replicas.retain(|r| r != &id);
        }
        match node.role {
            NodeRole::Master { .. } => self.masters.push(id.clone()),
            NodeRole::Replica { .. } => self.replicas.push(id.clone()),
            NodeRole::Pending => {}
        }
        self.nodes.insert(id, node);
    }

    /// Record slots that are in flight along `route`.
    pub fn record_migration(
        &mut self,
        route: MigrationRoute,
        range: SlotRange,
    ) -> Result<(), SlotError> {
        self.migrations.entry(route).or_default().add(range)
    }

    pub fn migrations(&self) -> &HashMap<MigrationRoute, SlotRangeTracker> {
        &self.migrations
    }

    pub fn node(&self, id: &str) -> Option<&ClusterNode> {
        self.nodes.get(id)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &ClusterNode> {
        self.nodes.values()
    }

    /// Masters in insertion order.
    pub fn masters(&self) -> impl Iterator<Item = &ClusterNode> {
        self.masters.iter().filter_map(|id| self.nodes.get(id))
    }

    /// Replicas in insertion order.
    pub fn replicas(&self) -> impl Iterator<Item = &ClusterNode> {
        self.replicas.iter().filter_map(|id| self.nodes.get(id))
    }

    pub fn master_count(&self) -> usize {
        self.masters.len()
    }

    pub fn replica_count(&self) -> usize {
        self.replicas.len()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Host name of every node with a known address.
    pub fn fqdns(&self) -> Vec<&str> {
        self.nodes.values().filter_map(ClusterNode::host).collect()
    }

    /// Addresses of every node, ordered by address.
    pub fn addresses(&self) -> Vec<Address> {
        let mut addresses: Vec<Address> =
            self.nodes.values().filter_map(|n| n.address.clone()).collect();
        addresses.sort();
        addresses
    }

    pub fn ordinals(&self) -> BTreeSet<u32> {
        self.nodes.values().filter_map(ClusterNode::ordinal).collect()
    }

    pub fn node_by_ordinal(&self, ordinal: u32) -> Option<&ClusterNode> {
        self.nodes.values().find(|n| n.ordinal() == Some(ordinal))
    }

    pub fn node_by_address(&self, address: &Address) -> Option<&ClusterNode> {
        self.nodes
            .values()
            .find(|n| n.address.as_ref() == Some(address))
    }

    /// Replicas following `master_id`, lowest ordinal first.
    pub fn replicas_of(&self, master_id: &str) -> Vec<&ClusterNode> {
        let mut replicas: Vec<&ClusterNode> = self
            .replicas()
            .filter(|r| r.master_id() == Some(master_id))
            .collect();
        replicas.sort_by_key(|r| (r.ordinal().unwrap_or(u32::MAX), r.id.clone()));
        replicas
    }

    pub fn master_of(&self, replica: &ClusterNode) -> Option<&ClusterNode> {
        replica.master_id().and_then(|id| self.nodes.get(id))
    }

    /// Shards sorted by ascending safety index.
    ///
    /// A shard whose members carry no ordinal sorts last.
    pub fn shards(&self) -> Vec<Shard> {
        let mut shards: Vec<Shard> = self
            .masters()
            .map(|master| {
                let index = std::iter::once(master)
                    .chain(self.replicas_of(&master.id))
                    .filter_map(ClusterNode::ordinal)
                    .min()
                    .unwrap_or(u32::MAX);
                Shard {
                    index,
                    master_id: master.id.clone(),
                }
            })
            .collect();
        shards.sort_by(|a, b| (a.index, &a.master_id).cmp(&(b.index, &b.master_id)));
        shards
    }

    /// Slots owned by any master.
    pub fn assigned_slots(&self) -> SlotBitset {
        let mut bits = SlotBitset::new();
        for master in self.masters() {
            for range in master.slot_ranges() {
                bits.insert_range(*range);
            }
        }
        bits
    }

    /// Routes derived from the `MIGRATING` markers reported by source masters.
    ///
    /// Markers whose peer id is unknown or whose nodes carry no ordinal are
    /// left out.
    pub fn observed_migrations(&self) -> HashMap<MigrationRoute, SlotRangeTracker> {
        let mut observed: HashMap<MigrationRoute, SlotBitset> = HashMap::new();
        for node in self.masters() {
            let Some(source) = node.ordinal() else {
                continue;
            };
            for marker in &node.markers {
                if let SlotMarker::Migrating { slot, node_id } = marker
                    && let Some(destination) = self.node(node_id).and_then(ClusterNode::ordinal)
                {
                    observed
                        .entry(MigrationRoute::new(source, destination))
                        .or_default()
                        .insert(*slot);
                }
            }
        }

        observed
            .into_iter()
            .filter_map(|(route, bits)| {
                SlotRangeTracker::from_ranges(bits.ranges())
                    .ok()
                    .map(|tracker| (route, tracker))
            })
            .collect()
    }

    /// Replace the recorded migrations with the ones observed on the nodes.
    pub fn adopt_observed_migrations(&mut self) {
        self.migrations = self.observed_migrations();
    }

    /// Recorded in-flight slots that no node reports as migrating.
    pub fn unconfirmed_migrations(&self) -> Vec<(MigrationRoute, SlotRange)> {
        let observed = self.observed_migrations();
        let mut stale = Vec::new();
        for (route, tracker) in &self.migrations {
            let live = observed.get(route).map(SlotBitset::from).unwrap_or_default();
            let mut missing = SlotBitset::new();
            for range in tracker.ranges() {
                for slot in range.iter().filter(|s| !live.contains(*s)) {
                    missing.insert(slot);
                }
            }
            stale.extend(missing.ranges().into_iter().map(|range| (*route, range)));
        }
        stale.sort_by_key(|(route, range)| (*route, *range));
        stale
    }

    /// Everything that should block a structural change.
    pub fn health_issues(&self) -> Vec<HealthIssue> {
        let mut issues = Vec::new();
        let mut nodes: Vec<&ClusterNode> = self.nodes.values().collect();
        nodes.sort_by_key(|n| (n.ordinal().unwrap_or(u32::MAX), n.id.clone()));

        for node in nodes {
            let label = node.label();
            if node.address.is_none() {
                issues.push(HealthIssue::MissingAddress { node: label.clone() });
            }
            if !node.connected {
                issues.push(HealthIssue::Disconnected { node: label.clone() });
            }
            if !node.flags.is_healthy() {
                issues.push(HealthIssue::Failing { node: label.clone() });
            }
            if node.is_pending() {
                issues.push(HealthIssue::NoRole { node: label.clone() });
            }
            if let Some(master_id) = node.master_id()
                && !self.nodes.contains_key(master_id)
            {
                issues.push(HealthIssue::OrphanReplica {
                    node: label.clone(),
                    master_id: master_id.to_string(),
                });
            }
            issues.extend(node.markers.iter().map(|m| HealthIssue::OpenSlot {
                node: label.clone(),
                slot: m.slot(),
            }));
        }

        let unassigned = u32::from(TOTAL_SLOTS) - self.assigned_slots().len() as u32;
        if unassigned > 0 {
            issues.push(HealthIssue::UnassignedSlots { count: unassigned });
        }
        issues
    }
}
