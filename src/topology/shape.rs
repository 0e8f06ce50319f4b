//! Structural comparison of topologies.
//!
//! Two topologies have the same shape when their nodes pair up by ordinal,
//! role and slot ownership. Node ids and host names are ignored, so a cluster
//! whose ids changed after a restart still matches its desired shape.

use super::model::{ClusterNode, ClusterTopology, NodeRole};

fn same_ordinal(a: &ClusterNode, b: &ClusterNode) -> bool {
    matches!((a.ordinal(), b.ordinal()), (Some(x), Some(y)) if x == y)
}

/// Whether `a` (from `a_topology`) and `b` (from `b_topology`) are the same node.
///
/// Masters match on ordinal and identical ordered slot ranges. Replicas match on
/// ordinal and on their masters' ordinals, each master resolved in its own
/// topology. Different roles never match.
pub fn match_nodes(
    a: &ClusterNode,
    a_topology: &ClusterTopology,
    b: &ClusterNode,
    b_topology: &ClusterTopology,
) -> bool {
    match (&a.role, &b.role) {
        (NodeRole::Master { slots: a_slots }, NodeRole::Master { slots: b_slots }) => {
            same_ordinal(a, b) && a_slots == b_slots
        }
        (NodeRole::Replica { master_id: a_master }, NodeRole::Replica { master_id: b_master }) => {
            same_ordinal(a, b)
                && match (a_topology.node(a_master), b_topology.node(b_master)) {
                    (Some(x), Some(y)) => same_ordinal(x, y),
                    _ => false,
                }
        }
        _ => false,
    }
}

/// Pair every node of `ours` with a distinct matching node of `theirs`.
fn pair_up<'a>(
    ours: impl Iterator<Item = &'a ClusterNode>,
    ours_topology: &ClusterTopology,
    theirs: &[&ClusterNode],
    theirs_topology: &ClusterTopology,
) -> bool {
    let mut taken = vec![false; theirs.len()];
    for node in ours {
        let candidate = theirs.iter().zip(taken.iter_mut()).find(|(other, used)| {
            !**used && match_nodes(node, ours_topology, other, theirs_topology)
        });
        match candidate {
            Some((_, used)) => *used = true,
            None => return false,
        }
    }
    true
}

impl ClusterTopology {
    /// Structural equality, including the in-flight migrations map.
    pub fn is_same_shape(&self, other: &ClusterTopology) -> bool {
        if self.len() != other.len()
            || self.master_count() != other.master_count()
            || self.replica_count() != other.replica_count()
        {
            return false;
        }

        let their_masters: Vec<&ClusterNode> = other.masters().collect();
        let their_replicas: Vec<&ClusterNode> = other.replicas().collect();

        pair_up(self.masters(), self, &their_masters, other)
            && pair_up(self.replicas(), self, &their_replicas, other)
            && self.migrations() == other.migrations()
    }
}
