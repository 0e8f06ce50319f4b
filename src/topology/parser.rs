//! `CLUSTER NODES` parsing.
//!
//! Each line describes one node:
//!
//! ```text
//! <id> <host:port@cport[,hostname]> <flags> <master-id|-> <ping> <pong> <epoch> <link-state> <slot>...
//! ```
//!
//! Parsing never fails. Malformed lines and tokens are dropped at the
//! smallest granularity possible, and the rest of the report is still used.

use tracing::trace;

use crate::slots::SlotRange;

use super::address::Address;
use super::model::{ClusterNode, ClusterTopology, NodeFlags, NodeRole, SlotMarker};

/// Build a topology from a `CLUSTER NODES` report.
///
/// In-flight migrations are taken from the `MIGRATING` markers the source
/// masters report.
pub fn parse_cluster_topology(text: &str) -> ClusterTopology {
    let mut topology = ClusterTopology::new();
    for line in text.lines() {
        match parse_node_line(line) {
            Some(node) => topology.insert_node(node),
            None if !line.trim().is_empty() => trace!(line, "skipping cluster nodes line"),
            None => {}
        }
    }
    topology.adopt_observed_migrations();
    topology
}

/// Parse one report line; `None` when the line cannot describe a node.
pub fn parse_node_line(line: &str) -> Option<ClusterNode> {
    let fields: Vec<&str> = line.split_whitespace().collect();
    let [id, address, flags, master_id, _ping, _pong, _epoch, link_state, slot_tokens @ ..] =
        fields.as_slice()
    else {
        return None;
    };

    let role_flags: Vec<&str> = flags.split(',').collect();
    let (role, markers) = if role_flags.contains(&"master") {
        let (slots, markers) = parse_slot_tokens(slot_tokens);
        (NodeRole::Master { slots }, markers)
    } else if role_flags.contains(&"slave") || role_flags.contains(&"replica") {
        (
            NodeRole::Replica {
                master_id: (*master_id).to_string(),
            },
            Vec::new(),
        )
    } else {
        (NodeRole::Pending, Vec::new())
    };

    Some(ClusterNode {
        id: (*id).to_string(),
        address: parse_address(address),
        role,
        connected: *link_state == "connected",
        flags: NodeFlags::parse(flags),
        markers,
    })
}

/// `host:port@cport[,hostname]`; only the part before `@` is used.
fn parse_address(field: &str) -> Option<Address> {
    let host_port = field.split('@').next()?;
    let (host, port) = host_port.rsplit_once(':')?;
    if host.is_empty() {
        return None;
    }
    let port = port.parse().ok()?;
    Some(Address::new(host, port))
}

fn parse_slot_tokens(tokens: &[&str]) -> (Vec<SlotRange>, Vec<SlotMarker>) {
    let mut slots = Vec::new();
    let mut markers = Vec::new();
    for token in tokens {
        if let Some(inner) = token.strip_prefix('[') {
            markers.extend(parse_marker(inner.trim_end_matches(']')));
        } else if let Ok(range) = token.parse::<SlotRange>() {
            slots.push(range);
        }
    }
    (slots, markers)
}

/// `slot->-id` (migrating) or `slot-<-id` (importing).
fn parse_marker(inner: &str) -> Option<SlotMarker> {
    if let Some((slot, node_id)) = inner.split_once("->-") {
        let slot = SlotRange::single(slot.parse().ok()?).ok()?.start();
        return Some(SlotMarker::Migrating {
            slot,
            node_id: node_id.to_string(),
        });
    }
    if let Some((slot, node_id)) = inner.split_once("-<-") {
        let slot = SlotRange::single(slot.parse().ok()?).ok()?.start();
        return Some(SlotMarker::Importing {
            slot,
            node_id: node_id.to_string(),
        });
    }
    None
}
