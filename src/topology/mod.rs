//! Cluster topology model, shape comparison and `CLUSTER NODES` parsing.
//!
//! ## Module Structure
//!
//! - [`address`]: `host:port` endpoints, ordinal extraction and pod naming
//! - [`model`]: nodes, shards, migration routes and the topology snapshot
//! - [`shape`]: structural equality between two topologies
//! - [`parser`]: builds a topology from gossip text

pub mod address;
pub mod model;
pub mod parser;
pub mod shape;

pub use address::{Address, AddressParseError, PodNaming, ordinal_from_host};
pub use model::{
    ClusterNode, ClusterTopology, HealthIssue, MigrationRoute, NodeFlags, NodeRole, Shard,
    SlotMarker,
};
pub use parser::{parse_cluster_topology, parse_node_line};
pub use shape::match_nodes;
