//! Valkey client module for cluster management operations.
//!
//! This module provides the driver the orchestrator talks to: per-node
//! queries and slot migrations over the `fred` client, and membership
//! changes through the `valkey-cli` cluster manager.
//!
//! ## Architecture
//!
//! - `driver`: `PeerQuery` / `ClusterMutator` traits and the production `ValkeyDriver`
//! - `valkey_client`: single-node connections, slot commands and the shared `ValkeyError`
//! - `cli`: `valkey-cli --cluster` argument building and execution
//! - `types`: parsed `CLUSTER INFO`
//! - `parsing`: `INFO` key/value parsing and replication state

pub mod cli;
pub mod driver;
pub mod parsing;
pub mod types;
pub mod valkey_client;

pub use cli::{RebalanceOptions, ValkeyCli};
pub use driver::{ClusterMutator, PeerQuery, SlotMove, ValkeyDriver};
pub use parsing::{ReplicationInfo, ReplicationRole, parse_info_output};
pub use types::{ClusterInfo, ClusterState, ParseError};
pub use valkey_client::{ValkeyClient, ValkeyClientConfig, ValkeyError};
