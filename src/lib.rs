//! valkey-scaler library crate
//!
//! Topology model, slot planning and scaling orchestration for Valkey
//! clusters whose nodes run as StatefulSet pods.

pub mod client;
pub mod config;
pub mod orchestrator;
pub mod slots;
pub mod topology;

pub use client::{ClusterMutator, PeerQuery, RebalanceOptions, ValkeyDriver};
pub use config::{ClusterConfig, DesiredState};
pub use orchestrator::{Error, Orchestrator, OrchestratorConfig, PodStatusSource, Result};
pub use slots::{ReconcilePlan, SlotRange, SlotRangeTracker, calculate_slots_to_reconcile};
pub use topology::{Address, ClusterTopology, PodNaming, parse_cluster_topology};
