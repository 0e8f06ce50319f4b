//! Pure slot management logic for Valkey clusters.
//!
//! This module provides testable, pure functions for the slot space and for
//! reconciliation planning. It separates the computation of "what slots to
//! move" from "how to move them".
//!
//! ## Module Structure
//!
//! - [`distribution`]: `SlotRange` and the even slot distribution
//! - [`tracker`]: merged, overlap-checked range sets
//! - [`bitset`]: dense per-slot membership
//! - [`planner`]: slot assignments and migration routes between topologies

pub mod bitset;
pub mod distribution;
pub mod planner;
pub mod tracker;

pub use bitset::SlotBitset;
pub use distribution::{MAX_SLOT, SlotError, SlotRange, TOTAL_SLOTS, desired_slot_ranges};
pub use planner::{
    PlanError, PlanSummary, ReconcilePlan, calculate_slots_to_reconcile,
    verify_in_flight_migrations,
};
pub use tracker::SlotRangeTracker;
