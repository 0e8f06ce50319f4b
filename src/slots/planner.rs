//! Slot reconciliation planning - computes what needs to change, no I/O.
//!
//! Given a current and a desired topology with the same number of masters,
//! the planner lists slots that have no owner yet (to be assigned) and slots
//! that must move between masters (grouped by migration route). Masters are
//! identified by ordinal, never by node id.

use std::collections::HashMap;

use serde::Serialize;
use thiserror::Error;

use crate::topology::{ClusterTopology, MigrationRoute};

use super::bitset::SlotBitset;
use super::distribution::{SlotError, SlotRange, TOTAL_SLOTS};
use super::tracker::SlotRangeTracker;

/// Errors that make a plan impossible to compute.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PlanError {
    #[error("master count mismatch: current topology has {current}, desired has {desired}")]
    MasterCountMismatch { current: usize, desired: usize },

    #[error("master {node_id} has no ordinal (address: {address})")]
    UnresolvedOrdinal { node_id: String, address: String },

    #[error("in-flight migration {route} of slots {range} is not reported by any node")]
    UnconfirmedMigration {
        route: MigrationRoute,
        range: SlotRange,
    },

    #[error(transparent)]
    Slot(#[from] SlotError),
}

/// Slot work needed to reach the desired ownership.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcilePlan {
    /// Unowned slots to assign, indexed by desired master ordinal.
    pub add_slots: Vec<Option<SlotRangeTracker>>,
    /// Slots to move between masters. Never holds empty trackers.
    pub migrations: HashMap<MigrationRoute, SlotRangeTracker>,
}

impl ReconcilePlan {
    pub fn is_empty(&self) -> bool {
        self.add_slots.iter().all(Option::is_none) && self.migrations.is_empty()
    }

    pub fn slots_to_add(&self) -> u32 {
        self.add_slots
            .iter()
            .flatten()
            .map(SlotRangeTracker::slot_count)
            .sum()
    }

    pub fn slots_to_migrate(&self) -> u32 {
        self.migrations.values().map(SlotRangeTracker::slot_count).sum()
    }

    /// Flattened, ordered view for display and JSON output.
    pub fn summary(&self) -> PlanSummary {
        let add_slots = self
            .add_slots
            .iter()
            .enumerate()
            .filter_map(|(ordinal, tracker)| {
                tracker.as_ref().map(|t| SlotAssignment {
                    ordinal: ordinal as u32,
                    slots: t.to_string(),
                    count: t.slot_count(),
                })
            })
            .collect();

        let mut migrations: Vec<RouteSummary> = self
            .migrations
            .iter()
            .map(|(route, tracker)| RouteSummary {
                route: *route,
                slots: tracker.to_string(),
                count: tracker.slot_count(),
            })
            .collect();
        migrations.sort_by_key(|m| m.route);

        PlanSummary {
            add_slots,
            migrations,
            slots_to_add: self.slots_to_add(),
            slots_to_migrate: self.slots_to_migrate(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SlotAssignment {
    pub ordinal: u32,
    pub slots: String,
    pub count: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteSummary {
    pub route: MigrationRoute,
    pub slots: String,
    pub count: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanSummary {
    pub add_slots: Vec<SlotAssignment>,
    pub migrations: Vec<RouteSummary>,
    pub slots_to_add: u32,
    pub slots_to_migrate: u32,
}

/// Per-slot owner ordinal; `None` for unassigned slots.
fn owner_table(topology: &ClusterTopology) -> Result<Vec<Option<u32>>, PlanError> {
    let mut owners = vec![None; usize::from(TOTAL_SLOTS)];
    for master in topology.masters() {
        let ordinal = master.ordinal().ok_or_else(|| PlanError::UnresolvedOrdinal {
            node_id: master.id.clone(),
            address: master
                .address
                .as_ref()
                .map_or_else(|| "unknown".to_string(), ToString::to_string),
        })?;
        for range in master.slot_ranges() {
            for slot in range.iter() {
                if let Some(owner) = owners.get_mut(usize::from(slot)) {
                    *owner = Some(ordinal);
                }
            }
        }
    }
    Ok(owners)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Work {
    Assign(u32),
    Migrate(MigrationRoute),
}

/// A run of consecutive slots needing the same work.
struct Run {
    work: Work,
    start: u16,
    end: u16,
}

/// Compute slot assignments and migrations from `current` to `desired`.
///
/// Slots inside an in-flight migration recorded on `current` are not planned
/// again, so re-running the planner while migrations are outstanding never
/// schedules the same slots twice.
pub fn calculate_slots_to_reconcile(
    current: &ClusterTopology,
    desired: &ClusterTopology,
) -> Result<ReconcilePlan, PlanError> {
    if current.master_count() != desired.master_count() {
        return Err(PlanError::MasterCountMismatch {
            current: current.master_count(),
            desired: desired.master_count(),
        });
    }

    let current_owners = owner_table(current)?;
    let desired_owners = owner_table(desired)?;

    let mut in_flight = SlotBitset::new();
    for tracker in current.migrations().values() {
        for range in tracker.ranges() {
            in_flight.insert_range(*range);
        }
    }

    let mut plan = ReconcilePlan::default();
    let mut run: Option<Run> = None;

    for (slot, (now, wanted)) in (0..TOTAL_SLOTS).zip(current_owners.into_iter().zip(desired_owners)) {
        let work = match (now, wanted) {
            (None, Some(destination)) => Some(Work::Assign(destination)),
            (Some(source), Some(destination))
                if source != destination && !in_flight.contains(slot) =>
            {
                Some(Work::Migrate(MigrationRoute::new(source, destination)))
            }
            _ => None,
        };

        run = match (run, work) {
            (Some(mut open), Some(work)) if open.work == work && open.end + 1 == slot => {
                open.end = slot;
                Some(open)
            }
            (open, work) => {
                if let Some(done) = open {
                    apply(&mut plan, done)?;
                }
                work.map(|work| Run {
                    work,
                    start: slot,
                    end: slot,
                })
            }
        };
    }
    if let Some(done) = run {
        apply(&mut plan, done)?;
    }

    Ok(plan)
}

fn apply(plan: &mut ReconcilePlan, run: Run) -> Result<(), PlanError> {
    let range = SlotRange::new(run.start, run.end)?;
    match run.work {
        Work::Assign(ordinal) => {
            let index = ordinal as usize;
            if plan.add_slots.len() <= index {
                plan.add_slots.resize(index + 1, None);
            }
            if let Some(entry) = plan.add_slots.get_mut(index) {
                entry.get_or_insert_with(SlotRangeTracker::new).add(range)?;
            }
        }
        Work::Migrate(route) => plan.migrations.entry(route).or_default().add(range)?,
    }
    Ok(())
}

/// Fail when `current` records in-flight slots no node reports as migrating.
///
/// The planner trusts the recorded migrations; call this first when they
/// were carried over from an earlier snapshot.
pub fn verify_in_flight_migrations(current: &ClusterTopology) -> Result<(), PlanError> {
    match current.unconfirmed_migrations().into_iter().next() {
        Some((route, range)) => Err(PlanError::UnconfirmedMigration { route, range }),
        None => Ok(()),
    }
}
