//! Multi-step scenarios: failover ordering, unhealthy clusters, timeouts
//! and slot planning.

use std::time::Duration;

use valkey_scaler::config::DesiredState;
use valkey_scaler::orchestrator::{Error, Orchestrator, OrchestratorConfig, WaitOptions};
use valkey_scaler::slots::SlotRange;
use valkey_scaler::topology::{ClusterTopology, MigrationRoute};

use crate::{MockCluster, Op, naming, orchestrator, position};

fn range(start: u16, end: u16) -> SlotRange {
    SlotRange::new(start, end).unwrap()
}

// ============================================================================
// Failover before removal
// ============================================================================

/// Shard B's master sits at ordinal 4, outside the four pods that survive a
/// 2x2 -> 2x1 scale-down:
///
/// ```text
/// m0 r1 r2 | r3 m4 r5
/// ```
fn exposed_master_layout() -> MockCluster {
    let cluster = MockCluster::empty(&naming(), 6);
    cluster.add_master(0, &[range(0, 8191)]);
    cluster.add_replica(1, 0);
    cluster.add_replica(2, 0);
    cluster.add_master(4, &[range(8192, 16383)]);
    cluster.add_replica(3, 4);
    cluster.add_replica(5, 4);
    cluster
}

#[tokio::test(start_paused = true)]
async fn test_failover_confirmed_before_master_removed() {
    let cluster = exposed_master_layout();
    orchestrator(&cluster, 2, 1).scale_down().await.unwrap();

    let ops = cluster.ops();
    let failover = position(&ops, &Op::Failover { ordinal: 2 });
    let removed = position(&ops, &Op::DelNode { ordinal: 4 });
    let confirmed = ops
        .iter()
        .enumerate()
        .skip(failover)
        .find(|(_, op)| **op == Op::RoleObserved { ordinal: 4 })
        .map(|(i, _)| i)
        .expect("old master's role was never checked");
    assert!(failover < confirmed);
    assert!(confirmed < removed);
}

#[tokio::test(start_paused = true)]
async fn test_exposed_master_layout_ends_inside_window() {
    let cluster = exposed_master_layout();
    orchestrator(&cluster, 2, 1).scale_down().await.unwrap();

    assert_eq!(cluster.member_ordinals(), vec![0, 1, 2, 3]);
    assert!(cluster.topology().is_same_shape(&ClusterTopology::desired(2, 1, &naming())));
    // Every surviving master keeps one replica inside the window.
    assert_eq!(
        cluster.replicas_per_master().into_iter().collect::<Vec<_>>(),
        vec![(0, vec![1]), (2, vec![3])]
    );

    // Replica 2 of shard A is reused as shard B's new master, not deleted.
    let deleted: Vec<u32> = cluster
        .membership()
        .into_iter()
        .filter_map(|op| match op {
            Op::DelNode { ordinal } => Some(ordinal),
            _ => None,
        })
        .collect();
    assert_eq!(deleted, vec![4, 5]);
    let ops = cluster.membership();
    let followed = position(&ops, &Op::Replicate { ordinal: 2, master: 4 });
    assert!(followed < position(&ops, &Op::Failover { ordinal: 2 }));
}

#[tokio::test(start_paused = true)]
async fn test_exposed_master_moves_onto_a_free_pod() {
    // m0 - | r2 m3, scaled to 2x0: ordinal 1 is not a member yet, so it
    // joins, follows master 3 and takes over.
    let cluster = MockCluster::empty(&naming(), 4);
    cluster.add_master(0, &[range(0, 8191)]);
    cluster.add_master(3, &[range(8192, 16383)]);
    cluster.add_replica(2, 3);

    orchestrator(&cluster, 2, 0).scale_down().await.unwrap();

    assert_eq!(
        cluster.membership(),
        vec![
            Op::AddNode { ordinal: 1 },
            Op::Replicate {
                ordinal: 1,
                master: 3
            },
            Op::Failover { ordinal: 1 },
            Op::DelNode { ordinal: 3 },
            Op::DelNode { ordinal: 2 },
        ]
    );
    assert_eq!(cluster.member_ordinals(), vec![0, 1]);
    assert!(cluster.topology().is_same_shape(&ClusterTopology::desired(2, 0, &naming())));
}

// ============================================================================
// Health gate
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_scale_down_refuses_unhealthy_cluster() {
    let cluster = MockCluster::empty(&naming(), 4);
    cluster.add_master(0, &[range(0, 8191)]);
    cluster.add_replica(1, 0);
    cluster.add_master(2, &[range(8192, 16000)]);
    cluster.add_replica(3, 2);

    let err = orchestrator(&cluster, 1, 1).scale_down().await.unwrap_err();
    match err {
        Error::Unhealthy(message) => assert!(message.contains("383 slots are unassigned")),
        other => panic!("expected an unhealthy cluster, got {other}"),
    }
    assert!(cluster.mutations().is_empty());
}

// ============================================================================
// Timeouts
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_init_times_out_when_pods_never_ready() {
    let cluster = MockCluster::empty(&naming(), 6);
    cluster.set_ready_pods(4);
    let config = OrchestratorConfig::new(DesiredState::new(3, 1), naming())
        .with_wait(WaitOptions::default().with_timeout(Duration::from_secs(30)));
    let orchestrator = Orchestrator::new(cluster.clone(), cluster.clone(), config);

    let err = orchestrator.init().await.unwrap_err();
    assert!(
        matches!(&err, Error::Timeout { operation, duration } if operation == "pods ready" && *duration == Duration::from_secs(30)),
        "unexpected error: {err}"
    );
    assert!(err.is_retryable());
    assert!(cluster.mutations().is_empty());
}

// ============================================================================
// Planning
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_plan_for_settled_cluster_is_empty() {
    let cluster = MockCluster::running(&naming(), 3, 1);
    let plan = orchestrator(&cluster, 3, 1).plan().await.unwrap();
    assert!(plan.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_plan_moves_half_the_slots_to_the_new_master() {
    let cluster = MockCluster::empty(&naming(), 4);
    cluster.add_master(0, &[range(0, 16383)]);
    cluster.add_replica(1, 0);
    cluster.add_master(2, &[]);
    cluster.add_replica(3, 2);

    let plan = orchestrator(&cluster, 2, 1).plan().await.unwrap();
    assert_eq!(plan.slots_to_add(), 0);
    assert_eq!(plan.slots_to_migrate(), 8192);
    assert_eq!(
        plan.migrations[&MigrationRoute::new(0, 2)].ranges(),
        &[range(8192, 16383)]
    );

    let summary = plan.summary();
    assert_eq!(summary.migrations.len(), 1);
    assert_eq!(summary.migrations[0].slots, "8192-16383");
}

#[tokio::test(start_paused = true)]
async fn test_settle_assigns_unowned_and_moves_misplaced_slots() {
    let cluster = MockCluster::empty(&naming(), 4);
    cluster.add_master(0, &[range(0, 8191), range(9000, 9999)]);
    cluster.add_replica(1, 0);
    cluster.add_master(2, &[range(8192, 8999), range(10000, 16000)]);
    cluster.add_replica(3, 2);

    orchestrator(&cluster, 2, 1).settle_slots().await.unwrap();

    assert_eq!(
        cluster.mutations(),
        vec![
            Op::AddSlots {
                ordinal: 2,
                slots: 383
            },
            Op::Migrate {
                source: 0,
                destination: 2,
                slots: 1000
            },
        ]
    );
    assert!(cluster.topology().is_same_shape(&ClusterTopology::desired(2, 1, &naming())));
}
