// Test code is allowed to panic on failure
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::panic,
    clippy::string_slice
)]

//! Unit tests for valkey-scaler.
//!
//! These tests run without a cluster and exercise several modules together:
//! gossip text through the parser into the planner and shape comparison.

mod parse_and_plan_tests {
    use valkey_scaler::slots::{
        PlanError, SlotRange, calculate_slots_to_reconcile, verify_in_flight_migrations,
    };
    use valkey_scaler::topology::{
        ClusterTopology, MigrationRoute, PodNaming, parse_cluster_topology,
    };

    fn naming() -> PodNaming {
        PodNaming::for_cluster("valkey", "default")
    }

    fn line(id: &str, ordinal: u32, flags: &str, master: &str, slots: &str) -> String {
        format!(
            "{id} valkey-{ordinal}.valkey-headless.default.svc.cluster.local:6379@16379 {flags} {master} 0 1700000000000 1 connected {slots}"
        )
    }

    fn settled_two_by_one() -> String {
        [
            line("aaa", 0, "myself,master", "-", "0-8191"),
            line("bbb", 1, "slave", "aaa", ""),
            line("ccc", 2, "master", "-", "8192-16383"),
            line("ddd", 3, "slave", "ccc", ""),
        ]
        .join("\n")
    }

    #[test]
    fn test_parsed_report_matches_desired_shape() {
        let topology = parse_cluster_topology(&settled_two_by_one());
        assert_eq!(topology.master_count(), 2);
        assert_eq!(topology.replica_count(), 2);
        assert!(topology.health_issues().is_empty());
        assert!(topology.is_same_shape(&ClusterTopology::desired(2, 1, &naming())));
        assert!(!topology.is_same_shape(&ClusterTopology::desired(2, 2, &naming())));
    }

    #[test]
    fn test_parsed_report_needs_no_work() {
        let topology = parse_cluster_topology(&settled_two_by_one());
        let plan = calculate_slots_to_reconcile(&topology, &ClusterTopology::desired(2, 1, &naming()))
            .unwrap();
        assert!(plan.is_empty());
    }

    #[test]
    fn test_gap_becomes_add_slots_for_desired_owner() {
        let report = [
            line("aaa", 0, "myself,master", "-", "0-8000"),
            line("ccc", 2, "master", "-", "8192-16383"),
        ]
        .join("\n");
        let topology = parse_cluster_topology(&report);
        let desired = ClusterTopology::desired(2, 1, &naming());
        let plan = calculate_slots_to_reconcile(&topology, &desired).unwrap();

        assert_eq!(plan.slots_to_add(), 191);
        assert_eq!(plan.slots_to_migrate(), 0);
        let tracker = plan.add_slots[0].as_ref().unwrap();
        assert_eq!(tracker.ranges(), &[SlotRange::new(8001, 8191).unwrap()]);
        assert!(plan.add_slots[2].is_none());
    }

    #[test]
    fn test_in_flight_slot_is_not_planned_twice() {
        let report = [
            line("aaa", 0, "myself,master", "-", "0-8192 [8192->-bbb]"),
            line("bbb", 1, "master", "-", "8193-16383 [8192-<-aaa]"),
        ]
        .join("\n");
        let topology = parse_cluster_topology(&report);
        assert_eq!(
            topology.migrations()[&MigrationRoute::new(0, 1)].ranges(),
            &[SlotRange::single(8192).unwrap()]
        );
        verify_in_flight_migrations(&topology).unwrap();

        // Slot 8192 belongs to ordinal 1 in the desired layout but is already moving.
        let plan =
            calculate_slots_to_reconcile(&topology, &ClusterTopology::desired(2, 0, &naming()))
                .unwrap();
        assert!(plan.is_empty());
    }

    #[test]
    fn test_unresolved_master_blocks_planning() {
        let report = [
            "aaa 10.0.0.5:6379@16379 myself,master - 0 0 1 connected 0-8191".to_string(),
            line("ccc", 2, "master", "-", "8192-16383"),
        ]
        .join("\n");
        let topology = parse_cluster_topology(&report);
        let err =
            calculate_slots_to_reconcile(&topology, &ClusterTopology::desired(2, 1, &naming()))
                .unwrap_err();
        assert!(matches!(err, PlanError::UnresolvedOrdinal { .. }));
    }

    #[test]
    fn test_disconnected_node_is_a_health_issue() {
        let report = settled_two_by_one().replace(
            "slave ccc 0 1700000000000 1 connected",
            "slave,fail ccc 0 1700000000000 1 disconnected",
        );
        let topology = parse_cluster_topology(&report);
        let issues: Vec<String> = topology.health_issues().iter().map(ToString::to_string).collect();
        assert_eq!(issues.len(), 2, "{issues:?}");
        assert!(issues.iter().any(|i| i.contains("disconnected")));
    }
}

mod config_tests {
    use std::time::Duration;

    use valkey_scaler::config::ClusterConfig;
    use valkey_scaler::orchestrator::OrchestratorConfig;

    #[test]
    fn test_environment_flows_into_orchestrator_config() {
        let lookup = |key: &str| {
            let value = match key {
                "CLUSTER_NAME" => Some("sessions"),
                "NAMESPACE" => Some("cache"),
                "MASTERS" => Some("3"),
                "REPLICAS_PER_MASTER" => Some("2"),
                "CONVERGENCE_TIMEOUT_SECS" => Some("90"),
                _ => None,
            };
            value.map(str::to_string)
        };
        let config = ClusterConfig::from_lookup(lookup).unwrap();
        let orchestrator = OrchestratorConfig::from(&config);

        assert_eq!(orchestrator.desired_total(), 9);
        assert_eq!(orchestrator.block(), 3);
        assert_eq!(orchestrator.wait.timeout, Duration::from_secs(90));
        assert_eq!(orchestrator.wait.concurrency, 10);
        assert_eq!(
            orchestrator.naming.address(4).to_string(),
            "sessions-4.sessions-headless.cache.svc.cluster.local:6379"
        );
    }
}

mod client_tests {
    use valkey_scaler::client::{ClusterInfo, ReplicationInfo};
    use valkey_scaler::topology::PodNaming;

    #[test]
    fn test_replication_info_matches_pod_address() {
        let naming = PodNaming::for_cluster("valkey", "default");
        let info = ReplicationInfo::parse(
            "# Replication\r\nrole:slave\r\nmaster_host:valkey-3.valkey-headless\r\nmaster_port:6379\r\nmaster_link_status:up\r\n",
        );
        assert!(info.is_replica_of(&naming.address(3)));
        assert!(!info.is_replica_of(&naming.address(4)));
    }

    #[test]
    fn test_cluster_info_missing_field_is_an_error() {
        assert!(ClusterInfo::parse("cluster_state:ok\r\n").is_err());
    }
}
