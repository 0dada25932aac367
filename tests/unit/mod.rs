// Test code is allowed to panic on failure
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::panic,
    clippy::string_slice
)]

//! Unit tests for ray-operator.
//!
//! These tests run without a Kubernetes cluster and exercise the public API
//! of individual components in isolation.

mod crd_tests {
    use kube::CustomResourceExt;
    use ray_operator::crd::{
        ClusterState, Condition, RayCluster, RayClusterSpec, RayClusterStatus, TriState,
    };
    use serde_json::json;

    #[test]
    fn test_state_display() {
        assert_eq!(ClusterState::Ready.to_string(), "ready");
        assert_eq!(ClusterState::Suspended.to_string(), "suspended");
        assert_eq!(ClusterState::Unready.to_string(), "unready");
    }

    #[test]
    fn test_state_default() {
        assert_eq!(ClusterState::default(), ClusterState::Unready);
    }

    #[test]
    fn test_state_serializes_lowercase() {
        let value = serde_json::to_value(ClusterState::Suspended).unwrap();
        assert_eq!(value, json!("suspended"));
    }

    #[test]
    fn test_condition_ready() {
        let condition = Condition::ready(true, "AllInstancesReady", "all ready", Some(3));
        assert_eq!(condition.r#type, "Ready");
        assert_eq!(condition.status, "True");
        assert_eq!(condition.reason, "AllInstancesReady");
        assert_eq!(condition.observed_generation, Some(3));
        assert!(condition.is_true());
    }

    #[test]
    fn test_condition_suspended_false() {
        let condition = Condition::suspended(false, "NotSuspended", "", None);
        assert_eq!(condition.r#type, "Suspended");
        assert_eq!(condition.status, "False");
        assert!(!condition.is_true());
    }

    #[test]
    fn test_tristate_round_trip_distinguishes_unset() {
        let spec: RayClusterSpec = serde_json::from_value(json!({
            "headGroupSpec": {},
            "suspend": false,
        }))
        .unwrap();
        assert_eq!(spec.suspend, TriState::False);
        assert!(spec.enable_in_tree_autoscaling.is_unset());
        assert!(!spec.is_suspended());

        let value = serde_json::to_value(&spec).unwrap();
        assert_eq!(value["suspend"], json!(false));
        assert!(value.get("enableInTreeAutoscaling").is_none());
    }

    #[test]
    fn test_tristate_from_bool() {
        assert_eq!(TriState::from(true), TriState::True);
        assert_eq!(TriState::from(false), TriState::False);
        assert!(TriState::Unset.unwrap_or(true));
        assert!(!TriState::False.unwrap_or(true));
    }

    #[test]
    fn test_worker_group_defaults() {
        let spec: RayClusterSpec = serde_json::from_value(json!({
            "headGroupSpec": {},
            "workerGroupSpecs": [{ "groupName": "small-group" }],
        }))
        .unwrap();
        let group = &spec.worker_group_specs[0];
        assert_eq!(group.replicas, None);
        assert_eq!(group.min_replicas, 0);
        assert_eq!(group.max_replicas, i32::MAX);
        assert_eq!(group.num_of_hosts, 1);
        assert!(group.workers_to_delete().is_empty());
        assert_eq!(group.requested_replicas(), 0);
    }

    #[test]
    fn test_worker_group_full() {
        let spec: RayClusterSpec = serde_json::from_value(json!({
            "headGroupSpec": { "rayStartParams": { "dashboard-host": "0.0.0.0" } },
            "workerGroupSpecs": [{
                "groupName": "tpu-group",
                "replicas": 2,
                "minReplicas": 1,
                "maxReplicas": 4,
                "numOfHosts": 4,
                "scaleStrategy": { "workersToDelete": ["a", "b"] },
            }],
            "enableInTreeAutoscaling": true,
        }))
        .unwrap();
        let group = spec.worker_group("tpu-group").unwrap();
        assert_eq!(group.requested_replicas(), 2);
        assert_eq!(group.hosts(), 4);
        assert_eq!(group.workers_to_delete(), ["a", "b"]);
        assert!(spec.enable_in_tree_autoscaling.is_true());
        assert!(spec.worker_group("missing").is_none());
    }

    #[test]
    fn test_status_defaults_when_fields_missing() {
        let status: RayClusterStatus = serde_json::from_value(json!({})).unwrap();
        assert_eq!(status, RayClusterStatus::default());
        assert_eq!(status.state, ClusterState::Unready);
    }

    #[test]
    fn test_crd_definition() {
        let crd = RayCluster::crd();
        assert_eq!(crd.spec.group, "ray.io");
        assert_eq!(crd.spec.names.kind, "RayCluster");
        assert_eq!(crd.spec.names.plural, "rayclusters");
        let version = &crd.spec.versions[0];
        assert_eq!(version.name, "v1");
        assert!(version.subresources.as_ref().unwrap().status.is_some());
    }
}

mod resource_tests {
    use ray_operator::controller::instances::GroupSelector;
    use ray_operator::resources::common::{
        HEAD_GROUP_NAME, MANAGED_BY, MANAGED_BY_LABEL, NodeType, RAY_CLUSTER_LABEL,
        RAY_GROUP_LABEL, group_labels, head_service_name, instance_name_prefix,
    };

    #[test]
    fn test_group_labels() {
        let labels = group_labels("raycluster", "small-group", NodeType::Worker);
        assert_eq!(labels[RAY_CLUSTER_LABEL], "raycluster");
        assert_eq!(labels[RAY_GROUP_LABEL], "small-group");
        assert_eq!(labels["ray.io/node-type"], "worker");
        assert_eq!(labels[MANAGED_BY_LABEL], MANAGED_BY);
    }

    #[test]
    fn test_selector_round_trips_through_labels() {
        let selector = GroupSelector::new("raycluster", "small-group");
        assert_eq!(
            selector.to_label_selector(),
            "ray.io/cluster=raycluster,ray.io/group=small-group"
        );
        assert!(!selector.is_head());
        assert!(GroupSelector::head("raycluster").is_head());
        assert_eq!(GroupSelector::head("raycluster").group, HEAD_GROUP_NAME);
    }

    #[test]
    fn test_instance_name_prefixes() {
        assert_eq!(
            instance_name_prefix("raycluster", HEAD_GROUP_NAME, NodeType::Head),
            "raycluster-head-"
        );
        assert_eq!(
            instance_name_prefix("raycluster", "small-group", NodeType::Worker),
            "raycluster-small-group-worker-"
        );
    }

    #[test]
    fn test_head_service_name_within_dns_limit() {
        assert_eq!(head_service_name("raycluster"), "raycluster-head-svc");
        let long = "a".repeat(80);
        let name = head_service_name(&long);
        assert!(name.len() <= 63);
        assert!(name.ends_with("-head-svc"));
    }
}

mod config_tests {
    use std::collections::HashMap;
    use std::time::Duration;

    use ray_operator::OperatorConfig;

    fn load(pairs: &[(&str, &str)]) -> OperatorConfig {
        let env: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        OperatorConfig::from_lookup(|key| env.get(key).cloned())
    }

    #[test]
    fn test_empty_environment_uses_defaults() {
        assert_eq!(load(&[]), OperatorConfig::default());
    }

    #[test]
    fn test_watch_namespace_and_timeouts() {
        let config = load(&[
            ("WATCH_NAMESPACE", "ray"),
            ("RECONCILE_TIMEOUT_SECS", "10"),
            ("RESYNC_INTERVAL_SECS", "60"),
        ]);
        assert_eq!(config.watch_namespace.as_deref(), Some("ray"));
        assert_eq!(config.reconcile_timeout, Duration::from_secs(10));
        assert_eq!(config.resync_interval, Duration::from_secs(60));
    }

    #[test]
    fn test_zero_status_retries_clamped() {
        assert_eq!(load(&[("STATUS_UPDATE_RETRIES", "0")]).status_update_retries, 1);
    }

    #[test]
    fn test_blank_namespace_means_cluster_wide() {
        assert_eq!(load(&[("WATCH_NAMESPACE", "  ")]).watch_namespace, None);
    }
}

mod error_tests {
    use std::time::Duration;

    use ray_operator::controller::error::Error;

    #[test]
    fn test_conflict_requeues_quickly() {
        let err = Error::Conflict { attempts: 3 };
        assert!(err.is_retryable());
        assert!(err.is_conflict());
        assert_eq!(err.requeue_after(), Duration::from_secs(1));
    }

    #[test]
    fn test_validation_not_retryable() {
        let err = Error::Validation("bad".to_string());
        assert!(!err.is_retryable());
        assert!(!err.is_not_found());
        assert_eq!(err.requeue_after(), Duration::from_secs(300));
    }

    #[test]
    fn test_timeout_display() {
        let err = Error::Timeout(Duration::from_secs(30));
        assert!(err.to_string().contains("30"));
        assert_eq!(err.requeue_after(), Duration::from_secs(10));
    }
}
