//! Status management utilities.
//!
//! Status is recomputed from scratch every pass. The only thing carried over
//! from the previously written status is each condition's transition time,
//! and only while the condition's status stays the same, so repeated passes
//! over an unchanged world produce an identical status.

use crate::controller::cluster_state::ObservedCluster;
use crate::controller::desired_state::GroupTarget;
use crate::controller::instances::count_healthy;
use crate::crd::{
    ClusterState, Condition, HeadInfo, RayCluster, RayClusterStatus, WorkerGroupSpec,
};
use crate::resources::common::head_service_name;
use kube::ResourceExt;

/// Builder for managing conditions list
pub struct ConditionBuilder {
    conditions: Vec<Condition>,
}

impl ConditionBuilder {
    /// Create a new condition builder
    pub fn new() -> Self {
        Self {
            conditions: Vec::new(),
        }
    }

    /// Add or update a condition
    pub fn set(&mut self, condition: Condition) -> &mut Self {
        // Find and replace existing condition of same type
        if let Some(existing) = self
            .conditions
            .iter_mut()
            .find(|c| c.r#type == condition.r#type)
        {
            *existing = condition;
        } else {
            self.conditions.push(condition);
        }
        self
    }

    /// Set Ready condition
    pub fn ready(
        &mut self,
        ready: bool,
        reason: &str,
        message: &str,
        generation: Option<i64>,
    ) -> &mut Self {
        self.set(Condition::ready(ready, reason, message, generation))
    }

    /// Set Suspended condition
    pub fn suspended(
        &mut self,
        suspended: bool,
        reason: &str,
        message: &str,
        generation: Option<i64>,
    ) -> &mut Self {
        self.set(Condition::suspended(suspended, reason, message, generation))
    }

    /// Build the conditions list, keeping transition times from `previous`
    /// for conditions whose status did not change.
    pub fn build_with_previous(self, previous: &[Condition]) -> Vec<Condition> {
        self.conditions
            .into_iter()
            .map(|mut condition| {
                if let Some(old) = previous
                    .iter()
                    .find(|c| c.r#type == condition.r#type && c.status == condition.status)
                {
                    condition.last_transition_time = old.last_transition_time.clone();
                }
                condition
            })
            .collect()
    }

    /// Build the conditions list
    pub fn build(self) -> Vec<Condition> {
        self.conditions
    }
}

impl Default for ConditionBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Check if a condition type is true
pub fn is_condition_true(conditions: &[Condition], condition_type: &str) -> bool {
    conditions
        .iter()
        .find(|c| c.r#type == condition_type)
        .is_some_and(|c| c.status == "True")
}

/// Get the reason for a condition
pub fn get_condition_reason<'a>(
    conditions: &'a [Condition],
    condition_type: &str,
) -> Option<&'a str> {
    conditions
        .iter()
        .find(|c| c.r#type == condition_type)
        .map(|c| c.reason.as_str())
}

fn to_i32(n: usize) -> i32 {
    i32::try_from(n).unwrap_or(i32::MAX)
}

/// Compute the status for `cluster` from what was observed this pass.
///
/// `groups` are the worker groups the pass manages; skipped groups do not
/// contribute to replica totals.
pub fn build_status(
    cluster: &RayCluster,
    groups: &[&WorkerGroupSpec],
    observed: &ObservedCluster,
) -> RayClusterStatus {
    let suspend = cluster.spec.is_suspended();
    let generation = cluster.metadata.generation;
    let state = observed.evaluate(suspend);

    let desired_worker_replicas = if suspend {
        0
    } else {
        groups
            .iter()
            .map(|g| to_i32(GroupTarget::from_worker_group(g).desired_instances()))
            .fold(0i32, i32::saturating_add)
    };
    let available_worker_replicas = observed
        .workers
        .values()
        .map(|instances| to_i32(count_healthy(instances)))
        .fold(0i32, i32::saturating_add);
    let min_worker_replicas = groups
        .iter()
        .map(|g| g.min_replicas.max(0).saturating_mul(g.hosts()))
        .fold(0i32, i32::saturating_add);
    let max_worker_replicas = groups
        .iter()
        .map(|g| g.max_replicas.max(0).saturating_mul(g.hosts()))
        .fold(0i32, i32::saturating_add);

    let head = HeadInfo {
        pod_name: observed.live_head().map(|i| i.name.clone()),
        service_name: head_service_name(&cluster.name_any()),
    };

    let mut conditions = ConditionBuilder::new();
    match state {
        ClusterState::Ready => conditions.ready(
            true,
            "AllInstancesReady",
            "Head and all worker instances are running and ready",
            generation,
        ),
        ClusterState::Suspended => conditions.ready(
            false,
            "Suspended",
            "Cluster is suspended",
            generation,
        ),
        ClusterState::Unready => conditions.ready(
            false,
            "InstancesNotReady",
            &format!(
                "{}/{} worker instances ready",
                available_worker_replicas, desired_worker_replicas
            ),
            generation,
        ),
    };
    match (suspend, state) {
        (true, ClusterState::Suspended) => conditions.suspended(
            true,
            "Suspended",
            "All instances have been removed",
            generation,
        ),
        (true, _) => conditions.suspended(
            false,
            "Suspending",
            &format!("{} instances remaining", observed.total_instances()),
            generation,
        ),
        (false, _) => conditions.suspended(false, "NotSuspended", "", generation),
    };

    let previous = cluster
        .status
        .as_ref()
        .map(|s| s.conditions.as_slice())
        .unwrap_or_default();

    RayClusterStatus {
        state,
        desired_worker_replicas,
        available_worker_replicas,
        min_worker_replicas,
        max_worker_replicas,
        head: Some(head),
        observed_generation: generation,
        conditions: conditions.build_with_previous(previous),
    }
}

/// Whether `status` differs from what is already stored on `cluster`.
pub fn status_changed(cluster: &RayCluster, status: &RayClusterStatus) -> bool {
    cluster.status.as_ref() != Some(status)
}
