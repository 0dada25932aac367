//! RayCluster Custom Resource Definition.
//!
//! A RayCluster is one head group and any number of worker groups. The spec is
//! written by users and autoscalers; the status is owned by the operator and is
//! recomputed from scratch on every reconciliation pass.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::PodTemplateSpec;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// RayCluster is a custom resource for running a Ray cluster on Kubernetes.
///
/// Example:
/// ```yaml
/// apiVersion: ray.io/v1
/// kind: RayCluster
/// metadata:
///   name: raycluster-sample
/// spec:
///   headGroupSpec:
///     rayStartParams: {}
///     template:
///       spec:
///         containers:
///           - name: ray-head
///             image: rayproject/ray:2.9.0
///   workerGroupSpecs:
///     - groupName: small-group
///       replicas: 3
///       minReplicas: 0
///       maxReplicas: 4
///       rayStartParams: {}
///       template:
///         spec:
///           containers:
///             - name: ray-worker
///               image: rayproject/ray:2.9.0
/// ```
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "ray.io",
    version = "v1",
    kind = "RayCluster",
    plural = "rayclusters",
    shortname = "rc",
    status = "RayClusterStatus",
    namespaced,
    printcolumn = r#"{"name":"State", "type":"string", "jsonPath":".status.state"}"#,
    printcolumn = r#"{"name":"Desired Workers", "type":"integer", "jsonPath":".status.desiredWorkerReplicas"}"#,
    printcolumn = r#"{"name":"Available Workers", "type":"integer", "jsonPath":".status.availableWorkerReplicas"}"#,
    printcolumn = r#"{"name":"Suspend", "type":"boolean", "jsonPath":".spec.suspend"}"#,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct RayClusterSpec {
    /// The head group. Exactly one head instance runs unless suspended.
    pub head_group_spec: HeadGroupSpec,

    /// Worker groups, keyed by `groupName`.
    #[serde(default)]
    pub worker_group_specs: Vec<WorkerGroupSpec>,

    /// Whether an in-tree autoscaler manages this cluster.
    /// Informational only: replica clamping applies either way.
    #[serde(default, skip_serializing_if = "TriState::is_unset")]
    #[schemars(with = "Option<bool>")]
    pub enable_in_tree_autoscaling: TriState,

    /// Suspend drives every group to zero instances while true.
    #[serde(default, skip_serializing_if = "TriState::is_unset")]
    #[schemars(with = "Option<bool>")]
    pub suspend: TriState,
}

impl RayClusterSpec {
    /// Whether the cluster is suspended. Unset behaves as false.
    pub fn is_suspended(&self) -> bool {
        self.suspend.is_true()
    }

    /// Look up a worker group by name.
    pub fn worker_group(&self, group_name: &str) -> Option<&WorkerGroupSpec> {
        self.worker_group_specs
            .iter()
            .find(|g| g.group_name == group_name)
    }
}

/// Head group specification. The head has no replica count.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct HeadGroupSpec {
    /// Pod template for the head instance.
    #[serde(default)]
    pub template: PodTemplateSpec,

    /// Parameters passed to `ray start` on the head.
    #[serde(default)]
    pub ray_start_params: BTreeMap<String, String>,
}

/// Worker group specification.
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct WorkerGroupSpec {
    /// Unique name of the group within the cluster.
    pub group_name: String,

    /// Desired number of logical replicas. Unset resolves to `minReplicas`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replicas: Option<i32>,

    /// Lower bound on replicas (default 0).
    #[serde(default)]
    pub min_replicas: i32,

    /// Upper bound on replicas, inclusive (default 2147483647).
    #[serde(default = "default_max_replicas")]
    pub max_replicas: i32,

    /// Instances per logical replica (default 1).
    #[serde(default = "default_num_of_hosts")]
    pub num_of_hosts: i32,

    /// Targeted scale-down requests, usually written by an autoscaler.
    #[serde(default)]
    pub scale_strategy: ScaleStrategy,

    /// Pod template for instances of this group.
    #[serde(default)]
    pub template: PodTemplateSpec,

    /// Parameters passed to `ray start` on each worker.
    #[serde(default)]
    pub ray_start_params: BTreeMap<String, String>,
}

impl WorkerGroupSpec {
    /// Create a group with the given name and defaults for everything else.
    pub fn new(group_name: impl Into<String>) -> Self {
        Self {
            group_name: group_name.into(),
            replicas: None,
            min_replicas: 0,
            max_replicas: default_max_replicas(),
            num_of_hosts: default_num_of_hosts(),
            scale_strategy: ScaleStrategy::default(),
            template: PodTemplateSpec::default(),
            ray_start_params: BTreeMap::new(),
        }
    }

    /// Replica count as written, falling back to `minReplicas` when unset.
    pub fn requested_replicas(&self) -> i32 {
        self.replicas.unwrap_or(self.min_replicas)
    }

    /// `numOfHosts` normalized to at least one.
    pub fn hosts(&self) -> i32 {
        self.num_of_hosts.max(1)
    }

    /// Instance names nominated for removal.
    pub fn workers_to_delete(&self) -> &[String] {
        &self.scale_strategy.workers_to_delete
    }
}

fn default_max_replicas() -> i32 {
    i32::MAX
}

fn default_num_of_hosts() -> i32 {
    1
}

/// Scale strategy for a worker group.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ScaleStrategy {
    /// Instance names an external actor wants removed. Entries naming
    /// instances that no longer exist are ignored.
    #[serde(default)]
    pub workers_to_delete: Vec<String>,
}

/// A boolean that distinguishes "not set" from an explicit value.
///
/// Serialized as `null`/absent, `true` or `false`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(from = "Option<bool>", into = "Option<bool>")]
pub enum TriState {
    #[default]
    Unset,
    True,
    False,
}

impl TriState {
    /// True only for an explicit `true`.
    pub fn is_true(&self) -> bool {
        matches!(self, TriState::True)
    }

    pub fn is_unset(&self) -> bool {
        matches!(self, TriState::Unset)
    }

    /// Resolve to a plain bool, using `default` when unset.
    pub fn unwrap_or(self, default: bool) -> bool {
        match self {
            TriState::Unset => default,
            TriState::True => true,
            TriState::False => false,
        }
    }
}

impl From<Option<bool>> for TriState {
    fn from(value: Option<bool>) -> Self {
        match value {
            None => TriState::Unset,
            Some(true) => TriState::True,
            Some(false) => TriState::False,
        }
    }
}

impl From<TriState> for Option<bool> {
    fn from(value: TriState) -> Self {
        match value {
            TriState::Unset => None,
            TriState::True => Some(true),
            TriState::False => Some(false),
        }
    }
}

impl From<bool> for TriState {
    fn from(value: bool) -> Self {
        Some(value).into()
    }
}

/// Status of a RayCluster.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RayClusterStatus {
    /// Reported lifecycle state.
    #[serde(default)]
    pub state: ClusterState,

    /// Worker instances the spec currently asks for.
    #[serde(default)]
    pub desired_worker_replicas: i32,

    /// Live worker instances that are Running and ready.
    #[serde(default)]
    pub available_worker_replicas: i32,

    /// Sum of `minReplicas × numOfHosts` over all worker groups.
    #[serde(default)]
    pub min_worker_replicas: i32,

    /// Sum of `maxReplicas × numOfHosts` over all worker groups (saturating).
    #[serde(default)]
    pub max_worker_replicas: i32,

    /// Head instance details.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub head: Option<HeadInfo>,

    /// The generation most recently observed by the controller.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,

    /// Conditions describing the current state.
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

/// Head instance details reported in status.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct HeadInfo {
    /// Name of the live head pod, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pod_name: Option<String>,

    /// Endpoint name clients use to reach the head.
    pub service_name: String,
}

/// ClusterState is the lifecycle state reported in `status.state`.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum ClusterState {
    /// Head and every worker are Running and ready.
    Ready,
    /// Suspended and no instances remain.
    Suspended,
    /// Anything else: starting, scaling, suspending, recovering.
    #[default]
    Unready,
}

impl ClusterState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClusterState::Ready => "ready",
            ClusterState::Suspended => "suspended",
            ClusterState::Unready => "unready",
        }
    }
}

impl std::fmt::Display for ClusterState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Condition describes the state of a cluster at a certain point.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Type of condition.
    pub r#type: String,
    /// Status of the condition ("True", "False", "Unknown").
    pub status: String,
    /// Machine-readable reason for the condition's last transition.
    pub reason: String,
    /// Human-readable message indicating details about last transition.
    pub message: String,
    /// Last time the condition transitioned from one status to another.
    pub last_transition_time: String,
    /// The generation of the resource this condition was observed for.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
}

impl Condition {
    /// Create a new condition stamped with the current time.
    pub fn new(
        condition_type: &str,
        status: bool,
        reason: &str,
        message: &str,
        generation: Option<i64>,
    ) -> Self {
        Self {
            r#type: condition_type.to_string(),
            status: if status {
                "True".to_string()
            } else {
                "False".to_string()
            },
            reason: reason.to_string(),
            message: message.to_string(),
            last_transition_time: jiff::Timestamp::now().to_string(),
            observed_generation: generation,
        }
    }

    /// Create a "Ready" condition.
    pub fn ready(ready: bool, reason: &str, message: &str, generation: Option<i64>) -> Self {
        Self::new(ConditionType::Ready.as_str(), ready, reason, message, generation)
    }

    /// Create a "Suspended" condition.
    pub fn suspended(suspended: bool, reason: &str, message: &str, generation: Option<i64>) -> Self {
        Self::new(
            ConditionType::Suspended.as_str(),
            suspended,
            reason,
            message,
            generation,
        )
    }

    pub fn is_true(&self) -> bool {
        self.status == "True"
    }
}

/// Types of conditions for RayCluster.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Deserialize, Serialize, JsonSchema)]
pub enum ConditionType {
    /// Head and all workers are Running and ready.
    Ready,
    /// The cluster is suspended and fully scaled to zero.
    Suspended,
}

impl ConditionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConditionType::Ready => "Ready",
            ConditionType::Suspended => "Suspended",
        }
    }
}

impl std::fmt::Display for ConditionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
