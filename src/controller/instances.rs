//! Observed instances and group membership.
//!
//! An [`Instance`] is the operator's view of one pod: identity, phase,
//! readiness and whether deletion is already in progress. Only the fields
//! that drive counting and health decisions are kept.

use jiff::Timestamp;
use k8s_openapi::api::core::v1::Pod;
use kube::ResourceExt;

use crate::resources::common::{HEAD_GROUP_NAME, RAY_CLUSTER_LABEL, RAY_GROUP_LABEL};

/// Pod phase as reported by the kubelet.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum InstancePhase {
    #[default]
    Pending,
    Running,
    Succeeded,
    Failed,
    Unknown,
}

impl InstancePhase {
    /// Parse the `status.phase` string of a pod. Missing phase means Pending.
    pub fn parse(phase: Option<&str>) -> Self {
        match phase {
            None | Some("Pending") => InstancePhase::Pending,
            Some("Running") => InstancePhase::Running,
            Some("Succeeded") => InstancePhase::Succeeded,
            Some("Failed") => InstancePhase::Failed,
            Some(_) => InstancePhase::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            InstancePhase::Pending => "Pending",
            InstancePhase::Running => "Running",
            InstancePhase::Succeeded => "Succeeded",
            InstancePhase::Failed => "Failed",
            InstancePhase::Unknown => "Unknown",
        }
    }
}

impl std::fmt::Display for InstancePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One observed instance of a group.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Instance {
    pub name: String,
    pub phase: InstancePhase,
    /// The pod's Ready condition is True.
    pub ready: bool,
    /// A deletion timestamp is set.
    pub terminating: bool,
    pub created_at: Option<Timestamp>,
}

impl Instance {
    /// A fresh, Pending instance. Mostly useful in tests.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            phase: InstancePhase::Pending,
            ready: false,
            terminating: false,
            created_at: None,
        }
    }

    pub fn with_phase(mut self, phase: InstancePhase) -> Self {
        self.phase = phase;
        self
    }

    pub fn with_ready(mut self, ready: bool) -> Self {
        self.ready = ready;
        self
    }

    pub fn with_terminating(mut self, terminating: bool) -> Self {
        self.terminating = terminating;
        self
    }

    pub fn with_created_at(mut self, created_at: Timestamp) -> Self {
        self.created_at = Some(created_at);
        self
    }

    /// Build from a pod. Pods without a name are not addressable and are skipped.
    pub fn from_pod(pod: &Pod) -> Option<Self> {
        let name = pod.metadata.name.clone()?;
        let status = pod.status.as_ref();
        let phase = InstancePhase::parse(status.and_then(|s| s.phase.as_deref()));
        let ready = status
            .and_then(|s| s.conditions.as_ref())
            .is_some_and(|conditions| {
                conditions
                    .iter()
                    .any(|c| c.type_ == "Ready" && c.status == "True")
            });
        Some(Self {
            name,
            phase,
            ready,
            terminating: pod.metadata.deletion_timestamp.is_some(),
            created_at: pod.metadata.creation_timestamp.as_ref().map(|t| t.0),
        })
    }

    /// Counts toward the group: Pending or Running and not being deleted.
    pub fn is_live(&self) -> bool {
        !self.terminating
            && matches!(self.phase, InstancePhase::Pending | InstancePhase::Running)
    }

    /// Finished or failed and not yet being deleted. Never counts toward a group.
    pub fn is_dead(&self) -> bool {
        !self.terminating
            && matches!(
                self.phase,
                InstancePhase::Succeeded | InstancePhase::Failed | InstancePhase::Unknown
            )
    }

    /// Running with the Ready condition set.
    pub fn is_healthy(&self) -> bool {
        self.phase == InstancePhase::Running && self.ready
    }
}

/// Selects the instances of one group of one cluster.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct GroupSelector {
    pub cluster: String,
    pub group: String,
}

impl GroupSelector {
    pub fn new(cluster: impl Into<String>, group: impl Into<String>) -> Self {
        Self {
            cluster: cluster.into(),
            group: group.into(),
        }
    }

    /// Selector for the head group.
    pub fn head(cluster: impl Into<String>) -> Self {
        Self::new(cluster, HEAD_GROUP_NAME)
    }

    pub fn is_head(&self) -> bool {
        self.group == HEAD_GROUP_NAME
    }

    /// Render as a Kubernetes label selector.
    pub fn to_label_selector(&self) -> String {
        format!(
            "{}={},{}={}",
            RAY_CLUSTER_LABEL, self.cluster, RAY_GROUP_LABEL, self.group
        )
    }

    /// Whether a pod carries this group's membership labels.
    pub fn matches(&self, pod: &Pod) -> bool {
        let labels = pod.labels();
        labels.get(RAY_CLUSTER_LABEL) == Some(&self.cluster)
            && labels.get(RAY_GROUP_LABEL) == Some(&self.group)
    }
}

impl std::fmt::Display for GroupSelector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_label_selector())
    }
}

/// Instances of a group split by how they count.
#[derive(Debug, Default)]
pub struct Partition<'a> {
    pub live: Vec<&'a Instance>,
    pub terminating: Vec<&'a Instance>,
    pub dead: Vec<&'a Instance>,
}

/// Split observed instances into live, terminating and dead.
pub fn partition(instances: &[Instance]) -> Partition<'_> {
    let mut out = Partition::default();
    for instance in instances {
        if instance.terminating {
            out.terminating.push(instance);
        } else if instance.is_live() {
            out.live.push(instance);
        } else {
            out.dead.push(instance);
        }
    }
    out
}

/// Number of live instances.
pub fn count_live(instances: &[Instance]) -> usize {
    instances.iter().filter(|i| i.is_live()).count()
}

/// Number of live instances that are Running and ready.
pub fn count_healthy(instances: &[Instance]) -> usize {
    instances
        .iter()
        .filter(|i| i.is_live() && i.is_healthy())
        .count()
}
