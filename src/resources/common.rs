//! Labels, selectors and naming shared by every resource the operator touches.
//!
//! Group membership is expressed purely through labels: an instance belongs
//! to a group when it carries the cluster and group labels below.

use std::collections::BTreeMap;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::{Resource, ResourceExt};

use crate::crd::RayCluster;

/// Label carrying the owning cluster's name.
pub const RAY_CLUSTER_LABEL: &str = "ray.io/cluster";

/// Label carrying the group name (`headgroup` for the head).
pub const RAY_GROUP_LABEL: &str = "ray.io/group";

/// Label carrying the node type (`head` or `worker`).
pub const RAY_NODE_TYPE_LABEL: &str = "ray.io/node-type";

/// Standard managed-by label.
pub const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";

/// Value of the managed-by label.
pub const MANAGED_BY: &str = "ray-operator";

/// Reserved group name for the head instance.
pub const HEAD_GROUP_NAME: &str = "headgroup";

/// Role of an instance within the cluster.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum NodeType {
    Head,
    Worker,
}

impl NodeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeType::Head => "head",
            NodeType::Worker => "worker",
        }
    }
}

impl std::fmt::Display for NodeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Labels applied to every instance of a group.
pub fn group_labels(cluster_name: &str, group: &str, node_type: NodeType) -> BTreeMap<String, String> {
    let mut labels = BTreeMap::new();
    labels.insert(RAY_CLUSTER_LABEL.to_string(), cluster_name.to_string());
    labels.insert(RAY_GROUP_LABEL.to_string(), group.to_string());
    labels.insert(RAY_NODE_TYPE_LABEL.to_string(), node_type.as_str().to_string());
    labels.insert(MANAGED_BY_LABEL.to_string(), MANAGED_BY.to_string());
    labels
}

/// Controller owner reference pointing at the cluster, so the garbage
/// collector removes instances when the cluster is deleted.
pub fn owner_reference(cluster: &RayCluster) -> OwnerReference {
    cluster
        .controller_owner_ref(&())
        .unwrap_or_else(|| OwnerReference {
            api_version: RayCluster::api_version(&()).to_string(),
            kind: RayCluster::kind(&()).to_string(),
            name: cluster.name_any(),
            uid: cluster.uid().unwrap_or_default(),
            controller: Some(true),
            block_owner_deletion: Some(true),
        })
}

/// Endpoint name clients use to reach the head of `cluster_name`.
///
/// Stable for the life of the cluster and kept within the 63 character
/// DNS label limit.
pub fn head_service_name(cluster_name: &str) -> String {
    const SUFFIX: &str = "-head-svc";
    const MAX_LEN: usize = 63;
    let room = MAX_LEN - SUFFIX.len();
    let prefix: String = cluster_name.chars().take(room).collect();
    format!("{}{}", prefix.trim_end_matches('-'), SUFFIX)
}

/// `generateName` prefix for instances of a group.
pub fn instance_name_prefix(cluster_name: &str, group: &str, node_type: NodeType) -> String {
    match node_type {
        NodeType::Head => format!("{}-head-", cluster_name),
        NodeType::Worker => format!("{}-{}-worker-", cluster_name, group),
    }
}
