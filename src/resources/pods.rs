//! Instance templates for head and worker pods.
//!
//! The reconciler only knows how many instances to create; the pod it
//! creates comes from an [`InstanceTemplates`] implementation. The default
//! one starts from the group's pod template and layers on membership labels,
//! the owner reference, start parameters and any configured sidecars.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{Container, EnvVar, Pod, PodTemplateSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::ResourceExt;

use crate::crd::{RayCluster, WorkerGroupSpec};
use crate::resources::common::{
    HEAD_GROUP_NAME, NodeType, group_labels, head_service_name, instance_name_prefix,
    owner_reference,
};

/// Environment variable carrying rendered `ray start` parameters.
pub const RAY_START_PARAMS_ENV: &str = "RAY_START_PARAMS";

/// Environment variable carrying the head endpoint name.
pub const RAY_HEAD_SERVICE_ENV: &str = "RAY_HEAD_SERVICE";

/// Builds the pods the reconciler creates.
pub trait InstanceTemplates: Send + Sync {
    /// Pod for the head instance.
    fn head_instance(&self, cluster: &RayCluster) -> Pod;

    /// Pod for one instance of a worker group.
    fn worker_instance(&self, cluster: &RayCluster, group: &WorkerGroupSpec) -> Pod;
}

/// Template provider used by the operator binary.
#[derive(Clone, Debug, Default)]
pub struct DefaultTemplates {
    /// Containers appended to every head pod.
    pub head_sidecars: Vec<Container>,
    /// Containers appended to every worker pod.
    pub worker_sidecars: Vec<Container>,
}

impl DefaultTemplates {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a sidecar to head pods.
    pub fn with_head_sidecar(mut self, container: Container) -> Self {
        self.head_sidecars.push(container);
        self
    }

    /// Append a sidecar to worker pods.
    pub fn with_worker_sidecar(mut self, container: Container) -> Self {
        self.worker_sidecars.push(container);
        self
    }
}

impl InstanceTemplates for DefaultTemplates {
    fn head_instance(&self, cluster: &RayCluster) -> Pod {
        build_pod(
            cluster,
            &cluster.spec.head_group_spec.template,
            HEAD_GROUP_NAME,
            NodeType::Head,
            &cluster.spec.head_group_spec.ray_start_params,
            &self.head_sidecars,
        )
    }

    fn worker_instance(&self, cluster: &RayCluster, group: &WorkerGroupSpec) -> Pod {
        build_pod(
            cluster,
            &group.template,
            &group.group_name,
            NodeType::Worker,
            &group.ray_start_params,
            &self.worker_sidecars,
        )
    }
}

fn build_pod(
    cluster: &RayCluster,
    template: &PodTemplateSpec,
    group: &str,
    node_type: NodeType,
    start_params: &BTreeMap<String, String>,
    sidecars: &[Container],
) -> Pod {
    let cluster_name = cluster.name_any();
    let template_meta = template.metadata.clone().unwrap_or_default();

    // Membership labels win over anything in the template.
    let mut labels = template_meta.labels.unwrap_or_default();
    labels.extend(group_labels(&cluster_name, group, node_type));

    let mut spec = template.spec.clone().unwrap_or_default();
    let env = instance_env(&cluster_name, node_type, start_params);
    for container in spec.containers.iter_mut() {
        let vars = container.env.get_or_insert_with(Vec::new);
        for var in &env {
            if !vars.iter().any(|v| v.name == var.name) {
                vars.push(var.clone());
            }
        }
    }
    spec.containers.extend(sidecars.iter().cloned());

    Pod {
        metadata: ObjectMeta {
            generate_name: Some(instance_name_prefix(&cluster_name, group, node_type)),
            // Instances always live next to their cluster, whatever the template says.
            namespace: cluster.namespace(),
            labels: Some(labels),
            annotations: template_meta.annotations,
            owner_references: Some(vec![owner_reference(cluster)]),
            ..Default::default()
        },
        spec: Some(spec),
        status: None,
    }
}

fn instance_env(
    cluster_name: &str,
    node_type: NodeType,
    start_params: &BTreeMap<String, String>,
) -> Vec<EnvVar> {
    let mut env = vec![EnvVar {
        name: RAY_HEAD_SERVICE_ENV.to_string(),
        value: Some(head_service_name(cluster_name)),
        ..Default::default()
    }];
    let rendered = render_start_params(node_type, start_params);
    if !rendered.is_empty() {
        env.push(EnvVar {
            name: RAY_START_PARAMS_ENV.to_string(),
            value: Some(rendered),
            ..Default::default()
        });
    }
    env
}

/// Render start parameters as `--key=value` flags in key order.
pub fn render_start_params(node_type: NodeType, params: &BTreeMap<String, String>) -> String {
    let mut flags: Vec<String> = Vec::with_capacity(params.len() + 1);
    if node_type == NodeType::Head {
        flags.push("--head".to_string());
    }
    flags.extend(params.iter().map(|(k, v)| format!("--{}={}", k, v)));
    flags.join(" ")
}
