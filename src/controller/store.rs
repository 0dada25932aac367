//! The store the reconciler reads from and writes to.
//!
//! [`ClusterStore`] is the narrow surface a reconciliation pass needs:
//! read one cluster, list a group's instances, create and delete instances,
//! compare-and-swap the status, and publish events. [`KubeStore`] backs it
//! with the Kubernetes API. Tests back it with an in-memory store.
//!
//! Outcomes that are success for an idempotent caller (already exists,
//! not found, version conflict) come back as enum values, not errors.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Pod;
use kube::api::{DeleteParams, ListParams, PostParams};
use kube::runtime::events::{Event, EventType, Recorder, Reporter};
use kube::{Api, Client, Resource, ResourceExt};
use tracing::{debug, warn};

use crate::controller::error::{Error, Result};
use crate::controller::instances::{GroupSelector, Instance};
use crate::crd::{RayCluster, RayClusterStatus};

/// Field manager name for the operator
pub const FIELD_MANAGER: &str = "ray-operator";

/// Identity of one cluster.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClusterKey {
    pub namespace: String,
    pub name: String,
}

impl ClusterKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Key of a cluster object. Cluster-scoped objects land in "default".
    pub fn of(cluster: &RayCluster) -> Self {
        Self {
            namespace: cluster.namespace().unwrap_or_else(|| "default".to_string()),
            name: cluster.name_any(),
        }
    }
}

impl std::fmt::Display for ClusterKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Result of creating an instance.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CreateOutcome {
    /// Created under the given name.
    Created(String),
    /// An instance with that name already exists.
    AlreadyExists,
}

/// Result of deleting an instance.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeleteOutcome {
    Deleted,
    /// Already gone.
    NotFound,
}

/// Result of a compare-and-swap status write.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StatusWrite {
    Written,
    /// The stored version moved on since the cluster was read.
    Conflict,
    /// The cluster no longer exists.
    Gone,
}

/// Event severity.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EventKind {
    Normal,
    Warning,
}

/// An event about a cluster.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClusterEvent {
    pub kind: EventKind,
    pub reason: String,
    pub action: String,
    pub note: Option<String>,
}

impl ClusterEvent {
    pub fn normal(reason: &str, action: &str, note: impl Into<String>) -> Self {
        Self {
            kind: EventKind::Normal,
            reason: reason.to_string(),
            action: action.to_string(),
            note: Some(note.into()),
        }
    }

    pub fn warning(reason: &str, action: &str, note: impl Into<String>) -> Self {
        Self {
            kind: EventKind::Warning,
            reason: reason.to_string(),
            action: action.to_string(),
            note: Some(note.into()),
        }
    }
}

/// Everything a reconciliation pass needs from the outside world.
#[async_trait]
pub trait ClusterStore: Send + Sync {
    /// Read one cluster. `None` when it does not exist.
    async fn get_cluster(&self, key: &ClusterKey) -> Result<Option<RayCluster>>;

    /// List the instances of one group.
    async fn list_instances(&self, namespace: &str, selector: &GroupSelector)
    -> Result<Vec<Instance>>;

    /// Create an instance from a fully rendered pod.
    async fn create_instance(&self, namespace: &str, pod: Pod) -> Result<CreateOutcome>;

    /// Delete an instance by name.
    async fn delete_instance(&self, namespace: &str, name: &str) -> Result<DeleteOutcome>;

    /// Replace the status of `cluster`, expecting its resource version to
    /// still be current.
    async fn update_status(
        &self,
        cluster: &RayCluster,
        status: &RayClusterStatus,
    ) -> Result<StatusWrite>;

    /// Publish an event. Failures are logged, never returned.
    async fn publish_event(&self, cluster: &RayCluster, event: ClusterEvent);
}

/// [`ClusterStore`] backed by the Kubernetes API.
#[derive(Clone)]
pub struct KubeStore {
    client: Client,
    reporter: Reporter,
}

impl KubeStore {
    pub fn new(client: Client, instance: Option<String>) -> Self {
        Self {
            client,
            reporter: Reporter {
                controller: FIELD_MANAGER.into(),
                instance,
            },
        }
    }

    fn pods(&self, namespace: &str) -> Api<Pod> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn clusters(&self, namespace: &str) -> Api<RayCluster> {
        Api::namespaced(self.client.clone(), namespace)
    }

    /// Create an event recorder for publishing Kubernetes events
    fn recorder(&self) -> Recorder {
        Recorder::new(self.client.clone(), self.reporter.clone())
    }
}

fn api_code(error: &kube::Error) -> Option<u16> {
    match error {
        kube::Error::Api(e) => Some(e.code),
        _ => None,
    }
}

#[async_trait]
impl ClusterStore for KubeStore {
    async fn get_cluster(&self, key: &ClusterKey) -> Result<Option<RayCluster>> {
        self.clusters(&key.namespace)
            .get_opt(&key.name)
            .await
            .map_err(Error::from_api)
    }

    async fn list_instances(
        &self,
        namespace: &str,
        selector: &GroupSelector,
    ) -> Result<Vec<Instance>> {
        let params = ListParams::default().labels(&selector.to_label_selector());
        let pods = self
            .pods(namespace)
            .list(&params)
            .await
            .map_err(Error::from_api)?;
        Ok(pods.items.iter().filter_map(Instance::from_pod).collect())
    }

    async fn create_instance(&self, namespace: &str, pod: Pod) -> Result<CreateOutcome> {
        let params = PostParams {
            field_manager: Some(FIELD_MANAGER.to_string()),
            ..Default::default()
        };
        match self.pods(namespace).create(&params, &pod).await {
            Ok(created) => created
                .metadata
                .name
                .map(CreateOutcome::Created)
                .ok_or_else(|| Error::MissingField("metadata.name".to_string())),
            Err(e) if api_code(&e) == Some(409) => Ok(CreateOutcome::AlreadyExists),
            Err(e) => Err(Error::from_api(e)),
        }
    }

    async fn delete_instance(&self, namespace: &str, name: &str) -> Result<DeleteOutcome> {
        match self
            .pods(namespace)
            .delete(name, &DeleteParams::default())
            .await
        {
            Ok(_) => Ok(DeleteOutcome::Deleted),
            Err(e) if api_code(&e) == Some(404) => Ok(DeleteOutcome::NotFound),
            Err(e) => Err(Error::from_api(e)),
        }
    }

    async fn update_status(
        &self,
        cluster: &RayCluster,
        status: &RayClusterStatus,
    ) -> Result<StatusWrite> {
        let key = ClusterKey::of(cluster);
        // The resourceVersion carried in the body makes this a compare-and-swap.
        let mut desired = cluster.clone();
        desired.status = Some(status.clone());
        serde_json::to_vec(&desired)?;

        match self
            .clusters(&key.namespace)
            .replace_status(&key.name, &PostParams::default(), &desired)
            .await
        {
            Ok(_) => {
                debug!(cluster = %key, state = %status.state, "Status updated");
                Ok(StatusWrite::Written)
            }
            Err(e) if api_code(&e) == Some(409) => Ok(StatusWrite::Conflict),
            Err(e) if api_code(&e) == Some(404) => Ok(StatusWrite::Gone),
            Err(e) => Err(Error::from_api(e)),
        }
    }

    async fn publish_event(&self, cluster: &RayCluster, event: ClusterEvent) {
        let recorder = self.recorder();
        let object_ref = cluster.object_ref(&());
        let type_ = match event.kind {
            EventKind::Normal => EventType::Normal,
            EventKind::Warning => EventType::Warning,
        };
        if let Err(e) = recorder
            .publish(
                &Event {
                    type_,
                    reason: event.reason.clone(),
                    note: event.note,
                    action: event.action,
                    secondary: None,
                },
                &object_ref,
            )
            .await
        {
            warn!(reason = %event.reason, error = %e, "Failed to publish event");
        }
    }
}
