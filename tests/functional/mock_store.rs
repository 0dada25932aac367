//! In-memory store for running whole reconciliation passes without a cluster.
//!
//! `MockStore` implements `ClusterStore` the way the API server behaves for
//! the calls the reconciler makes:
//! - clusters carry a resource version and status writes are compare-and-swap
//! - pods get names from `generateName` and increasing creation times
//! - deletion is immediate, or graceful (the pod lingers as terminating)
//!
//! On top of that it can inject conflicts and failures, and it plays kubelet:
//! tests decide when pods start running, become ready, fail or finish
//! terminating.

use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use jiff::Timestamp;
use k8s_openapi::api::core::v1::{Pod, PodCondition, PodStatus};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::ResourceExt;

use ray_operator::controller::cluster_reconciler::{PassOutcome, PassReport, reconcile_pass};
use ray_operator::controller::error::{Error, Result};
use ray_operator::controller::instances::{GroupSelector, Instance};
use ray_operator::controller::store::{
    ClusterEvent, ClusterKey, ClusterStore, CreateOutcome, DeleteOutcome, StatusWrite,
};
use ray_operator::crd::{ClusterState, RayCluster, RayClusterSpec, RayClusterStatus};
use ray_operator::resources::DefaultTemplates;
use ray_operator::resources::common::HEAD_GROUP_NAME;

/// Base of the simulated clock, in seconds since the epoch.
const CLOCK_START: i64 = 1_700_000_000;

type SpecEdit = Box<dyn FnOnce(&mut RayClusterSpec) + Send>;

/// Calls made against the store since the last reset.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CallLog {
    pub creates: usize,
    pub deletes: usize,
    pub status_writes: usize,
}

impl CallLog {
    /// No instance was created or deleted.
    pub fn no_instance_changes(&self) -> bool {
        self.creates == 0 && self.deletes == 0
    }
}

#[derive(Default)]
struct Inner {
    clusters: BTreeMap<ClusterKey, RayCluster>,
    /// Pods keyed by (namespace, name).
    pods: BTreeMap<(String, String), Pod>,
    next_pod: u64,
    next_version: u64,
    calls: CallLog,
    events: Vec<(ClusterKey, ClusterEvent)>,
    graceful_deletion: bool,
    conflicts_to_inject: u32,
    /// Spec edit applied by the "other writer" on the next injected conflict.
    concurrent_edit: Option<SpecEdit>,
    create_failures: u32,
    failing_deletes: HashSet<String>,
    latency: Option<Duration>,
}

impl Inner {
    fn bump_version(&mut self) -> String {
        self.next_version += 1;
        self.next_version.to_string()
    }
}

/// In-memory `ClusterStore`.
#[derive(Default)]
pub struct MockStore {
    inner: Mutex<Inner>,
}

impl MockStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap()
    }

    // ------------------------------------------------------------------
    // Cluster objects
    // ------------------------------------------------------------------

    /// Store a cluster as if a user applied it. Returns its key.
    pub fn apply(&self, mut cluster: RayCluster) -> ClusterKey {
        if cluster.metadata.namespace.is_none() {
            cluster.metadata.namespace = Some("default".to_string());
        }
        if cluster.metadata.uid.is_none() {
            cluster.metadata.uid = Some(format!("uid-{}", cluster.name_any()));
        }
        cluster.metadata.generation = Some(cluster.metadata.generation.unwrap_or(1));
        let key = ClusterKey::of(&cluster);
        let mut inner = self.lock();
        cluster.metadata.resource_version = Some(inner.bump_version());
        inner.clusters.insert(key.clone(), cluster);
        key
    }

    /// Edit a cluster's spec the way a user or autoscaler would.
    pub fn edit_spec(&self, key: &ClusterKey, edit: impl FnOnce(&mut RayClusterSpec)) {
        let mut inner = self.lock();
        let version = inner.bump_version();
        let cluster = inner.clusters.get_mut(key).unwrap();
        edit(&mut cluster.spec);
        cluster.metadata.generation = Some(cluster.metadata.generation.unwrap_or(0) + 1);
        cluster.metadata.resource_version = Some(version);
    }

    pub fn remove_cluster(&self, key: &ClusterKey) {
        self.lock().clusters.remove(key);
    }

    pub fn cluster(&self, key: &ClusterKey) -> RayCluster {
        self.lock().clusters.get(key).cloned().unwrap()
    }

    pub fn status(&self, key: &ClusterKey) -> RayClusterStatus {
        self.cluster(key).status.unwrap_or_default()
    }

    pub fn state(&self, key: &ClusterKey) -> ClusterState {
        self.status(key).state
    }

    // ------------------------------------------------------------------
    // Pods
    // ------------------------------------------------------------------

    fn pods_matching(&self, key: &ClusterKey, group: &str) -> Vec<Pod> {
        let selector = GroupSelector::new(&key.name, group);
        self.lock()
            .pods
            .iter()
            .filter(|((ns, _), pod)| *ns == key.namespace && selector.matches(pod))
            .map(|(_, pod)| pod.clone())
            .collect()
    }

    /// Names of every pod of a group, terminating ones included.
    pub fn pod_names(&self, key: &ClusterKey, group: &str) -> Vec<String> {
        self.pods_matching(key, group)
            .iter()
            .map(|p| p.name_any())
            .collect()
    }

    /// Pods of a group that are not terminating.
    pub fn live_pod_names(&self, key: &ClusterKey, group: &str) -> Vec<String> {
        self.pods_matching(key, group)
            .iter()
            .filter(|p| p.metadata.deletion_timestamp.is_none())
            .map(|p| p.name_any())
            .collect()
    }

    pub fn live_workers(&self, key: &ClusterKey, group: &str) -> usize {
        self.live_pod_names(key, group).len()
    }

    pub fn live_heads(&self, key: &ClusterKey) -> usize {
        self.live_pod_names(key, HEAD_GROUP_NAME).len()
    }

    /// Every pod of a cluster, any group, terminating ones included.
    pub fn total_pods(&self, key: &ClusterKey) -> usize {
        self.lock()
            .pods
            .values()
            .filter(|p| p.labels().get("ray.io/cluster") == Some(&key.name))
            .count()
    }

    pub fn pod(&self, namespace: &str, name: &str) -> Option<Pod> {
        self.lock()
            .pods
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
    }

    /// Kubelet: set phase and readiness of one pod.
    pub fn set_pod_state(&self, namespace: &str, name: &str, phase: &str, ready: bool) {
        let mut inner = self.lock();
        let pod = inner
            .pods
            .get_mut(&(namespace.to_string(), name.to_string()))
            .unwrap();
        pod.status = Some(pod_status(phase, ready));
    }

    /// Kubelet: every non-terminating pod is Running and ready.
    pub fn run_all(&self) {
        for pod in self.lock().pods.values_mut() {
            if pod.metadata.deletion_timestamp.is_none() {
                pod.status = Some(pod_status("Running", true));
            }
        }
    }

    /// Kubelet: terminating pods finish shutting down.
    pub fn finish_terminations(&self) {
        self.lock()
            .pods
            .retain(|_, pod| pod.metadata.deletion_timestamp.is_none());
    }

    /// Someone deleted a pod behind the operator's back.
    pub fn delete_out_of_band(&self, namespace: &str, name: &str) {
        self.lock()
            .pods
            .remove(&(namespace.to_string(), name.to_string()));
    }

    // ------------------------------------------------------------------
    // Behavior switches and injection
    // ------------------------------------------------------------------

    /// Deleted pods linger as terminating until `finish_terminations`.
    pub fn set_graceful_deletion(&self, graceful: bool) {
        self.lock().graceful_deletion = graceful;
    }

    /// The next `n` status writes lose to a concurrent writer.
    pub fn inject_status_conflicts(&self, n: u32) {
        self.lock().conflicts_to_inject = n;
    }

    /// The next status write loses to a writer that also edits the spec.
    pub fn inject_conflicting_edit(&self, edit: impl FnOnce(&mut RayClusterSpec) + Send + 'static) {
        let mut inner = self.lock();
        inner.conflicts_to_inject = inner.conflicts_to_inject.max(1);
        inner.concurrent_edit = Some(Box::new(edit));
    }

    /// The next `n` pod creations fail.
    pub fn fail_next_creates(&self, n: u32) {
        self.lock().create_failures = n;
    }

    /// Deleting this pod fails until cleared.
    pub fn fail_deletes_of(&self, name: &str) {
        self.lock().failing_deletes.insert(name.to_string());
    }

    pub fn clear_delete_failures(&self) {
        self.lock().failing_deletes.clear();
    }

    /// Every cluster read takes this long.
    pub fn set_latency(&self, latency: Duration) {
        self.lock().latency = Some(latency);
    }

    // ------------------------------------------------------------------
    // Inspection
    // ------------------------------------------------------------------

    pub fn calls(&self) -> CallLog {
        self.lock().calls.clone()
    }

    pub fn reset_calls(&self) {
        self.lock().calls = CallLog::default();
    }

    /// Reasons of every event published for a cluster, oldest first.
    pub fn event_reasons(&self, key: &ClusterKey) -> Vec<String> {
        self.lock()
            .events
            .iter()
            .filter(|(k, _)| k == key)
            .map(|(_, e)| e.reason.clone())
            .collect()
    }
}

fn pod_status(phase: &str, ready: bool) -> PodStatus {
    PodStatus {
        phase: Some(phase.to_string()),
        conditions: Some(vec![PodCondition {
            type_: "Ready".to_string(),
            status: if ready { "True" } else { "False" }.to_string(),
            ..Default::default()
        }]),
        ..Default::default()
    }
}

#[async_trait]
impl ClusterStore for MockStore {
    async fn get_cluster(&self, key: &ClusterKey) -> Result<Option<RayCluster>> {
        let latency = self.lock().latency;
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        Ok(self.lock().clusters.get(key).cloned())
    }

    async fn list_instances(
        &self,
        namespace: &str,
        selector: &GroupSelector,
    ) -> Result<Vec<Instance>> {
        Ok(self
            .lock()
            .pods
            .iter()
            .filter(|((ns, _), pod)| ns == namespace && selector.matches(pod))
            .filter_map(|(_, pod)| Instance::from_pod(pod))
            .collect())
    }

    async fn create_instance(&self, namespace: &str, mut pod: Pod) -> Result<CreateOutcome> {
        let mut inner = self.lock();
        inner.calls.creates += 1;
        if inner.create_failures > 0 {
            inner.create_failures -= 1;
            return Err(Error::Transient("injected create failure".to_string()));
        }

        inner.next_pod += 1;
        let serial = inner.next_pod;
        let name = match (&pod.metadata.name, &pod.metadata.generate_name) {
            (Some(name), _) => name.clone(),
            (None, Some(prefix)) => format!("{}{:05}", prefix, serial),
            (None, None) => return Err(Error::MissingField("metadata.name".to_string())),
        };
        let slot = (namespace.to_string(), name.clone());
        if inner.pods.contains_key(&slot) {
            return Ok(CreateOutcome::AlreadyExists);
        }

        let created_at = Timestamp::from_second(CLOCK_START + serial as i64).unwrap();
        pod.metadata.name = Some(name.clone());
        pod.metadata.namespace = Some(namespace.to_string());
        pod.metadata.uid = Some(format!("pod-uid-{}", serial));
        pod.metadata.creation_timestamp = Some(Time(created_at));
        pod.status = Some(PodStatus {
            phase: Some("Pending".to_string()),
            ..Default::default()
        });
        inner.pods.insert(slot, pod);
        Ok(CreateOutcome::Created(name))
    }

    async fn delete_instance(&self, namespace: &str, name: &str) -> Result<DeleteOutcome> {
        let mut inner = self.lock();
        inner.calls.deletes += 1;
        if inner.failing_deletes.contains(name) {
            return Err(Error::Transient(format!("injected delete failure for {}", name)));
        }
        let slot = (namespace.to_string(), name.to_string());
        if inner.graceful_deletion {
            match inner.pods.get_mut(&slot) {
                Some(pod) => {
                    pod.metadata
                        .deletion_timestamp
                        .get_or_insert_with(|| Time(Timestamp::from_second(CLOCK_START).unwrap()));
                    Ok(DeleteOutcome::Deleted)
                }
                None => Ok(DeleteOutcome::NotFound),
            }
        } else {
            match inner.pods.remove(&slot) {
                Some(_) => Ok(DeleteOutcome::Deleted),
                None => Ok(DeleteOutcome::NotFound),
            }
        }
    }

    async fn update_status(
        &self,
        cluster: &RayCluster,
        status: &RayClusterStatus,
    ) -> Result<StatusWrite> {
        let key = ClusterKey::of(cluster);
        let mut inner = self.lock();
        inner.calls.status_writes += 1;

        if !inner.clusters.contains_key(&key) {
            return Ok(StatusWrite::Gone);
        }

        if inner.conflicts_to_inject > 0 {
            inner.conflicts_to_inject -= 1;
            let edit = inner.concurrent_edit.take();
            let version = inner.bump_version();
            let stored = inner.clusters.get_mut(&key).unwrap();
            if let Some(edit) = edit {
                edit(&mut stored.spec);
                stored.metadata.generation = Some(stored.metadata.generation.unwrap_or(0) + 1);
            }
            stored.metadata.resource_version = Some(version);
            return Ok(StatusWrite::Conflict);
        }

        let current = inner
            .clusters
            .get(&key)
            .and_then(|c| c.metadata.resource_version.clone());
        if current != cluster.metadata.resource_version {
            return Ok(StatusWrite::Conflict);
        }

        let version = inner.bump_version();
        let stored = inner.clusters.get_mut(&key).unwrap();
        stored.status = Some(status.clone());
        stored.metadata.resource_version = Some(version);
        Ok(StatusWrite::Written)
    }

    async fn publish_event(&self, cluster: &RayCluster, event: ClusterEvent) {
        self.lock().events.push((ClusterKey::of(cluster), event));
    }
}

/// A store, the default templates and one cluster under test.
pub struct TestEnv {
    pub store: Arc<MockStore>,
    pub templates: DefaultTemplates,
    pub key: ClusterKey,
    pub status_retries: u32,
}

impl TestEnv {
    pub fn new(cluster: RayCluster) -> Self {
        let store = Arc::new(MockStore::new());
        let key = store.apply(cluster);
        Self {
            store,
            templates: DefaultTemplates::new(),
            key,
            status_retries: 3,
        }
    }

    /// Run one pass, returning the raw result.
    pub async fn try_pass(&self) -> Result<PassOutcome> {
        reconcile_pass(
            self.store.as_ref(),
            &self.templates,
            &self.key,
            self.status_retries,
        )
        .await
    }

    /// Run one pass that is expected to succeed on a live cluster.
    pub async fn pass(&self) -> PassReport {
        match self.try_pass().await.unwrap() {
            PassOutcome::Reconciled(report) => report,
            PassOutcome::Gone => panic!("cluster {} unexpectedly gone", self.key),
        }
    }

    /// Alternate passes and kubelet steps until a pass changes nothing.
    /// Returns the number of passes that changed something.
    pub async fn settle(&self) -> usize {
        for round in 0..20 {
            self.store.reset_calls();
            self.pass().await;
            self.store.run_all();
            self.store.finish_terminations();
            if self.store.calls().no_instance_changes() {
                // One more pass so status reflects the kubelet's last step.
                self.pass().await;
                return round;
            }
        }
        panic!("cluster {} did not settle", self.key);
    }

    pub fn state(&self) -> ClusterState {
        self.store.state(&self.key)
    }

    pub fn workers(&self, group: &str) -> usize {
        self.store.live_workers(&self.key, group)
    }
}
