//! ray-operator library crate
//!
//! This module exports the controller, CRD definitions, configuration and
//! resource generators.

pub mod config;
pub mod controller;
pub mod crd;
pub mod health;
pub mod resources;

pub use config::OperatorConfig;
pub use health::HealthState;

use std::sync::Arc;

use futures::{Stream, StreamExt};
use k8s_openapi::api::core::v1::Pod;
use kube::runtime::controller::Config as ControllerConfig;
use kube::runtime::watcher::Config as WatcherConfig;
use kube::runtime::{Controller, PredicateConfig, WatchStreamExt, predicates, reflector, watcher};
use kube::{Api, Client, Resource};
use serde::de::DeserializeOwned;
use tracing::{debug, error, info};

use controller::cluster_reconciler::{error_policy, reconcile};
use controller::context::Context;
use crd::RayCluster;
use resources::DefaultTemplates;
use resources::common::{MANAGED_BY, MANAGED_BY_LABEL};

/// Create namespaced or cluster-wide API based on scope
pub fn scoped_api<T>(client: Client, namespace: Option<&str>) -> Api<T>
where
    T: Resource<Scope = k8s_openapi::NamespaceResourceScope>,
    <T as Resource>::DynamicType: Default,
    T: Clone + DeserializeOwned + std::fmt::Debug,
{
    match namespace {
        Some(ns) => Api::namespaced(client, ns),
        None => Api::all(client),
    }
}

/// Create the default watcher configuration for all controllers.
///
/// - `any_semantic()`: More reliable resource discovery in test environments
fn default_watcher_config() -> WatcherConfig {
    WatcherConfig::default().any_semantic()
}

/// Create a filtered stream for a resource type with standard optimizations.
///
/// This creates a reflector-backed stream that:
/// - Maintains an in-memory cache via reflector
/// - Uses automatic retry with exponential backoff on errors
/// - Converts watch events to objects (Added/Modified only)
/// - Filters out status-only updates via generation predicate
///
/// Returns the reflector store (for cache lookups) and the filtered stream.
fn create_filtered_stream<K>(
    api: Api<K>,
    watcher_config: WatcherConfig,
) -> (
    reflector::Store<K>,
    impl Stream<Item = Result<K, watcher::Error>>,
)
where
    K: Resource + Clone + DeserializeOwned + std::fmt::Debug + Send + 'static,
    K::DynamicType: Default + Eq + std::hash::Hash + Clone,
{
    let (reader, writer) = reflector::store();
    let stream = reflector(writer, watcher(api, watcher_config))
        .default_backoff()
        .applied_objects()
        .predicate_filter(predicates::generation, PredicateConfig::default());
    (reader, stream)
}

/// Run the RayCluster controller with the given configuration.
///
/// Watches RayClusters (filtered to spec changes) and the pods they own.
/// The kube runtime coalesces triggers per cluster and never runs two
/// passes for the same cluster at once. `config.watch_namespace` scopes
/// both watches to one namespace.
///
/// If health_state is provided, metrics will be recorded for reconciliations.
pub async fn run_controller(
    client: Client,
    config: OperatorConfig,
    templates: DefaultTemplates,
    health_state: Option<Arc<HealthState>>,
) {
    let namespace = config.watch_namespace.clone();
    let scope_msg = namespace.as_deref().unwrap_or("cluster-wide");
    info!(
        scope = scope_msg,
        concurrency = config.max_concurrent_reconciles,
        "Starting controller for RayCluster resources"
    );

    // Mark as ready once we start the controller
    if let Some(ref state) = health_state {
        state.set_ready(true).await;
    }

    let concurrency = config.max_concurrent_reconciles;
    let ctx = Arc::new(Context::new(
        client.clone(),
        config,
        templates,
        health_state,
    ));

    let clusters: Api<RayCluster> = scoped_api(client.clone(), namespace.as_deref());
    let pods: Api<Pod> = scoped_api(client, namespace.as_deref());

    let watcher_config = default_watcher_config();
    let (reader, cluster_stream) = create_filtered_stream(clusters, watcher_config.clone());

    // Pod phase and readiness changes must trigger a pass, so owned pods are
    // watched in full. The label filter keeps unrelated pods out of the cache.
    let pod_watcher_config =
        watcher_config.labels(&format!("{}={}", MANAGED_BY_LABEL, MANAGED_BY));

    Controller::for_stream(cluster_stream, reader)
        .owns(pods, pod_watcher_config)
        .with_config(ControllerConfig::default().concurrency(concurrency))
        .run(reconcile, error_policy, ctx)
        .for_each(|result| async move {
            match result {
                Ok((obj, _action)) => {
                    debug!("Reconciled: {}", obj.name);
                }
                Err(e) => {
                    // ObjectNotFound/NotFound errors are expected after deletion when
                    // related watch events trigger reconciliation for a deleted object.
                    // Log these at debug level instead of error.
                    let is_not_found = match &e {
                        kube::runtime::controller::Error::ObjectNotFound(_) => true,
                        kube::runtime::controller::Error::ReconcilerFailed(err, _) => {
                            err.is_not_found()
                        }
                        _ => false,
                    };
                    if is_not_found {
                        debug!("Object no longer exists (likely deleted): {:?}", e);
                    } else {
                        error!("Reconciliation error: {:?}", e);
                    }
                }
            }
        })
        .await;

    // This should never complete in normal operation
    error!("Controller stream ended unexpectedly");
}
