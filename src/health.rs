//! Health server for Kubernetes probes and Prometheus metrics.
//!
//! Provides:
//! - `/healthz` - Liveness probe (always returns 200 if server is running)
//! - `/readyz` - Readiness probe (returns 200 when ready to serve traffic)
//! - `/metrics` - Prometheus metrics endpoint

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use axum::{
    Router,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use prometheus_client::encoding::text::encode;
use prometheus_client::encoding::{EncodeLabel, EncodeLabelSet, LabelSetEncoder};
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::metrics::histogram::{Histogram, exponential_buckets};
use prometheus_client::registry::Registry;
use tokio::sync::RwLock;
use tracing::info;

use crate::crd::ClusterState;

/// Labels for reconciliation metrics (namespace + name)
#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub struct ReconcileLabels {
    pub namespace: String,
    pub name: String,
}

impl EncodeLabelSet for ReconcileLabels {
    fn encode(&self, encoder: &mut LabelSetEncoder<'_>) -> Result<(), std::fmt::Error> {
        ("namespace", self.namespace.as_str()).encode(encoder.encode_label())?;
        ("name", self.name.as_str()).encode(encoder.encode_label())?;
        Ok(())
    }
}

/// Labels for state-based metrics
#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub struct StateLabels {
    pub state: String,
}

impl EncodeLabelSet for StateLabels {
    fn encode(&self, encoder: &mut LabelSetEncoder<'_>) -> Result<(), std::fmt::Error> {
        ("state", self.state.as_str()).encode(encoder.encode_label())?;
        Ok(())
    }
}

/// Shared metrics for the operator
pub struct Metrics {
    /// Total reconciliations counter
    pub reconciliations_total: Family<ReconcileLabels, Counter>,
    /// Failed reconciliations counter
    pub reconciliation_errors_total: Family<ReconcileLabels, Counter>,
    /// Reconciliation duration histogram
    pub reconcile_duration_seconds: Family<ReconcileLabels, Histogram>,
    /// Clusters by reported state
    pub clusters: Family<StateLabels, Gauge>,
    /// Desired instances per cluster
    pub instances_desired: Family<ReconcileLabels, Gauge>,
    /// Live instances per cluster
    pub instances_live: Family<ReconcileLabels, Gauge>,
    /// Status writes lost to concurrent updates
    pub status_conflicts_total: Family<ReconcileLabels, Counter>,
    /// Last reported state of every known cluster, keyed by `namespace/name`
    states: Mutex<HashMap<String, ClusterState>>,
    /// Prometheus registry
    registry: Registry,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

fn labels(namespace: &str, name: &str) -> ReconcileLabels {
    ReconcileLabels {
        namespace: namespace.to_string(),
        name: name.to_string(),
    }
}

fn to_gauge(n: usize) -> i64 {
    i64::try_from(n).unwrap_or(i64::MAX)
}

impl Metrics {
    /// Create a new metrics instance with registered metrics
    pub fn new() -> Self {
        let mut registry = Registry::default();

        let reconciliations_total = Family::<ReconcileLabels, Counter>::default();
        registry.register(
            "rayoperator_reconciliations",
            "Total number of reconciliations",
            reconciliations_total.clone(),
        );

        let reconciliation_errors_total = Family::<ReconcileLabels, Counter>::default();
        registry.register(
            "rayoperator_reconciliation_errors",
            "Total number of reconciliation errors",
            reconciliation_errors_total.clone(),
        );

        let reconcile_duration_seconds =
            Family::<ReconcileLabels, Histogram>::new_with_constructor(|| {
                Histogram::new(exponential_buckets(0.001, 2.0, 15))
            });
        registry.register(
            "rayoperator_reconcile_duration_seconds",
            "Duration of reconciliation in seconds",
            reconcile_duration_seconds.clone(),
        );

        let clusters = Family::<StateLabels, Gauge>::default();
        registry.register(
            "rayoperator_clusters",
            "Number of RayClusters by state",
            clusters.clone(),
        );

        let instances_desired = Family::<ReconcileLabels, Gauge>::default();
        registry.register(
            "rayoperator_instances_desired",
            "Instances requested by each RayCluster spec",
            instances_desired.clone(),
        );

        let instances_live = Family::<ReconcileLabels, Gauge>::default();
        registry.register(
            "rayoperator_instances_live",
            "Live instances observed for each RayCluster",
            instances_live.clone(),
        );

        let status_conflicts_total = Family::<ReconcileLabels, Counter>::default();
        registry.register(
            "rayoperator_status_conflicts",
            "Status updates rejected because of a concurrent write",
            status_conflicts_total.clone(),
        );

        Self {
            reconciliations_total,
            reconciliation_errors_total,
            reconcile_duration_seconds,
            clusters,
            instances_desired,
            instances_live,
            status_conflicts_total,
            states: Mutex::new(HashMap::new()),
            registry,
        }
    }

    /// Record a successful reconciliation
    pub fn record_reconcile(&self, namespace: &str, name: &str, duration_secs: f64) {
        let labels = labels(namespace, name);
        self.reconciliations_total.get_or_create(&labels).inc();
        self.reconcile_duration_seconds
            .get_or_create(&labels)
            .observe(duration_secs);
    }

    /// Record a failed reconciliation
    pub fn record_error(&self, namespace: &str, name: &str) {
        self.reconciliation_errors_total
            .get_or_create(&labels(namespace, name))
            .inc();
    }

    /// Record status write conflicts
    pub fn record_status_conflicts(&self, namespace: &str, name: &str, conflicts: u32) {
        if conflicts > 0 {
            self.status_conflicts_total
                .get_or_create(&labels(namespace, name))
                .inc_by(u64::from(conflicts));
        }
    }

    /// Update instance metrics for a cluster
    pub fn set_instances(&self, namespace: &str, name: &str, desired: usize, live: usize) {
        let labels = labels(namespace, name);
        self.instances_desired
            .get_or_create(&labels)
            .set(to_gauge(desired));
        self.instances_live.get_or_create(&labels).set(to_gauge(live));
    }

    /// Remember the state of a cluster and refresh the per-state counts
    pub fn set_cluster_state(&self, namespace: &str, name: &str, state: ClusterState) {
        self.update_states(|states| {
            states.insert(format!("{}/{}", namespace, name), state);
        });
    }

    /// Drop every per-cluster series of a deleted cluster
    pub fn forget_cluster(&self, namespace: &str, name: &str) {
        self.update_states(|states| {
            states.remove(&format!("{}/{}", namespace, name));
        });
        let labels = labels(namespace, name);
        self.instances_desired.remove(&labels);
        self.instances_live.remove(&labels);
    }

    fn update_states(&self, change: impl FnOnce(&mut HashMap<String, ClusterState>)) {
        let mut states = self.states.lock().unwrap_or_else(|e| e.into_inner());
        change(&mut states);
        for state in [
            ClusterState::Ready,
            ClusterState::Suspended,
            ClusterState::Unready,
        ] {
            let count = states.values().filter(|s| **s == state).count();
            self.clusters
                .get_or_create(&StateLabels {
                    state: state.as_str().to_string(),
                })
                .set(to_gauge(count));
        }
    }

    /// Encode metrics to Prometheus text format
    pub fn encode(&self) -> String {
        let mut buffer = String::new();
        if encode(&mut buffer, &self.registry).is_err() {
            tracing::error!("Failed to encode metrics");
            return "# Error encoding metrics".to_string();
        }
        buffer
    }
}

/// Shared state for the health server
pub struct HealthState {
    /// Whether the operator is ready (acquired leadership and running controller)
    ready: RwLock<bool>,
    /// Metrics registry
    pub metrics: Metrics,
    /// Last successful reconcile timestamp (Unix epoch seconds)
    pub last_reconcile: AtomicU64,
}

impl Default for HealthState {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthState {
    /// Create a new health state (starts as not ready)
    pub fn new() -> Self {
        Self {
            ready: RwLock::new(false),
            metrics: Metrics::new(),
            last_reconcile: AtomicU64::new(0),
        }
    }

    /// Mark the operator as ready or not ready
    pub async fn set_ready(&self, ready: bool) {
        *self.ready.write().await = ready;
    }

    /// Check if the operator is ready
    pub async fn is_ready(&self) -> bool {
        *self.ready.read().await
    }

    /// Record that a reconciliation just completed
    pub fn touch_last_reconcile(&self) {
        let now = u64::try_from(jiff::Timestamp::now().as_second()).unwrap_or_default();
        self.last_reconcile.store(now, Ordering::Relaxed);
    }
}

/// Liveness probe handler
///
/// Returns 200 OK if the process is alive.
/// This is a simple check - if we can respond, we're alive.
async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

/// Readiness probe handler
///
/// Returns 200 OK if the operator is ready to serve.
/// Returns 503 Service Unavailable if not ready.
async fn readyz(State(state): State<Arc<HealthState>>) -> Response {
    if state.is_ready().await {
        (StatusCode::OK, "ready").into_response()
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "not ready").into_response()
    }
}

/// Metrics handler
async fn metrics_handler(State(state): State<Arc<HealthState>>) -> impl IntoResponse {
    let body = state.metrics.encode();
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
        body,
    )
}

/// Create the health server router
pub fn create_router(state: Arc<HealthState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}

/// Run the health server
///
/// Binds to 0.0.0.0 on `port` and serves health/metrics endpoints.
pub async fn run_health_server(state: Arc<HealthState>, port: u16) -> Result<(), std::io::Error> {
    let app = create_router(state);

    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
    info!(port, "Starting health server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
