//! Shared context for the controller.
//!
//! The Context struct holds shared state that is passed to the reconciler:
//! the store, the instance templates, configuration and health state.

use std::sync::Arc;

use kube::Client;

use crate::config::OperatorConfig;
use crate::controller::store::{ClusterStore, KubeStore};
use crate::health::HealthState;
use crate::resources::{DefaultTemplates, InstanceTemplates};

/// Shared context for the controller
#[derive(Clone)]
pub struct Context {
    /// Where clusters and instances are read and written
    pub store: Arc<dyn ClusterStore>,
    /// Pod templates for new instances
    pub templates: Arc<dyn InstanceTemplates>,
    pub config: OperatorConfig,
    /// Optional health state for metrics and readiness
    pub health_state: Option<Arc<HealthState>>,
}

impl Context {
    /// Create a context backed by the Kubernetes API
    pub fn new(
        client: Client,
        config: OperatorConfig,
        templates: DefaultTemplates,
        health_state: Option<Arc<HealthState>>,
    ) -> Self {
        let store = KubeStore::new(client, config.pod_name.clone());
        Self::with_store(Arc::new(store), Arc::new(templates), config, health_state)
    }

    /// Create a context over any store
    pub fn with_store(
        store: Arc<dyn ClusterStore>,
        templates: Arc<dyn InstanceTemplates>,
        config: OperatorConfig,
        health_state: Option<Arc<HealthState>>,
    ) -> Self {
        Self {
            store,
            templates,
            config,
            health_state,
        }
    }
}
