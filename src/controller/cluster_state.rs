//! Cluster-state evaluation.
//!
//! The reported state is a pure function of the suspend flag and what is
//! observed right now. Nothing is remembered between passes.

use std::collections::BTreeMap;

use crate::controller::instances::{Instance, count_live};
use crate::crd::ClusterState;

/// Everything observed for one cluster in one pass.
#[derive(Clone, Debug, Default)]
pub struct ObservedCluster {
    pub head: Vec<Instance>,
    /// Worker instances keyed by group name.
    pub workers: BTreeMap<String, Vec<Instance>>,
}

impl ObservedCluster {
    /// Every observed instance, including terminating and dead ones.
    pub fn total_instances(&self) -> usize {
        self.head.len() + self.workers.values().map(Vec::len).sum::<usize>()
    }

    /// Live instances across head and workers.
    pub fn live_instances(&self) -> usize {
        count_live(&self.head)
            + self
                .workers
                .values()
                .map(|instances| count_live(instances))
                .sum::<usize>()
    }

    pub fn all_workers(&self) -> impl Iterator<Item = &Instance> {
        self.workers.values().flatten()
    }

    /// First live head instance, by name.
    pub fn live_head(&self) -> Option<&Instance> {
        self.head
            .iter()
            .filter(|i| i.is_live())
            .min_by(|a, b| a.name.cmp(&b.name))
    }

    pub fn evaluate(&self, suspend: bool) -> ClusterState {
        evaluate(suspend, &self.head, &self.workers)
    }
}

/// Derive the cluster state.
///
/// - `Suspended`: suspend is set and no instance of any kind remains,
///   terminating ones included.
/// - `Ready`: not suspended, a live head exists and every head and worker
///   instance that is not terminating is Running and ready. A Failed or
///   Succeeded instance still waiting for deletion keeps the cluster Unready.
/// - `Unready`: everything else.
pub fn evaluate(
    suspend: bool,
    head: &[Instance],
    workers: &BTreeMap<String, Vec<Instance>>,
) -> ClusterState {
    if suspend {
        let total = head.len() + workers.values().map(Vec::len).sum::<usize>();
        return if total == 0 {
            ClusterState::Suspended
        } else {
            ClusterState::Unready
        };
    }

    if !head.iter().any(Instance::is_live) {
        return ClusterState::Unready;
    }
    let head_ready = head
        .iter()
        .filter(|i| !i.terminating)
        .all(Instance::is_healthy);
    let workers_ready = workers
        .values()
        .flatten()
        .filter(|i| !i.terminating)
        .all(Instance::is_healthy);

    if head_ready && workers_ready {
        ClusterState::Ready
    } else {
        ClusterState::Unready
    }
}
