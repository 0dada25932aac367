//! Desired-state computation for a single group.
//!
//! [`compute`] is a pure function of the group's target, the suspend flag and
//! the observed instances. It answers three questions: how many instances the
//! group should have, which instances to delete, and how many to create. The
//! reconciler applies the answer; nothing here talks to the API server.
//!
//! Rules, in order of precedence:
//! - Suspend forces the desired count to zero and deletes every live instance,
//!   ignoring `workersToDelete`.
//! - Live instances named in `workersToDelete` are deleted.
//! - Remaining live instances above the desired count are deleted, least
//!   valuable first (see [`excess_order`]).
//! - Missing instances are created.
//! - Dead instances (Succeeded/Failed) are always reclaimed. They never count.

use std::cmp::Ordering;
use std::collections::HashSet;

use crate::controller::instances::{Instance, partition};
use crate::crd::WorkerGroupSpec;

/// What a group should look like, independent of what exists.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GroupTarget {
    /// Requested logical replicas.
    pub replicas: i32,
    /// Inclusive upper bound on logical replicas.
    pub max_replicas: i32,
    /// Instances per logical replica.
    pub num_of_hosts: i32,
    /// Instance names nominated for removal.
    pub workers_to_delete: Vec<String>,
}

impl GroupTarget {
    /// The head: one single-host unit, no kill list.
    pub fn head() -> Self {
        Self {
            replicas: 1,
            max_replicas: 1,
            num_of_hosts: 1,
            workers_to_delete: Vec::new(),
        }
    }

    pub fn from_worker_group(group: &WorkerGroupSpec) -> Self {
        Self {
            replicas: group.requested_replicas(),
            max_replicas: group.max_replicas,
            num_of_hosts: group.num_of_hosts,
            workers_to_delete: group.workers_to_delete().to_vec(),
        }
    }

    /// `min(replicas, maxReplicas)`, never negative.
    pub fn clamped_replicas(&self) -> i32 {
        self.replicas.min(self.max_replicas).max(0)
    }

    /// Instance count the spec asks for, ignoring suspend.
    pub fn desired_instances(&self) -> usize {
        let replicas = usize::try_from(self.clamped_replicas()).unwrap_or(0);
        let hosts = usize::try_from(self.num_of_hosts.max(1)).unwrap_or(1);
        replicas.saturating_mul(hosts)
    }
}

/// Why an instance is being deleted.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DeletionReason {
    /// The cluster is suspended.
    Suspended,
    /// Named in `workersToDelete`.
    Requested,
    /// More live instances than desired.
    Excess,
    /// Finished or failed; never counted.
    Dead,
}

impl DeletionReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeletionReason::Suspended => "suspended",
            DeletionReason::Requested => "requested",
            DeletionReason::Excess => "excess",
            DeletionReason::Dead => "dead",
        }
    }
}

impl std::fmt::Display for DeletionReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One instance the plan removes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PlannedDeletion {
    pub name: String,
    pub reason: DeletionReason,
}

/// The convergence plan for one group.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct GroupPlan {
    /// Instances the group should end with.
    pub desired: usize,
    /// Live instances observed before the plan.
    pub live: usize,
    /// Instances to delete, live ones first, then dead ones.
    pub deletions: Vec<PlannedDeletion>,
    /// Instances to create.
    pub creations: usize,
}

impl GroupPlan {
    /// Nothing to do.
    pub fn is_noop(&self) -> bool {
        self.deletions.is_empty() && self.creations == 0
    }

    /// Live instances removed by this plan.
    pub fn live_deletions(&self) -> usize {
        self.deletions
            .iter()
            .filter(|d| d.reason != DeletionReason::Dead)
            .count()
    }

    pub fn deletion_names(&self) -> impl Iterator<Item = &str> {
        self.deletions.iter().map(|d| d.name.as_str())
    }
}

/// Compute the plan for one group.
pub fn compute(target: &GroupTarget, suspend: bool, observed: &[Instance]) -> GroupPlan {
    let desired = if suspend { 0 } else { target.desired_instances() };
    let parts = partition(observed);
    let live = parts.live.len();

    let mut deletions: Vec<PlannedDeletion> = Vec::new();

    if suspend {
        deletions.extend(parts.live.iter().map(|i| PlannedDeletion {
            name: i.name.clone(),
            reason: DeletionReason::Suspended,
        }));
    } else {
        let requested: HashSet<&str> = target
            .workers_to_delete
            .iter()
            .map(String::as_str)
            .collect();
        let (named, mut remaining): (Vec<&Instance>, Vec<&Instance>) = parts
            .live
            .iter()
            .copied()
            .partition(|i| requested.contains(i.name.as_str()));

        deletions.extend(named.iter().map(|i| PlannedDeletion {
            name: i.name.clone(),
            reason: DeletionReason::Requested,
        }));

        if remaining.len() > desired {
            remaining.sort_by(|a, b| excess_order(a, b));
            let excess = remaining.len() - desired;
            deletions.extend(remaining.iter().take(excess).map(|i| PlannedDeletion {
                name: i.name.clone(),
                reason: DeletionReason::Excess,
            }));
        }
    }

    let kept = live - deletions.len();
    let creations = desired.saturating_sub(kept);

    deletions.extend(parts.dead.iter().map(|i| PlannedDeletion {
        name: i.name.clone(),
        reason: DeletionReason::Dead,
    }));

    GroupPlan {
        desired,
        live,
        deletions,
        creations,
    }
}

/// Order in which surplus instances are removed on an unprompted scale-down.
///
/// Instances that are not yet serving go first, then the oldest, with the
/// name as a final tie-breaker so the choice is fully deterministic.
/// Instances without a creation time sort before timestamped ones.
pub fn excess_order(a: &Instance, b: &Instance) -> Ordering {
    a.is_healthy()
        .cmp(&b.is_healthy())
        .then_with(|| a.created_at.cmp(&b.created_at))
        .then_with(|| a.name.cmp(&b.name))
}
