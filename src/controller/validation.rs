//! Review of RayCluster specs before a pass acts on them.
//!
//! Malformed specs are normally rejected before they reach the operator.
//! When one slips through anyway, the pass must not crash: numeric fields
//! are clamped where they are consumed, and worker groups that cannot be
//! addressed unambiguously are skipped. This module only reports what it
//! finds.

use std::collections::HashSet;

use crate::controller::error::Error;
use crate::crd::{RayClusterSpec, WorkerGroupSpec};
use crate::resources::common::HEAD_GROUP_NAME;

/// Outcome of reviewing a spec.
#[derive(Debug, Default)]
pub struct SpecReview<'a> {
    /// Worker groups to reconcile, in spec order.
    pub groups: Vec<&'a WorkerGroupSpec>,
    /// Problems found. Each is an [`Error::Validation`].
    pub issues: Vec<Error>,
}

impl SpecReview<'_> {
    pub fn is_clean(&self) -> bool {
        self.issues.is_empty()
    }
}

/// Review a spec, deciding which worker groups this pass can manage.
pub fn review_spec(spec: &RayClusterSpec) -> SpecReview<'_> {
    let mut review = SpecReview::default();
    let mut seen: HashSet<&str> = HashSet::new();

    for group in &spec.worker_group_specs {
        let name = group.group_name.as_str();
        if name.is_empty() {
            review
                .issues
                .push(Error::Validation("worker group without groupName skipped".to_string()));
            continue;
        }
        if name == HEAD_GROUP_NAME {
            review.issues.push(Error::Validation(format!(
                "worker group {:?} uses the reserved head group name and was skipped",
                name
            )));
            continue;
        }
        if !seen.insert(name) {
            review.issues.push(Error::Validation(format!(
                "duplicate worker group {:?} skipped",
                name
            )));
            continue;
        }
        review.issues.extend(check_group(group).err());
        review.groups.push(group);
    }

    review
}

/// Check the numeric fields of a group. Offending values are clamped by
/// the desired-state computation; this only reports them.
pub fn check_group(group: &WorkerGroupSpec) -> Result<(), Error> {
    let mut problems = Vec::new();
    if let Some(replicas) = group.replicas.filter(|r| *r < 0) {
        problems.push(format!("replicas {} is negative", replicas));
    }
    if group.min_replicas < 0 {
        problems.push(format!("minReplicas {} is negative", group.min_replicas));
    }
    if group.min_replicas > group.max_replicas {
        problems.push(format!(
            "minReplicas {} exceeds maxReplicas {}",
            group.min_replicas, group.max_replicas
        ));
    }
    if group.num_of_hosts < 1 {
        problems.push(format!(
            "numOfHosts {} is below 1, treating as 1",
            group.num_of_hosts
        ));
    }

    if problems.is_empty() {
        Ok(())
    } else {
        Err(Error::Validation(format!(
            "worker group {:?}: {}",
            group.group_name,
            problems.join("; ")
        )))
    }
}
