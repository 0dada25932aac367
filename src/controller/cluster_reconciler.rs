//! Reconciliation loop for RayCluster.
//!
//! A pass reads the cluster, converges the head and every worker group
//! toward the desired instance count, then recomputes and writes the status.
//! Passes are stateless: everything is derived from the freshly read spec and
//! the freshly listed instances, so a pass can be re-run at any time.

use std::sync::Arc;
use std::time::{Duration, Instant};

use kube::{ResourceExt, runtime::controller::Action};
use tracing::{debug, error, info, warn};

use crate::controller::{
    cluster_state::ObservedCluster,
    context::Context,
    desired_state::{self, DeletionReason, GroupTarget},
    error::{Error, Result},
    instances::GroupSelector,
    status::{build_status, status_changed},
    store::{ClusterEvent, ClusterKey, ClusterStore, CreateOutcome, DeleteOutcome, StatusWrite},
    validation::review_spec,
};
use crate::crd::{ClusterState, RayCluster, WorkerGroupSpec};
use crate::resources::InstanceTemplates;

/// Requeue delay after a pass with failed instance operations.
pub const FAILURE_REQUEUE: Duration = Duration::from_secs(5);

/// Requeue delay while the cluster has not settled.
pub const CONVERGING_REQUEUE: Duration = Duration::from_secs(15);

/// What one pass did.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PassReport {
    /// State written (or confirmed) in status.
    pub state: ClusterState,
    /// Instances created.
    pub created: usize,
    /// Instances deleted, including already-gone ones.
    pub deleted: usize,
    /// Create or delete calls that failed.
    pub failures: usize,
    /// Instances the spec asks for across all managed groups.
    pub desired_instances: usize,
    /// Live instances observed when status was computed.
    pub live_instances: usize,
    /// Whether a status write happened.
    pub status_written: bool,
    /// Status writes lost to a concurrent update.
    pub status_conflicts: u32,
}

/// Result of a pass.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PassOutcome {
    /// The cluster does not exist or is being deleted.
    Gone,
    Reconciled(PassReport),
}

/// One group to converge.
struct GroupWork<'a> {
    selector: GroupSelector,
    target: GroupTarget,
    /// `None` for the head.
    spec: Option<&'a WorkerGroupSpec>,
}

/// Run one reconciliation pass for `key`.
///
/// Instance-level failures are counted in the report and do not stop the
/// pass. Failing to list instances or to read the cluster aborts it.
/// Status writes are compare-and-swap; on conflict the cluster is re-read
/// and status recomputed, at most `status_retries` times.
pub async fn reconcile_pass(
    store: &dyn ClusterStore,
    templates: &dyn InstanceTemplates,
    key: &ClusterKey,
    status_retries: u32,
) -> Result<PassOutcome> {
    let Some(cluster) = store.get_cluster(key).await? else {
        debug!(cluster = %key, "Cluster not found");
        return Ok(PassOutcome::Gone);
    };
    if cluster.metadata.deletion_timestamp.is_some() {
        // Owned instances are removed by the garbage collector.
        debug!(cluster = %key, "Cluster is being deleted");
        return Ok(PassOutcome::Gone);
    }

    let mut report = PassReport::default();
    let suspend = cluster.spec.is_suspended();

    {
        let review = review_spec(&cluster.spec);
        // Spec problems are reported once per generation, not on every resync.
        let generation_seen = cluster.metadata.generation.is_some()
            && cluster.status.as_ref().and_then(|s| s.observed_generation)
                == cluster.metadata.generation;
        for issue in &review.issues {
            if generation_seen {
                debug!(cluster = %key, issue = %issue, "Invalid spec already reported");
                continue;
            }
            warn!(cluster = %key, issue = %issue, "Invalid spec");
            store
                .publish_event(
                    &cluster,
                    ClusterEvent::warning("InvalidSpec", "Validating", issue.to_string()),
                )
                .await;
        }

        let mut work = vec![GroupWork {
            selector: GroupSelector::head(&key.name),
            target: GroupTarget::head(),
            spec: None,
        }];
        work.extend(review.groups.iter().map(|group| GroupWork {
            selector: GroupSelector::new(&key.name, &group.group_name),
            target: GroupTarget::from_worker_group(group),
            spec: Some(*group),
        }));

        for group in &work {
            converge_group(store, templates, &cluster, key, group, suspend, &mut report).await?;
        }
    }

    write_status(store, key, cluster, status_retries, report).await
}

async fn converge_group(
    store: &dyn ClusterStore,
    templates: &dyn InstanceTemplates,
    cluster: &RayCluster,
    key: &ClusterKey,
    group: &GroupWork<'_>,
    suspend: bool,
    report: &mut PassReport,
) -> Result<()> {
    let observed = store
        .list_instances(&key.namespace, &group.selector)
        .await?;
    let plan = desired_state::compute(&group.target, suspend, &observed);
    if !suspend {
        report.desired_instances += plan.desired;
    }
    if plan.is_noop() {
        return Ok(());
    }

    info!(
        cluster = %key,
        group = %group.selector.group,
        desired = plan.desired,
        live = plan.live,
        create = plan.creations,
        delete = plan.deletions.len(),
        "Converging group"
    );

    for deletion in &plan.deletions {
        match store.delete_instance(&key.namespace, &deletion.name).await {
            Ok(outcome) => {
                report.deleted += 1;
                if outcome == DeleteOutcome::NotFound {
                    debug!(instance = %deletion.name, "Instance already gone");
                    continue;
                }
                if deletion.reason == DeletionReason::Dead {
                    debug!(instance = %deletion.name, "Reclaimed finished instance");
                } else {
                    store
                        .publish_event(
                            cluster,
                            ClusterEvent::normal(
                                "DeletedInstance",
                                "Delete",
                                format!(
                                    "Deleted instance {} ({})",
                                    deletion.name, deletion.reason
                                ),
                            ),
                        )
                        .await;
                }
            }
            Err(e) => {
                report.failures += 1;
                warn!(instance = %deletion.name, error = %e, "Failed to delete instance");
                store
                    .publish_event(
                        cluster,
                        ClusterEvent::warning(
                            "FailedToDeleteInstance",
                            "Delete",
                            format!("Failed to delete instance {}: {}", deletion.name, e),
                        ),
                    )
                    .await;
            }
        }
    }

    for _ in 0..plan.creations {
        let pod = match group.spec {
            None => templates.head_instance(cluster),
            Some(spec) => templates.worker_instance(cluster, spec),
        };
        match store.create_instance(&key.namespace, pod).await {
            Ok(CreateOutcome::Created(name)) => {
                report.created += 1;
                store
                    .publish_event(
                        cluster,
                        ClusterEvent::normal(
                            "CreatedInstance",
                            "Create",
                            format!("Created instance {} in group {}", name, group.selector.group),
                        ),
                    )
                    .await;
            }
            Ok(CreateOutcome::AlreadyExists) => {
                debug!(group = %group.selector.group, "Instance already exists");
            }
            Err(e) => {
                report.failures += 1;
                warn!(group = %group.selector.group, error = %e, "Failed to create instance");
                store
                    .publish_event(
                        cluster,
                        ClusterEvent::warning(
                            "FailedToCreateInstance",
                            "Create",
                            format!(
                                "Failed to create instance in group {}: {}",
                                group.selector.group, e
                            ),
                        ),
                    )
                    .await;
            }
        }
    }

    Ok(())
}

/// List every managed group of `cluster` as it stands now.
async fn observe(
    store: &dyn ClusterStore,
    key: &ClusterKey,
    groups: &[&WorkerGroupSpec],
) -> Result<ObservedCluster> {
    let mut observed = ObservedCluster {
        head: store
            .list_instances(&key.namespace, &GroupSelector::head(&key.name))
            .await?,
        ..Default::default()
    };
    for group in groups {
        let instances = store
            .list_instances(
                &key.namespace,
                &GroupSelector::new(&key.name, &group.group_name),
            )
            .await?;
        observed.workers.insert(group.group_name.clone(), instances);
    }
    Ok(observed)
}

async fn write_status(
    store: &dyn ClusterStore,
    key: &ClusterKey,
    mut cluster: RayCluster,
    status_retries: u32,
    mut report: PassReport,
) -> Result<PassOutcome> {
    let attempts = status_retries.max(1);
    for attempt in 1..=attempts {
        let (status, live) = {
            let review = review_spec(&cluster.spec);
            let observed = observe(store, key, &review.groups).await?;
            (
                build_status(&cluster, &review.groups, &observed),
                observed.live_instances(),
            )
        };
        report.state = status.state;
        report.live_instances = live;

        if !status_changed(&cluster, &status) {
            return Ok(PassOutcome::Reconciled(report));
        }

        let previous = cluster.status.as_ref().map(|s| s.state);
        match store.update_status(&cluster, &status).await? {
            StatusWrite::Written => {
                report.status_written = true;
                if previous != Some(status.state) {
                    info!(
                        cluster = %key,
                        from = %previous.unwrap_or_default(),
                        to = %status.state,
                        "Cluster state changed"
                    );
                    store
                        .publish_event(
                            &cluster,
                            ClusterEvent::normal(
                                "StateChanged",
                                "UpdateStatus",
                                format!("Cluster state is now {}", status.state),
                            ),
                        )
                        .await;
                }
                return Ok(PassOutcome::Reconciled(report));
            }
            StatusWrite::Gone => return Ok(PassOutcome::Gone),
            StatusWrite::Conflict => {
                report.status_conflicts += 1;
                debug!(cluster = %key, attempt, "Status update conflicted, re-reading");
                cluster = match store.get_cluster(key).await? {
                    Some(fresh) => fresh,
                    None => return Ok(PassOutcome::Gone),
                };
            }
        }
    }

    warn!(cluster = %key, attempts, "Status update kept conflicting");
    Err(Error::Conflict { attempts })
}

/// When to look at a cluster again after a successful pass.
pub fn requeue_after(outcome: &PassOutcome, resync: Duration) -> Option<Duration> {
    match outcome {
        PassOutcome::Gone => None,
        PassOutcome::Reconciled(report) if report.failures > 0 => Some(FAILURE_REQUEUE),
        PassOutcome::Reconciled(report) if report.state == ClusterState::Unready => {
            Some(CONVERGING_REQUEUE.min(resync))
        }
        PassOutcome::Reconciled(_) => Some(resync),
    }
}

/// Reconcile a RayCluster
///
/// This is the function called by the controller. The pass runs under the
/// configured deadline; a pass that overruns is abandoned and retried.
pub async fn reconcile(obj: Arc<RayCluster>, ctx: Arc<Context>) -> Result<Action> {
    let start_time = Instant::now();
    let key = ClusterKey::of(&obj);

    debug!(name = %key.name, namespace = %key.namespace, "Reconciling RayCluster");

    let pass = reconcile_pass(
        ctx.store.as_ref(),
        ctx.templates.as_ref(),
        &key,
        ctx.config.status_update_retries,
    );
    let outcome = match tokio::time::timeout(ctx.config.reconcile_timeout, pass).await {
        Ok(result) => result?,
        Err(_) => return Err(Error::Timeout(ctx.config.reconcile_timeout)),
    };

    if let Some(ref health_state) = ctx.health_state {
        let metrics = &health_state.metrics;
        metrics.record_reconcile(
            &key.namespace,
            &key.name,
            start_time.elapsed().as_secs_f64(),
        );
        match &outcome {
            PassOutcome::Gone => {
                metrics.forget_cluster(&key.namespace, &key.name);
            }
            PassOutcome::Reconciled(report) => {
                metrics.set_cluster_state(&key.namespace, &key.name, report.state);
                metrics.set_instances(
                    &key.namespace,
                    &key.name,
                    report.desired_instances,
                    report.live_instances,
                );
                metrics.record_status_conflicts(&key.namespace, &key.name, report.status_conflicts);
            }
        }
        health_state.touch_last_reconcile();
    }

    if let PassOutcome::Reconciled(report) = &outcome {
        debug!(
            name = %key.name,
            state = %report.state,
            created = report.created,
            deleted = report.deleted,
            failures = report.failures,
            "Reconciled RayCluster"
        );
    }

    Ok(match requeue_after(&outcome, ctx.config.resync_interval) {
        Some(after) => Action::requeue(after),
        None => Action::await_change(),
    })
}

/// Error policy for the controller
pub fn error_policy(obj: Arc<RayCluster>, error: &Error, ctx: Arc<Context>) -> Action {
    let name = obj.name_any();
    let namespace = obj.namespace().unwrap_or_else(|| "default".to_string());

    // Record error metric
    if let Some(ref health_state) = ctx.health_state {
        health_state.metrics.record_error(&namespace, &name);
        if let Error::Conflict { attempts } = error {
            health_state
                .metrics
                .record_status_conflicts(&namespace, &name, *attempts);
        }
    }

    if error.is_not_found() {
        debug!(name = %name, "Resource not found (likely deleted)");
        return Action::await_change();
    }

    if error.is_retryable() {
        warn!(name = %name, error = %error, "Retryable error, will retry");
    } else {
        error!(name = %name, error = %error, "Non-retryable error");
    }
    Action::requeue(error.requeue_after())
}
