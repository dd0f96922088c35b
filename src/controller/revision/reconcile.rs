use super::deployment::{diagnose_deployment, DeploymentConditionType, DeploymentHealth};
use crate::controller::clock::Clock;
use crate::controller::conditions::ConditionStatus;
use crate::controller::context::{Context, ReconcileError};
use crate::controller::digest::{AuthOptions, ResolveError, Resolution};
use crate::crd::revision::{
    Revision, RevisionConditionType, RevisionStatus, REVISION_CONDITIONS,
};
use k8s_openapi::api::apps::v1::Deployment;
use kube::api::{Api, Patch, PatchParams};
use kube::runtime::controller::Action;
use kube::ResourceExt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

pub const REVISION_KIND: &str = "revision";

/// Requeue interval while a revision is still coming up
const PENDING_REQUEUE: Duration = Duration::from_secs(15);

/// Requeue interval for a ready revision
const READY_REQUEUE: Duration = Duration::from_secs(300);

/// Deployment not created yet
pub const REASON_DEPLOYING: &str = "Deploying";

/// Image could not be resolved to a digest
pub const REASON_CONTAINER_MISSING: &str = "ContainerMissing";

/// Reconcile a Revision
///
/// Pins the image to a digest once, then mirrors the backing Deployment's
/// health onto the revision's conditions.
pub async fn reconcile(revision: Arc<Revision>, ctx: Arc<Context>) -> Result<Action, ReconcileError> {
    let start_time = Instant::now();

    let namespace = revision
        .namespace()
        .ok_or(ReconcileError::MissingNamespace)?;
    let name = revision.metadata.name.clone().ok_or(ReconcileError::MissingName)?;

    info!(revision = ?name, namespace = ?namespace, "Reconciling Revision");

    let mut status = revision.status.clone().unwrap_or_default();
    REVISION_CONDITIONS
        .manage_with_clock(&mut status.conditions, ctx.clock.as_ref())
        .initialize();

    let mut image_ok = true;
    if status.image_digest.is_none() {
        let outcome = resolve_image(&revision, &namespace, &ctx).await;
        if let Some(ref metrics) = ctx.metrics {
            metrics.record_digest_resolution(resolution_label(&outcome));
        }
        image_ok = apply_resolution(
            &mut status,
            &revision.spec.image,
            &outcome,
            ctx.clock.as_ref(),
        );
    }

    // Deployment health is only meaningful for an image we could resolve
    if image_ok {
        let deployments: Api<Deployment> = Api::namespaced(ctx.client.clone(), &namespace);
        let deployment_name = revision.deployment_name();

        match deployments.get_opt(&deployment_name).await? {
            Some(deployment) => {
                let health =
                    diagnose_deployment(&deployment, &ctx.client, revision.container_name())
                        .await?;
                let available = deployment
                    .status
                    .as_ref()
                    .and_then(|s| s.available_replicas)
                    .unwrap_or(0);
                apply_deployment_health(&mut status, &health, available, ctx.clock.as_ref());
            }
            None => {
                debug!(revision = ?name, deployment = ?deployment_name, "Deployment not found yet");
                mark_deploying(&mut status, ctx.clock.as_ref());
            }
        }
    }

    status.observed_generation = revision.metadata.generation;

    if revision.status.as_ref() != Some(&status) {
        let ready = REVISION_CONDITIONS.is_happy(&status.conditions);
        info!(
            revision = ?name,
            ready = ready,
            image_digest = ?status.image_digest,
            "Updating Revision status"
        );

        let revisions: Api<Revision> = Api::namespaced(ctx.client.clone(), &namespace);
        let patch = serde_json::to_value(&status)
            .map_err(|e| ReconcileError::SerializationError(e.to_string()))?;
        revisions
            .patch_status(
                &name,
                &PatchParams::default(),
                &Patch::Merge(&serde_json::json!({ "status": patch })),
            )
            .await?;
    }

    ctx.record_success(REVISION_KIND, start_time);

    Ok(Action::requeue(requeue_interval(&status)))
}

async fn resolve_image(
    revision: &Revision,
    namespace: &str,
    ctx: &Context,
) -> Result<Resolution, ResolveError> {
    let options = AuthOptions {
        namespace: namespace.to_string(),
        service_account_name: revision.spec.service_account_name.clone(),
        image_pull_secrets: revision.spec.image_pull_secrets.clone(),
    };
    let registry = &ctx.config.registry;

    let mut resolver = ctx.resolver.lock().await;
    resolver
        .resolve(
            &revision.spec.image,
            &options,
            &registry.registries_skipping_tag_resolving,
            &registry.cert_files,
        )
        .await
}

fn resolution_label(outcome: &Result<Resolution, ResolveError>) -> &'static str {
    match outcome {
        Ok(Resolution::Resolved(_)) => "resolved",
        Ok(Resolution::Skipped) => "skipped",
        Err(e) => e.metric_label(),
    }
}

/// Record a digest resolution on the status
///
/// Returns false when the image could not be resolved.
pub fn apply_resolution(
    status: &mut RevisionStatus,
    image: &str,
    outcome: &Result<Resolution, ResolveError>,
    clock: &dyn Clock,
) -> bool {
    match outcome {
        Ok(resolution) => {
            if let Resolution::Resolved(digest) = resolution {
                status.image_digest = Some(digest.clone());
            }
            clear_container_missing(status, clock);
            true
        }
        Err(e) => {
            warn!(image = %image, error = %e, "Failed to resolve image digest");
            REVISION_CONDITIONS
                .manage_with_clock(&mut status.conditions, clock)
                .mark_false(
                    RevisionConditionType::ContainerHealthy,
                    REASON_CONTAINER_MISSING,
                    format!("Unable to fetch image {:?}: {}", image, e),
                );
            false
        }
    }
}

/// Drop a failure left by an earlier resolution attempt
fn clear_container_missing(status: &mut RevisionStatus, clock: &dyn Clock) {
    let mut manager = REVISION_CONDITIONS.manage_with_clock(&mut status.conditions, clock);
    let stale = manager
        .get_condition(RevisionConditionType::ContainerHealthy)
        .is_some_and(|c| c.reason == REASON_CONTAINER_MISSING);
    if stale {
        manager.mark_unknown(RevisionConditionType::ContainerHealthy, REASON_DEPLOYING, "");
    }
}

pub fn mark_deploying(status: &mut RevisionStatus, clock: &dyn Clock) {
    REVISION_CONDITIONS
        .manage_with_clock(&mut status.conditions, clock)
        .mark_unknown(RevisionConditionType::ResourcesAvailable, REASON_DEPLOYING, "");
}

/// Mirror deployment health onto the revision's conditions
///
/// A ready deployment, or one with any available replica, makes both
/// dependents True. Otherwise failing pods mark the container unhealthy and
/// failing replica sets or a stalled rollout mark resources unavailable.
pub fn apply_deployment_health(
    status: &mut RevisionStatus,
    health: &DeploymentHealth,
    available_replicas: i32,
    clock: &dyn Clock,
) {
    let mut manager = REVISION_CONDITIONS.manage_with_clock(&mut status.conditions, clock);

    if health.is_ready() || available_replicas > 0 {
        manager.mark_true(RevisionConditionType::ResourcesAvailable);
        manager.mark_true(RevisionConditionType::ContainerHealthy);
        return;
    }

    if let Some(pods) = health
        .get_condition(DeploymentConditionType::PodsReady)
        .filter(|c| c.status == ConditionStatus::False)
    {
        manager.mark_false(
            RevisionConditionType::ContainerHealthy,
            pods.reason.clone(),
            pods.message.clone(),
        );
    }

    for type_ in [
        DeploymentConditionType::ReplicaSetReady,
        DeploymentConditionType::Progressing,
    ] {
        if let Some(cond) = health
            .get_condition(type_)
            .filter(|c| c.status == ConditionStatus::False)
        {
            manager.mark_false(
                RevisionConditionType::ResourcesAvailable,
                cond.reason.clone(),
                cond.message.clone(),
            );
            break;
        }
    }
}

fn requeue_interval(status: &RevisionStatus) -> Duration {
    if REVISION_CONDITIONS.is_happy(&status.conditions) {
        READY_REQUEUE
    } else {
        PENDING_REQUEUE
    }
}

/// Error policy for the revision controller
pub fn error_policy(revision: Arc<Revision>, error: &ReconcileError, ctx: Arc<Context>) -> Action {
    warn!(revision = ?revision.name_any(), "Reconcile error (will retry): {:?}", error);

    if let Some(ref metrics) = ctx.metrics {
        metrics.record_reconciliation_error(REVISION_KIND, 0.0);
    }

    Action::requeue(Duration::from_secs(10))
}
