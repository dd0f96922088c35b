use super::domain::route_domain;
use super::traffic::{RevisionTarget, RouteIdentity, TrafficConfig};
use super::validation::validate_route;
use super::virtual_service::build_virtual_service;
use crate::controller::clock::Clock;
use crate::controller::context::{Context, ReconcileError, FIELD_MANAGER};
use crate::crd::revision::Revision;
use crate::crd::route::{Route, RouteConditionType, RouteStatus, ROUTE_CONDITIONS};
use crate::crd::serverless_service::{ServerlessService, ServerlessServiceMode};
use crate::crd::virtual_service::VirtualService;
use kube::api::{Api, Patch, PatchParams};
use kube::runtime::controller::Action;
use kube::runtime::reflector::ObjectRef;
use kube::ResourceExt;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

pub const ROUTE_KIND: &str = "route";

/// A referenced revision does not exist
pub const REASON_REVISION_MISSING: &str = "RevisionMissing";

/// The route lists no traffic targets
pub const REASON_NO_TRAFFIC: &str = "NoTraffic";

/// What the allocator needs to know about one revision
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ObservedRevision {
    pub configuration_name: String,
    pub timeout_seconds: Option<i64>,
    /// Backed by its own pods rather than the activator
    pub active: bool,
}

/// Reconcile a Route
///
/// 1. Validates the traffic block
/// 2. Looks up every referenced Revision and its ServerlessService
/// 3. Server-side applies the VirtualService built from the traffic split
/// 4. Patches domain and conditions into the route's status
pub async fn reconcile(route: Arc<Route>, ctx: Arc<Context>) -> Result<Action, ReconcileError> {
    let start_time = Instant::now();

    let namespace = route.namespace().ok_or(ReconcileError::MissingNamespace)?;
    let name = route.metadata.name.clone().ok_or(ReconcileError::MissingName)?;

    info!(route = ?name, namespace = ?namespace, "Reconciling Route");

    if let Err(validation_error) = validate_route(&route) {
        error!(
            route = ?name,
            error = ?validation_error,
            "Route spec validation failed"
        );
        return Err(ReconcileError::ValidationError(validation_error));
    }

    let identity = RouteIdentity {
        name: name.clone(),
        namespace: namespace.clone(),
        domain: route_domain(&route, &ctx.config.network),
    };

    let mut status = route.status.clone().unwrap_or_default();
    ROUTE_CONDITIONS
        .manage_with_clock(&mut status.conditions, ctx.clock.as_ref())
        .initialize();
    status.domain = Some(identity.domain.clone());
    status.observed_generation = route.metadata.generation;

    let (observed, missing) = observe_revisions(&route, &namespace, &ctx).await?;

    if route.spec.traffic.is_empty() {
        mark_no_traffic(&mut status, ctx.clock.as_ref());
    } else if let Some(revision) = missing.first() {
        warn!(route = ?name, revision = ?revision, "Route references a missing Revision");
        mark_revision_missing(&mut status, revision, ctx.clock.as_ref());
    } else {
        let traffic = build_traffic_config(&route, &observed);
        let virtual_service =
            build_virtual_service(&route, &identity, &traffic, &ctx.config.network);

        let virtual_services: Api<VirtualService> =
            Api::namespaced(ctx.client.clone(), &namespace);
        virtual_services
            .patch(
                &name,
                &PatchParams::apply(FIELD_MANAGER).force(),
                &Patch::Apply(&virtual_service),
            )
            .await?;

        info!(
            route = ?name,
            hosts = ?virtual_service.spec.hosts,
            rules = virtual_service.spec.http.len(),
            "VirtualService applied"
        );

        mark_traffic_assigned(&mut status, ctx.clock.as_ref());
    }

    if route.status.as_ref() != Some(&status) {
        info!(
            route = ?name,
            ready = status.is_ready(),
            domain = ?status.domain,
            "Updating Route status"
        );

        let routes: Api<Route> = Api::namespaced(ctx.client.clone(), &namespace);
        let patch = serde_json::to_value(&status)
            .map_err(|e| ReconcileError::SerializationError(e.to_string()))?;
        routes
            .patch_status(
                &name,
                &PatchParams::default(),
                &Patch::Merge(&serde_json::json!({ "status": patch })),
            )
            .await?;
    }

    ctx.record_success(ROUTE_KIND, start_time);

    let requeue = if status.is_ready() { 300 } else { 10 };
    Ok(Action::requeue(Duration::from_secs(requeue)))
}

/// Fetch each distinct revision the route points at
///
/// Returns what was found, keyed by revision name, and the names that are missing.
async fn observe_revisions(
    route: &Route,
    namespace: &str,
    ctx: &Context,
) -> Result<(BTreeMap<String, ObservedRevision>, Vec<String>), ReconcileError> {
    let revisions: Api<Revision> = Api::namespaced(ctx.client.clone(), namespace);
    let services: Api<ServerlessService> = Api::namespaced(ctx.client.clone(), namespace);

    let mut observed = BTreeMap::new();
    let mut missing = Vec::new();

    for target in &route.spec.traffic {
        let revision_name = &target.revision_name;
        if observed.contains_key(revision_name) || missing.contains(revision_name) {
            continue;
        }

        let Some(revision) = revisions.get_opt(revision_name).await? else {
            missing.push(revision_name.clone());
            continue;
        };

        // No ServerlessService yet means nothing is serving: go through the activator
        let active = services
            .get_opt(revision_name)
            .await?
            .is_some_and(|sks| sks.spec.mode == ServerlessServiceMode::Serve);

        debug!(revision = ?revision_name, active = active, "Observed Revision");

        observed.insert(
            revision_name.clone(),
            ObservedRevision {
                configuration_name: revision.configuration_name(),
                timeout_seconds: revision.spec.timeout_seconds,
                active,
            },
        );
    }

    Ok((observed, missing))
}

/// Group a route's targets by tag
///
/// Every target joins the default split "" with its percent. A tagged target
/// also gets a group of its own receiving all of that tag's traffic.
pub fn build_traffic_config(
    route: &Route,
    observed: &BTreeMap<String, ObservedRevision>,
) -> TrafficConfig {
    let mut traffic = TrafficConfig::new();

    for target in &route.spec.traffic {
        let revision = observed
            .get(&target.revision_name)
            .cloned()
            .unwrap_or_default();
        let revision_target = RevisionTarget {
            revision_name: target.revision_name.clone(),
            configuration_name: revision.configuration_name,
            percent: target.percent,
            active: revision.active,
            timeout_seconds: revision.timeout_seconds,
        };

        if let Some(tag) = &target.tag {
            traffic.entry(tag.clone()).or_default().push(RevisionTarget {
                percent: 100,
                ..revision_target.clone()
            });
        }
        traffic.entry(String::new()).or_default().push(revision_target);
    }

    traffic
}

/// Routes in `namespace` sending traffic to `revision`
///
/// Maps Revision and ServerlessService events back to the routes that need
/// their traffic recomputed.
pub fn routes_referencing(
    routes: &[Arc<Route>],
    namespace: Option<&str>,
    revision: &str,
) -> Vec<ObjectRef<Route>> {
    routes
        .iter()
        .filter(|route| route.namespace().as_deref() == namespace)
        .filter(|route| {
            route
                .spec
                .traffic
                .iter()
                .any(|t| t.revision_name == revision)
        })
        .map(|route| ObjectRef::from_obj(route.as_ref()))
        .collect()
}

pub fn mark_traffic_assigned(status: &mut RouteStatus, clock: &dyn Clock) {
    let mut manager = ROUTE_CONDITIONS.manage_with_clock(&mut status.conditions, clock);
    manager.mark_true(RouteConditionType::AllTrafficAssigned);
    manager.mark_true(RouteConditionType::IngressReady);
}

pub fn mark_revision_missing(status: &mut RouteStatus, revision: &str, clock: &dyn Clock) {
    ROUTE_CONDITIONS
        .manage_with_clock(&mut status.conditions, clock)
        .mark_false(
            RouteConditionType::AllTrafficAssigned,
            REASON_REVISION_MISSING,
            format!("Revision {:?} referenced in traffic not found", revision),
        );
}

pub fn mark_no_traffic(status: &mut RouteStatus, clock: &dyn Clock) {
    ROUTE_CONDITIONS
        .manage_with_clock(&mut status.conditions, clock)
        .mark_false(
            RouteConditionType::AllTrafficAssigned,
            REASON_NO_TRAFFIC,
            "Route has no traffic targets",
        );
}

/// Error policy for the route controller
pub fn error_policy(route: Arc<Route>, error: &ReconcileError, ctx: Arc<Context>) -> Action {
    warn!(route = ?route.name_any(), "Reconcile error (will retry): {:?}", error);

    if let Some(ref metrics) = ctx.metrics {
        metrics.record_reconciliation_error(ROUTE_KIND, 0.0);
    }

    Action::requeue(Duration::from_secs(10))
}
