use futures::StreamExt;
use kube::runtime::{watcher, Controller};
use kube::{Api, Client, ResourceExt};
use pylon::config::ControllerConfig;
use pylon::controller::digest::{DigestResolver, KUBERNETES_CERT_BUNDLE, OPENSHIFT_CERT_BUNDLE};
use pylon::controller::{revision, route, Context};
use pylon::crd::revision::Revision;
use pylon::crd::route::Route;
use pylon::crd::serverless_service::ServerlessService;
use pylon::crd::virtual_service::VirtualService;
use pylon::server::{
    create_metrics, run_health_server, shutdown_channel, wait_for_signal, ReadinessState,
};
use std::path::Path;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Platform CA bundles that exist on this node
fn platform_cert_bundles(exists: impl Fn(&str) -> bool) -> Vec<String> {
    [KUBERNETES_CERT_BUNDLE, OPENSHIFT_CERT_BUNDLE]
        .into_iter()
        .filter(|path| exists(path))
        .map(str::to_string)
        .collect()
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    info!("Starting pylon serving controller");

    let _ = rustls::crypto::ring::default_provider().install_default();

    let mut config = ControllerConfig::from_env();
    for bundle in platform_cert_bundles(|p| Path::new(p).exists()) {
        if !config.registry.cert_files.contains(&bundle) {
            config.registry.cert_files.push(bundle);
        }
    }
    info!(
        domain_suffix = %config.network.domain_suffix,
        ingress_gateway = %config.network.ingress_gateway,
        cert_files = ?config.registry.cert_files,
        "Configuration loaded"
    );

    let (shutdown_controller, shutdown_signal) = shutdown_channel();

    // Initially not ready
    let readiness = ReadinessState::new();

    let metrics = create_metrics()?;
    info!("Prometheus metrics registry initialized");

    let health_readiness = readiness.clone();
    let health_metrics = metrics.clone();
    let health_port = config.health_port;
    let health_shutdown = shutdown_signal;
    let health_handle = tokio::spawn(async move {
        if let Err(e) =
            run_health_server(health_port, health_readiness, health_metrics, health_shutdown).await
        {
            warn!(error = %e, "Health server failed");
        }
    });
    info!(port = health_port, "Health server task spawned");

    let client = match Client::try_default().await {
        Ok(c) => c,
        Err(e) => {
            error!(error = %e, "Failed to create Kubernetes client");
            return Err(e.into());
        }
    };
    info!("Connected to Kubernetes cluster");

    let resolver = DigestResolver::new(Some(client.clone()), config.registry.timeout).shared();
    let ctx = Arc::new(Context::new(
        client.clone(),
        config,
        resolver,
        Some(metrics.clone()),
    ));

    let routes = Api::<Route>::all(client.clone());
    let virtual_services = Api::<VirtualService>::all(client.clone());
    let serverless_services = Api::<ServerlessService>::all(client.clone());
    let revisions = Api::<Revision>::all(client.clone());

    readiness.set_ready();
    info!("Controller ready, starting reconciliation loops");

    // error_policy already logs failures, so only successes are logged here
    let route_controller = Controller::new(routes, watcher::Config::default());
    // Activity and revision changes re-run every route pointing at that revision
    let sks_routes = route_controller.store();
    let revision_routes = route_controller.store();
    let route_controller = route_controller
        .owns(virtual_services, watcher::Config::default())
        .watches(
            serverless_services,
            watcher::Config::default(),
            move |sks: ServerlessService| {
                route::routes_referencing(
                    &sks_routes.state(),
                    sks.namespace().as_deref(),
                    &sks.name_any(),
                )
            },
        )
        .watches(
            revisions.clone(),
            watcher::Config::default(),
            move |revision: Revision| {
                route::routes_referencing(
                    &revision_routes.state(),
                    revision.namespace().as_deref(),
                    &revision.name_any(),
                )
            },
        )
        .run(route::reconcile, route::error_policy, ctx.clone())
        .for_each(|res| async move {
            if let Ok(o) = res {
                info!("Reconciled route: {:?}", o);
            }
        });

    let revision_controller = Controller::new(revisions, watcher::Config::default())
        .run(revision::reconcile, revision::error_policy, ctx)
        .for_each(|res| async move {
            if let Ok(o) = res {
                info!("Reconciled revision: {:?}", o);
            }
        });

    tokio::select! {
        _ = futures::future::join(route_controller, revision_controller) => {
            info!("Controller streams ended");
        }
        signal = wait_for_signal() => {
            match signal {
                Ok(name) => info!(signal = name, "Initiating graceful shutdown"),
                Err(e) => warn!(error = %e, "Signal handler failed, shutting down"),
            }
            // Mark not ready so K8s stops sending traffic during shutdown
            readiness.set_not_ready();
        }
    }

    shutdown_controller.shutdown();

    if let Err(e) = health_handle.await {
        warn!(error = %e, "Health server task failed");
    }

    info!("pylon controller shut down gracefully");
    Ok(())
}

#[cfg(test)]
#[path = "main_test.rs"]
mod tests;
