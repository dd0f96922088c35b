use crate::config::ControllerConfig;
use crate::controller::clock::{Clock, SystemClock};
use crate::controller::digest::{DigestResolver, SharedDigestResolver};
use crate::server::SharedMetrics;
use std::sync::Arc;
use thiserror::Error;

/// Field manager used for server-side apply
pub const FIELD_MANAGER: &str = "pylon-controller";

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("Kubernetes API error: {0}")]
    KubeError(#[from] kube::Error),

    #[error("Resource missing namespace")]
    MissingNamespace,

    #[error("Resource missing name")]
    MissingName,

    #[error("Invalid spec: {0}")]
    ValidationError(String),

    #[error("Failed to serialize status: {0}")]
    SerializationError(String),
}

/// Shared state handed to every reconcile call of both controllers
pub struct Context {
    pub client: kube::Client,
    pub config: ControllerConfig,
    pub resolver: SharedDigestResolver,
    pub clock: Arc<dyn Clock>,
    /// Optional controller metrics for Prometheus
    /// When Some, records reconciliation counts and durations
    pub metrics: Option<SharedMetrics>,
}

impl Context {
    pub fn new(
        client: kube::Client,
        config: ControllerConfig,
        resolver: SharedDigestResolver,
        metrics: Option<SharedMetrics>,
    ) -> Self {
        Context {
            client,
            config,
            resolver,
            clock: Arc::new(SystemClock),
            metrics,
        }
    }

    #[cfg(test)]
    #[allow(clippy::unwrap_used)]
    pub fn new_mock() -> Self {
        let _ = rustls::crypto::ring::default_provider().install_default();

        // Never contacted in unit tests
        let mut kube_config = kube::Config::new("https://localhost:8080".parse().unwrap());
        kube_config.default_namespace = "default".to_string();
        kube_config.accept_invalid_certs = true;

        let client = kube::Client::try_from(kube_config).unwrap();
        let config = ControllerConfig::default();

        Context {
            client,
            resolver: DigestResolver::new(None, config.registry.timeout).shared(),
            config,
            clock: Arc::new(SystemClock),
            metrics: None,
        }
    }

    pub(crate) fn record_success(&self, kind: &str, start: std::time::Instant) {
        if let Some(ref metrics) = self.metrics {
            metrics.record_reconciliation_success(kind, start.elapsed().as_secs_f64());
        }
    }
}
