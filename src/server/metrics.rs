//! Prometheus metrics for the route and revision controllers

use prometheus::{
    histogram_opts, opts, Encoder, HistogramVec, IntCounterVec, Registry, TextEncoder,
};
use std::sync::Arc;

/// Metrics shared between the controllers and the health server
pub type SharedMetrics = Arc<ControllerMetrics>;

pub struct ControllerMetrics {
    registry: Registry,
    reconciliations: IntCounterVec,
    reconcile_duration: HistogramVec,
    digest_resolutions: IntCounterVec,
}

impl ControllerMetrics {
    /// Create the metrics and register them with a fresh registry
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let reconciliations = IntCounterVec::new(
            opts!(
                "pylon_reconciliations_total",
                "Reconciliations by resource kind and result"
            ),
            &["kind", "result"],
        )?;
        let reconcile_duration = HistogramVec::new(
            histogram_opts!(
                "pylon_reconcile_duration_seconds",
                "Time taken by one reconciliation"
            )
            .buckets(vec![0.01, 0.05, 0.1, 0.25, 0.5, 1., 5., 15.]),
            &["kind"],
        )?;
        let digest_resolutions = IntCounterVec::new(
            opts!(
                "pylon_digest_resolutions_total",
                "Image digest resolutions by outcome"
            ),
            &["outcome"],
        )?;

        registry.register(Box::new(reconciliations.clone()))?;
        registry.register(Box::new(reconcile_duration.clone()))?;
        registry.register(Box::new(digest_resolutions.clone()))?;

        Ok(ControllerMetrics {
            registry,
            reconciliations,
            reconcile_duration,
            digest_resolutions,
        })
    }

    pub fn record_reconciliation_success(&self, kind: &str, duration_secs: f64) {
        self.record(kind, "success", duration_secs);
    }

    pub fn record_reconciliation_error(&self, kind: &str, duration_secs: f64) {
        self.record(kind, "error", duration_secs);
    }

    /// Count one digest resolution ("resolved", "skipped" or an error label)
    pub fn record_digest_resolution(&self, outcome: &str) {
        self.digest_resolutions.with_label_values(&[outcome]).inc();
    }

    fn record(&self, kind: &str, result: &str, duration_secs: f64) {
        self.reconciliations
            .with_label_values(&[kind, result])
            .inc();
        self.reconcile_duration
            .with_label_values(&[kind])
            .observe(duration_secs);
    }

    /// Render all metrics in the Prometheus text format
    pub fn encode(&self) -> Result<String, prometheus::Error> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

/// Create the shared metrics registry
pub fn create_metrics() -> Result<SharedMetrics, prometheus::Error> {
    Ok(Arc::new(ControllerMetrics::new()?))
}
