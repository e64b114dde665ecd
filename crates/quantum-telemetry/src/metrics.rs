//! Prometheus metrics for the bootstrap orchestrator.
//!
//! All metrics follow the naming convention: `qc_<subsystem>_<metric>_<unit>`
//!
//! ## Metric Types
//!
//! - **Counter**: Monotonically increasing value (e.g., subsystems_registered_total)
//! - **Gauge**: Value that can go up or down (e.g., initializations_in_flight)
//! - **Histogram**: Distribution of values (e.g., initialization_duration_seconds)

use lazy_static::lazy_static;
use prometheus::{
    exponential_buckets, Counter, CounterVec, Encoder, Gauge, HistogramOpts, HistogramVec, Opts,
    Registry, TextEncoder,
};
use std::sync::Arc;

use crate::TelemetryError;

lazy_static! {
    /// Global metrics registry
    pub static ref REGISTRY: Registry = Registry::new();

    // =========================================================================
    // BOOTSTRAP METRICS
    // =========================================================================

    /// Total `register` calls accepted by the orchestrator
    pub static ref SUBSYSTEMS_REGISTERED: Counter = Counter::new(
        "qc_bootstrap_subsystems_registered_total",
        "Total number of subsystem registrations"
    ).expect("metric creation failed");

    /// Finished initialization attempts
    pub static ref INITIALIZATIONS: CounterVec = CounterVec::new(
        Opts::new("qc_bootstrap_initializations_total", "Finished initialization attempts"),
        &["subsystem", "outcome"]  // outcome: initialized/rejected/timeout/panicked/cancelled
    ).expect("metric creation failed");

    /// Time spent inside subsystem initializers
    pub static ref INITIALIZATION_DURATION: HistogramVec = HistogramVec::new(
        HistogramOpts::new(
            "qc_bootstrap_initialization_duration_seconds",
            "Time spent awaiting subsystem initializers"
        ).buckets(exponential_buckets(0.001, 2.0, 15).expect("valid buckets")),
        &["subsystem"]
    ).expect("metric creation failed");

    /// Initialization attempts currently awaiting their initializer
    pub static ref INITIALIZATIONS_IN_FLIGHT: Gauge = Gauge::new(
        "qc_bootstrap_initializations_in_flight",
        "Initialization attempts currently in flight"
    ).expect("metric creation failed");

    // =========================================================================
    // EVENT BUS METRICS
    // =========================================================================

    /// Lifecycle events published
    pub static ref EVENTS_PUBLISHED: CounterVec = CounterVec::new(
        Opts::new("qc_bootstrap_events_published_total", "Lifecycle events published"),
        &["event"]
    ).expect("metric creation failed");
}

/// Handle to the registry the metrics were registered with
pub struct MetricsHandle {
    _registry: Arc<Registry>,
}

/// Register all metrics with the global registry.
pub fn register_metrics() -> Result<MetricsHandle, TelemetryError> {
    let metrics: Vec<Box<dyn prometheus::core::Collector>> = vec![
        Box::new(SUBSYSTEMS_REGISTERED.clone()),
        Box::new(INITIALIZATIONS.clone()),
        Box::new(INITIALIZATION_DURATION.clone()),
        Box::new(INITIALIZATIONS_IN_FLIGHT.clone()),
        Box::new(EVENTS_PUBLISHED.clone()),
    ];

    for metric in metrics {
        REGISTRY
            .register(metric)
            .map_err(|e| TelemetryError::MetricsInit(e.to_string()))?;
    }

    Ok(MetricsHandle {
        _registry: Arc::new(REGISTRY.clone()),
    })
}

/// Encode all metrics as Prometheus text format.
pub fn encode_metrics() -> Result<String, TelemetryError> {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| TelemetryError::MetricsInit(e.to_string()))?;
    String::from_utf8(buffer).map_err(|e| TelemetryError::MetricsInit(e.to_string()))
}
