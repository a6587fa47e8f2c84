//! Prometheus metrics for the artifact pipeline.

use prometheus::{
    self, Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts, Registry,
    TextEncoder,
};
use std::sync::{LazyLock, Once};

/// Global Prometheus registry for all metrics.
pub static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

// Store metrics
pub static ARTIFACTS_STORED: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "depot_artifacts_stored_total",
            "Total files stored by file kind",
        ),
        &["kind"],
    )
    .expect("metric creation failed")
});

pub static BYTES_STORED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new("depot_bytes_stored_total", "Total bytes stored")
        .expect("metric creation failed")
});

pub static STORE_FAILURES: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "depot_store_failures_total",
            "Total failed store calls by error code",
        ),
        &["code"],
    )
    .expect("metric creation failed")
});

pub static STORE_DURATION: LazyLock<Histogram> = LazyLock::new(|| {
    Histogram::with_opts(
        HistogramOpts::new(
            "depot_store_duration_seconds",
            "Time from first inbound byte to committed index entry",
        )
        .buckets(vec![0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 30.0, 120.0]),
    )
    .expect("metric creation failed")
});

// Checksum metrics
pub static CHECKSUM_RECONCILIATIONS: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "depot_checksum_reconciliations_total",
            "Checksum file reconciliations by outcome",
        ),
        &["outcome"],
    )
    .expect("metric creation failed")
});

pub static CHECKSUM_CACHE_EVICTIONS: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "depot_checksum_cache_evictions_total",
        "Checksum cache entries evicted before reconciliation",
    )
    .expect("metric creation failed")
});

// Event metrics
pub static EVENTS_DISPATCHED: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "depot_artifact_events_total",
            "Lifecycle events dispatched by type",
        ),
        &["event"],
    )
    .expect("metric creation failed")
});

/// Guard to ensure metrics are only registered once.
static REGISTER_ONCE: Once = Once::new();

/// Register all metrics with the global registry.
///
/// Subsequent calls are no-ops.
pub fn register_metrics() {
    REGISTER_ONCE.call_once(|| {
        REGISTRY
            .register(Box::new(ARTIFACTS_STORED.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(BYTES_STORED.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(STORE_FAILURES.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(STORE_DURATION.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(CHECKSUM_RECONCILIATIONS.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(CHECKSUM_CACHE_EVICTIONS.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(EVENTS_DISPATCHED.clone()))
            .expect("metric registration failed");
    });
}

/// Render every registered metric in the Prometheus text format.
pub fn gather_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();

    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
}
