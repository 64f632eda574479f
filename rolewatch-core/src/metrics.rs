//! Prometheus metrics for the poller
//!
//! Cluster facts derived by the polling cycles land in the `rolewatch_gauge`
//! family, keyed by their plugin-style metric name. The remaining families
//! describe the poller itself.

use prometheus::{
    register_counter_vec_with_registry, register_gauge_vec_with_registry,
    register_histogram_vec_with_registry, CounterVec, Encoder, GaugeVec, HistogramVec, Registry,
    TextEncoder,
};

/// Global metrics registry
pub static REGISTRY: std::sync::LazyLock<Registry> = std::sync::LazyLock::new(Registry::new);

/// Gauges emitted by polling cycles, e.g. `metric="PG_Cluster/SwitchOver"`
pub static CLUSTER_GAUGES: std::sync::LazyLock<GaugeVec> = std::sync::LazyLock::new(|| {
    register_gauge_vec_with_registry!(
        "rolewatch_gauge",
        "Cluster role and health values derived by the last polling cycle",
        &["metric"],
        REGISTRY.clone()
    ).expect("Failed to register CLUSTER_GAUGES")
});

/// Completed polling cycles
pub static CYCLES_TOTAL: std::sync::LazyLock<CounterVec> = std::sync::LazyLock::new(|| {
    register_counter_vec_with_registry!(
        "rolewatch_cycles_total",
        "Total number of polling cycles run",
        &["job"],
        REGISTRY.clone()
    ).expect("Failed to register CYCLES_TOTAL")
});

/// Cycles that ended with an error (state store unavailable)
pub static CYCLE_FAILURES_TOTAL: std::sync::LazyLock<CounterVec> = std::sync::LazyLock::new(|| {
    register_counter_vec_with_registry!(
        "rolewatch_cycle_failures_total",
        "Total number of polling cycles that failed",
        &["job"],
        REGISTRY.clone()
    ).expect("Failed to register CYCLE_FAILURES_TOTAL")
});

/// Wall time of a full polling cycle
pub static CYCLE_DURATION: std::sync::LazyLock<HistogramVec> = std::sync::LazyLock::new(|| {
    register_histogram_vec_with_registry!(
        "rolewatch_cycle_duration_seconds",
        "Polling cycle duration in seconds",
        &["job"],
        REGISTRY.clone()
    ).expect("Failed to register CYCLE_DURATION")
});

/// Latency of single node probes
pub static PROBE_DURATION: std::sync::LazyLock<HistogramVec> = std::sync::LazyLock::new(|| {
    register_histogram_vec_with_registry!(
        "rolewatch_probe_duration_seconds",
        "Node probe duration in seconds",
        &["backend", "state"],
        REGISTRY.clone()
    ).expect("Failed to register PROBE_DURATION")
});

/// Cycles in which more than one node claimed to be primary
pub static AMBIGUOUS_PRIMARY_TOTAL: std::sync::LazyLock<CounterVec> = std::sync::LazyLock::new(|| {
    register_counter_vec_with_registry!(
        "rolewatch_ambiguous_primary_total",
        "Total number of cycles that observed more than one primary",
        &["job"],
        REGISTRY.clone()
    ).expect("Failed to register AMBIGUOUS_PRIMARY_TOTAL")
});

/// Render all registered metrics in the Prometheus text format
pub fn gather_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    String::from_utf8(buffer).map_err(|_| prometheus::Error::Msg("Invalid UTF-8".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_registration() {
        CLUSTER_GAUGES.with_label_values(&["Test/Registered"]).set(2.0);
        CYCLES_TOTAL.with_label_values(&["test"]).inc();
        CYCLE_FAILURES_TOTAL.with_label_values(&["test"]).inc();
        CYCLE_DURATION.with_label_values(&["test"]).observe(0.5);
        PROBE_DURATION.with_label_values(&["sql", "primary"]).observe(0.01);
        AMBIGUOUS_PRIMARY_TOTAL.with_label_values(&["test"]).inc();

        let output = gather_metrics().unwrap();
        assert!(output.contains("rolewatch_gauge{metric=\"Test/Registered\"} 2"));
        assert!(output.contains("rolewatch_cycles_total"));
        assert!(output.contains("rolewatch_cycle_failures_total"));
        assert!(output.contains("rolewatch_cycle_duration_seconds"));
        assert!(output.contains("rolewatch_probe_duration_seconds"));
        assert!(output.contains("rolewatch_ambiguous_primary_total"));
    }
}
