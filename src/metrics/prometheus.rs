//! Prometheus metrics registration and export.
//!
//! This module defines all Prometheus metrics used by shardsweep and provides
//! functions for initializing, registering, and exporting metrics.

use prometheus::{Counter, CounterVec, Encoder, Gauge, Opts, Registry, TextEncoder};
use std::sync::{Mutex, OnceLock};

/// Global Prometheus registry for all shardsweep metrics.
pub static REGISTRY: OnceLock<Registry> = OnceLock::new();

/// Total probe attempts, labeled by classified result.
pub static PROBES_TOTAL: OnceLock<CounterVec> = OnceLock::new();

/// Number of workers currently running.
pub static ACTIVE_WORKERS: OnceLock<Gauge> = OnceLock::new();

/// Jobs reaching a status, labeled by status.
pub static JOBS_TOTAL: OnceLock<CounterVec> = OnceLock::new();

/// Number of pending jobs in the local queue.
pub static QUEUE_DEPTH: OnceLock<Gauge> = OnceLock::new();

/// Progress writes that failed to reach disk.
pub static PERSIST_FAILURES: OnceLock<Counter> = OnceLock::new();

/// Requests sent to peer nodes, labeled by endpoint and outcome.
pub static PEER_REQUESTS_TOTAL: OnceLock<CounterVec> = OnceLock::new();

/// Initialize all metrics and register them with the registry.
///
/// Safe to call more than once; later calls leave the first registry in place.
///
/// # Errors
///
/// Returns a `prometheus::Error` if metric registration fails.
pub fn init_metrics() -> Result<(), prometheus::Error> {
    static INIT: Mutex<()> = Mutex::new(());
    let _guard = INIT.lock().unwrap_or_else(|e| e.into_inner());

    if REGISTRY.get().is_some() {
        return Ok(());
    }

    let registry = Registry::new();

    let probes_total = CounterVec::new(
        Opts::new("shardsweep_probes_total", "Total probe attempts"),
        &["result"],
    )?;

    let active_workers = Gauge::new("shardsweep_active_workers", "Number of active workers")?;

    let jobs_total = CounterVec::new(
        Opts::new("shardsweep_jobs_total", "Jobs reaching each status"),
        &["status"],
    )?;

    let queue_depth = Gauge::new("shardsweep_queue_depth", "Pending jobs in the local queue")?;

    let persist_failures = Counter::new(
        "shardsweep_persist_failures_total",
        "Progress writes that failed to reach disk",
    )?;

    let peer_requests_total = CounterVec::new(
        Opts::new("shardsweep_peer_requests_total", "Requests sent to peer nodes"),
        &["endpoint", "outcome"],
    )?;

    registry.register(Box::new(probes_total.clone()))?;
    registry.register(Box::new(active_workers.clone()))?;
    registry.register(Box::new(jobs_total.clone()))?;
    registry.register(Box::new(queue_depth.clone()))?;
    registry.register(Box::new(persist_failures.clone()))?;
    registry.register(Box::new(peer_requests_total.clone()))?;

    let _ = REGISTRY.set(registry);
    let _ = PROBES_TOTAL.set(probes_total);
    let _ = ACTIVE_WORKERS.set(active_workers);
    let _ = JOBS_TOTAL.set(jobs_total);
    let _ = QUEUE_DEPTH.set(queue_depth);
    let _ = PERSIST_FAILURES.set(persist_failures);
    let _ = PEER_REQUESTS_TOTAL.set(peer_requests_total);

    tracing::info!("Prometheus metrics initialized successfully");

    Ok(())
}

/// Export all registered metrics in Prometheus text format.
pub fn export_metrics() -> String {
    let Some(registry) = REGISTRY.get() else {
        return "# Metrics not initialized. Call init_metrics() first.\n".to_string();
    };

    let encoder = TextEncoder::new();
    let metric_families = registry.gather();

    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        return format!("# Error encoding metrics: {}\n", e);
    }

    String::from_utf8(buffer)
        .unwrap_or_else(|e| format!("# Error converting metrics to UTF-8: {}\n", e))
}

/// HTTP handler for the /metrics endpoint.
pub async fn metrics_handler() -> String {
    export_metrics()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_metrics_idempotent() {
        assert!(init_metrics().is_ok());
        assert!(init_metrics().is_ok());
        assert!(REGISTRY.get().is_some());
    }

    #[test]
    fn test_metrics_after_init() {
        let _ = init_metrics();

        if let Some(probes) = PROBES_TOTAL.get() {
            probes.with_label_values(&["negative"]).inc();
        }

        let metrics = export_metrics();
        assert!(!metrics.starts_with("# Error"));
        assert!(metrics.contains("shardsweep_probes_total"));
    }
}
