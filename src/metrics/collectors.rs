//! High-level recording interface over the raw Prometheus metrics.
//!
//! Every method is a no-op until `init_metrics()` has run, so library code
//! and tests can record freely.

use super::prometheus::{
    ACTIVE_WORKERS, JOBS_TOTAL, PEER_REQUESTS_TOTAL, PERSIST_FAILURES, PROBES_TOTAL, QUEUE_DEPTH,
};

/// Metrics collector for recording shardsweep operational metrics.
#[derive(Debug, Clone, Copy, Default)]
pub struct MetricsCollector;

impl MetricsCollector {
    pub fn new() -> Self {
        Self
    }

    /// Record one classified probe attempt (`success`, `negative`, `indeterminate`).
    pub fn record_probe(&self, result: &str) {
        if let Some(probes) = PROBES_TOTAL.get() {
            probes.with_label_values(&[result]).inc();
        }
    }

    pub fn worker_started(&self) {
        if let Some(gauge) = ACTIVE_WORKERS.get() {
            gauge.inc();
        }
    }

    pub fn worker_stopped(&self) {
        if let Some(gauge) = ACTIVE_WORKERS.get() {
            gauge.dec();
        }
    }

    /// Record a job entering `status`.
    pub fn record_job_status(&self, status: &str) {
        if let Some(jobs) = JOBS_TOTAL.get() {
            jobs.with_label_values(&[status]).inc();
        }
        tracing::trace!(status = status, "Recorded job status metric");
    }

    pub fn set_queue_depth(&self, pending: usize) {
        if let Some(gauge) = QUEUE_DEPTH.get() {
            gauge.set(pending as f64);
        }
    }

    pub fn record_persist_failure(&self) {
        if let Some(counter) = PERSIST_FAILURES.get() {
            counter.inc();
        }
    }

    /// Record a peer request (`add-job` / `stop-job`) and whether it succeeded.
    pub fn record_peer_request(&self, endpoint: &str, ok: bool) {
        if let Some(requests) = PEER_REQUESTS_TOTAL.get() {
            let outcome = if ok { "ok" } else { "failed" };
            requests.with_label_values(&[endpoint, outcome]).inc();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::{export_metrics, init_metrics};

    #[test]
    fn test_collector_records_after_init() {
        let _ = init_metrics();
        let collector = MetricsCollector::new();

        collector.record_probe("indeterminate");
        collector.record_job_status("completed");
        collector.record_peer_request("stop-job", false);
        collector.record_persist_failure();
        collector.set_queue_depth(3);

        let text = export_metrics();
        assert!(text.contains("shardsweep_jobs_total"));
        assert!(text.contains("shardsweep_peer_requests_total"));
        assert!(text.contains("shardsweep_queue_depth"));
    }

    #[test]
    fn test_worker_gauge_balances() {
        let _ = init_metrics();
        let collector = MetricsCollector::new();
        collector.worker_started();
        collector.worker_stopped();
    }
}
