//! Metrics module for Prometheus-based monitoring.
//!
//! Covers probe outcomes, worker activity, job lifecycle, persistence
//! failures and peer traffic.
//!
//! # Example
//!
//! ```ignore
//! use shardsweep::metrics::{init_metrics, export_metrics, MetricsCollector};
//!
//! init_metrics().expect("Failed to initialize metrics");
//! MetricsCollector::new().record_probe("negative");
//! let metrics_text = export_metrics();
//! ```

pub mod collectors;
pub mod prometheus;

pub use collectors::MetricsCollector;
pub use prometheus::{export_metrics, init_metrics, metrics_handler};

pub use prometheus::{
    ACTIVE_WORKERS, JOBS_TOTAL, PEER_REQUESTS_TOTAL, PERSIST_FAILURES, PROBES_TOTAL, QUEUE_DEPTH,
    REGISTRY,
};
