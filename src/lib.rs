//! shardsweep: distributed, credential-partitioned sweeps over numeric unit
//! ranges.
//!
//! A campaign splits an inclusive range across nodes, then across workers on
//! each node. Every worker holds a scarce resource, probes its units through
//! a channel provisioned for that resource, and persists progress so a rerun
//! never probes a unit twice. The first success anywhere stops every node.

// Core modules
pub mod campaign;
pub mod cli;
pub mod config;
pub mod error;
pub mod metrics;
pub mod notify;
pub mod probe;
pub mod progress;
pub mod queue;
pub mod resources;
pub mod server;

// Re-export commonly used types
pub use config::{ConfigError, SweepConfig};
pub use error::{
    PeerError, ProbeError, ProgressError, ProvisionError, QueueError, ResourceError, ServerError,
};
