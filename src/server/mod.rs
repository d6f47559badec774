//! HTTP surface of a node.
//!
//! Peers use `/add-job`, `/stop-job` and `/queue-status`; operators use
//! `/create-job` and the `/job/:id` management routes.

pub mod routes;

pub use routes::{build_router, serve, AppState};
