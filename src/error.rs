//! Error types for shardsweep operations.
//!
//! Defines error types for the major subsystems:
//! - Progress persistence
//! - Resource leasing and channel provisioning
//! - Probing
//! - The job queue and peer communication
//! - The HTTP surface

use std::time::Duration;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use thiserror::Error;

/// Errors raised while reading or writing progress files.
///
/// Mutating store operations log these and keep going; they only surface
/// from explicit operator actions such as `reset`.
#[derive(Debug, Error)]
pub enum ProgressError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Errors that can occur while leasing resources.
#[derive(Debug, Error)]
pub enum ResourceError {
    /// Round-robin mode found no resources at all. Fatal for the process.
    #[error("Resource pool is empty; operator intervention required")]
    PoolEmpty,

    /// Dedicated mode found every resource already leased.
    #[error("No free resource for worker {worker_id}")]
    NoFreeResource { worker_id: usize },

    #[error("Unknown resource '{0}'")]
    UnknownResource(String),

    #[error("Resource '{0}' already exists in the pool")]
    DuplicateResource(String),

    /// Channel acquisition was aborted by the cancel flag.
    #[error("Channel acquisition for '{0}' cancelled")]
    Cancelled(String),
}

/// Errors returned by a channel provisioner. Always treated as transient.
#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error("Provisioning unavailable: {0}")]
    Unavailable(String),

    #[error("Provisioning request failed: {0}")]
    Request(String),
}

/// Errors from a single probe attempt. All of them classify as indeterminate.
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Unexpected response: {0}")]
    UnexpectedResponse(String),

    #[error("Probe timed out after {0:?}")]
    Timeout(Duration),

    #[error("Failed to spawn probe command: {0}")]
    Spawn(String),
}

/// Errors from queue management.
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Job {0} not found")]
    JobNotFound(String),

    #[error("Job {id} is {status}; only pending jobs can be modified")]
    JobNotPending { id: String, status: String },

    #[error("Job {id} is {status} and cannot be resumed")]
    NotResumable { id: String, status: String },

    #[error("Invalid range [{start}, {end}]: start must be <= end")]
    InvalidRange { start: u64, end: u64 },

    #[error("Range of {len} units exceeds the limit of {max} per job")]
    RangeTooLarge { len: u64, max: u64 },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Errors talking to a peer node.
#[derive(Debug, Error)]
pub enum PeerError {
    #[error("Request to {address} failed: {message}")]
    Request { address: String, message: String },

    #[error("Peer {address} answered with status {code}")]
    Status { address: String, code: u16 },
}

/// Errors surfaced by HTTP handlers.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = match &self {
            ServerError::Queue(QueueError::JobNotFound(_)) => StatusCode::NOT_FOUND,
            ServerError::Queue(QueueError::JobNotPending { .. })
            | ServerError::Queue(QueueError::NotResumable { .. }) => StatusCode::CONFLICT,
            ServerError::Queue(QueueError::InvalidRange { .. })
            | ServerError::Queue(QueueError::RangeTooLarge { .. })
            | ServerError::BadRequest(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let body = serde_json::json!({ "error": self.to_string() });
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ResourceError::NoFreeResource { worker_id: 3 };
        assert!(err.to_string().contains("worker 3"));

        let err = QueueError::InvalidRange { start: 9, end: 1 };
        assert!(err.to_string().contains("[9, 1]"));

        let err = ProbeError::Timeout(Duration::from_secs(60));
        assert!(err.to_string().contains("60"));
    }

    #[test]
    fn test_server_error_status_mapping() {
        let resp = ServerError::from(QueueError::JobNotFound("x".into())).into_response();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);

        let resp = ServerError::from(QueueError::JobNotPending {
            id: "x".into(),
            status: "running".into(),
        })
        .into_response();
        assert_eq!(resp.status(), StatusCode::CONFLICT);

        let resp = ServerError::BadRequest("nope".into()).into_response();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let resp = ServerError::from(QueueError::RangeTooLarge { len: 10, max: 5 }).into_response();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }
}
