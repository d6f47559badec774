//! Axum routes for the peer and operator HTTP surface.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use tracing::{info, warn};

use crate::error::ServerError;
use crate::metrics::metrics_handler;
use crate::queue::{CreateJobRequest, JobUpdate, QueueManager, RemoteJob, StopJobRequest};

/// Shared application state
pub struct AppState {
    pub manager: Arc<QueueManager>,
}

impl AppState {
    pub fn new(manager: Arc<QueueManager>) -> Self {
        Self { manager }
    }
}

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics_handler))
        .route("/add-job", post(add_job))
        .route("/stop-job", post(stop_job))
        .route("/queue-status", get(queue_status))
        .route("/create-job", post(create_job))
        .route("/job/:id", axum::routing::delete(delete_job).put(update_job))
        .route("/job/:id/resume", post(resume_job))
        .with_state(state)
}

// Handlers

async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let config = state.manager.config();
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "node_id": config.node_id,
        "total_nodes": config.total_nodes,
    }))
}

async fn add_job(
    State(state): State<Arc<AppState>>,
    Json(job): Json<RemoteJob>,
) -> Result<impl IntoResponse, ServerError> {
    let node_id = state.manager.config().node_id;
    if job.node_id != node_id {
        warn!(job_id = %job.id, job_node = job.node_id, node_id, "Accepting shard addressed to another node id");
    }
    state.manager.add_job(job)?;
    Ok(Json(serde_json::json!({ "accepted": true })))
}

async fn stop_job(
    State(state): State<Arc<AppState>>,
    Json(body): Json<StopJobRequest>,
) -> impl IntoResponse {
    let stopped = state
        .manager
        .stop_local_job(&body.target_key, &body.found_unit);
    info!(target_key = %body.target_key, found_unit = %body.found_unit, stopped, "Stop request from peer");
    Json(serde_json::json!({ "stopped": stopped }))
}

async fn queue_status(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.manager.status())
}

async fn create_job(
    State(state): State<Arc<AppState>>,
    Json(body): Json<CreateJobRequest>,
) -> Result<impl IntoResponse, ServerError> {
    if body.target_key.trim().is_empty() {
        return Err(ServerError::BadRequest("target_key must not be empty".to_string()));
    }
    let jobs = state.manager.create_job_for_all_nodes(body).await?;
    Ok(Json(jobs))
}

async fn delete_job(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ServerError> {
    let removed = state.manager.delete_job(&id)?;
    Ok(Json(removed))
}

async fn update_job(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(update): Json<JobUpdate>,
) -> Result<impl IntoResponse, ServerError> {
    let updated = state.manager.update_job(&id, update)?;
    Ok(Json(updated))
}

async fn resume_job(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ServerError> {
    let resumed = state.manager.resume_job(&id)?;
    Ok(Json(resumed))
}

// Server startup

/// Serves the node's HTTP surface until ctrl-c or a fatal job error.
pub async fn serve(manager: Arc<QueueManager>, bind: &str) -> Result<(), ServerError> {
    let addr: SocketAddr = bind
        .parse()
        .map_err(|e| ServerError::Other(format!("Invalid bind address '{}': {}", bind, e)))?;

    let mut fatal = manager.shutdown_signal();
    let router = build_router(Arc::new(AppState::new(Arc::clone(&manager))));

    let config = manager.config();
    info!(
        %addr,
        node_id = config.node_id,
        total_nodes = config.total_nodes,
        "Node listening"
    );

    // Pick up anything left pending from a previous run.
    manager.start_next_job();

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            tokio::select! {
                _ = shutdown_signal() => {}
                _ = fatal.wait_for(|stop| *stop) => {
                    warn!("Fatal condition reported, shutting down");
                }
            }
        })
        .await?;

    info!("Server shut down");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    info!("Shutting down gracefully");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::campaign::{StopSignal, UnitRange};
    use crate::config::SweepConfig;
    use crate::queue::{JobOutcome, JobRunner, JobStatus, PeerClient, QueueStatus};
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use std::time::Duration;
    use tempfile::TempDir;
    use tower::ServiceExt;

    /// Runs until cancelled.
    struct IdleRunner;

    #[async_trait]
    impl JobRunner for IdleRunner {
        async fn run_job(&self, _job: RemoteJob, cancel: StopSignal) -> JobOutcome {
            while !cancel.is_cancelled() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
            JobOutcome::cancelled()
        }
    }

    fn app(dir: &TempDir) -> (Router, Arc<QueueManager>) {
        let config = Arc::new(
            SweepConfig::new()
                .with_data_dir(dir.path())
                .with_next_job_delay(Duration::from_millis(10)),
        );
        let peers = PeerClient::from_config(&config).expect("client");
        let manager = QueueManager::open(config, Arc::new(IdleRunner), peers).expect("open");
        let router = build_router(Arc::new(AppState::new(manager.clone())));
        (router, manager)
    }

    fn json_request(method: &str, uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn job_json(id: &str, target: &str) -> serde_json::Value {
        let range = UnitRange::new(0, 99).unwrap();
        serde_json::to_value(RemoteJob::new(id, "sweep", target, range, range, 1, 1)).unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let dir = TempDir::new().unwrap();
        let (router, _) = app(&dir);
        let response = router
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["status"], "ok");
    }

    #[tokio::test]
    async fn test_add_job_then_status() {
        let dir = TempDir::new().unwrap();
        let (router, _) = app(&dir);

        let response = router
            .clone()
            .oneshot(json_request("POST", "/add-job", job_json("a", "x")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["accepted"], true);

        let response = router
            .oneshot(Request::get("/queue-status").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status: QueueStatus = serde_json::from_value(body_json(response).await).unwrap();
        assert_eq!(status.counts.running, 1);
        assert_eq!(status.current_job.as_deref(), Some("a"));
    }

    #[tokio::test]
    async fn test_stop_job_cancels_matching_target() {
        let dir = TempDir::new().unwrap();
        let (router, manager) = app(&dir);
        manager.add_job(serde_json::from_value(job_json("a", "x")).unwrap()).unwrap();

        let response = router
            .clone()
            .oneshot(json_request(
                "POST",
                "/stop-job",
                serde_json::json!({ "target_key": "y", "found_unit": "0001" }),
            ))
            .await
            .unwrap();
        assert_eq!(body_json(response).await["stopped"], false);

        let response = router
            .oneshot(json_request(
                "POST",
                "/stop-job",
                serde_json::json!({ "target_key": "x", "found_unit": "2500" }),
            ))
            .await
            .unwrap();
        assert_eq!(body_json(response).await["stopped"], true);
        assert_eq!(manager.job("a").unwrap().status, JobStatus::Cancelled);
    }

    #[tokio::test]
    async fn test_create_job_rejects_inverted_range() {
        let dir = TempDir::new().unwrap();
        let (router, _) = app(&dir);
        let response = router
            .oneshot(json_request(
                "POST",
                "/create-job",
                serde_json::json!({
                    "name": "sweep",
                    "target_key": "acct",
                    "range": { "start": 10, "end": 1 }
                }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_job_management_status_codes() {
        let dir = TempDir::new().unwrap();
        let (router, manager) = app(&dir);
        manager.add_job(serde_json::from_value(job_json("running", "x")).unwrap()).unwrap();
        manager.add_job(serde_json::from_value(job_json("queued", "y")).unwrap()).unwrap();

        let missing = router
            .clone()
            .oneshot(Request::delete("/job/nope").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(missing.status(), StatusCode::NOT_FOUND);

        let busy = router
            .clone()
            .oneshot(json_request("PUT", "/job/running", serde_json::json!({ "name": "z" })))
            .await
            .unwrap();
        assert_eq!(busy.status(), StatusCode::CONFLICT);

        let updated = router
            .clone()
            .oneshot(json_request("PUT", "/job/queued", serde_json::json!({ "name": "z" })))
            .await
            .unwrap();
        assert_eq!(updated.status(), StatusCode::OK);
        assert_eq!(body_json(updated).await["name"], "z");

        let deleted = router
            .oneshot(Request::delete("/job/queued").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(deleted.status(), StatusCode::OK);
        assert!(manager.job("queued").is_none());
    }

    #[tokio::test]
    async fn test_resume_requires_finished_job() {
        let dir = TempDir::new().unwrap();
        let (router, manager) = app(&dir);
        manager.add_job(serde_json::from_value(job_json("a", "x")).unwrap()).unwrap();

        let response = router
            .oneshot(Request::post("/job/a/resume").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }
}
