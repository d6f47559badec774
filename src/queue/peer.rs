//! HTTP client for talking to other nodes.

use std::time::Duration;

use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::debug;

use crate::config::SweepConfig;
use crate::error::PeerError;
use crate::metrics::MetricsCollector;

use super::job::{CreateJobRequest, QueueStatus, RemoteJob, StopJobRequest};

/// Timeout for operator-facing calls made by the CLI.
const DEFAULT_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Deserialize)]
struct StopJobResponse {
    stopped: bool,
}

/// Client for a peer's HTTP surface. Each call is a single attempt.
#[derive(Clone)]
pub struct PeerClient {
    client: Client,
    add_job_timeout: Duration,
    stop_job_timeout: Duration,
    metrics: MetricsCollector,
}

impl PeerClient {
    pub fn new(add_job_timeout: Duration, stop_job_timeout: Duration) -> Result<Self, PeerError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
            .build()
            .map_err(|e| PeerError::Request {
                address: String::new(),
                message: e.to_string(),
            })?;
        Ok(Self {
            client,
            add_job_timeout,
            stop_job_timeout,
            metrics: MetricsCollector::new(),
        })
    }

    pub fn from_config(config: &SweepConfig) -> Result<Self, PeerError> {
        Self::new(config.add_job_timeout, config.stop_job_timeout)
    }

    /// Ships a job to `address`'s `/add-job`.
    pub async fn add_job(&self, address: &str, job: &RemoteJob) -> Result<(), PeerError> {
        let request = self
            .client
            .post(endpoint(address, "/add-job"))
            .timeout(self.add_job_timeout)
            .json(job);
        let result = send(address, request).await.map(|_| ());
        self.metrics.record_peer_request("add-job", result.is_ok());
        result
    }

    /// Asks `address` to cancel its running job for the target.
    /// Returns whether the peer actually stopped something.
    pub async fn stop_job(&self, address: &str, body: &StopJobRequest) -> Result<bool, PeerError> {
        let request = self
            .client
            .post(endpoint(address, "/stop-job"))
            .timeout(self.stop_job_timeout)
            .json(body);
        let result = match send(address, request).await {
            Ok(response) => decode::<StopJobResponse>(address, response)
                .await
                .map(|r| r.stopped),
            Err(e) => Err(e),
        };
        self.metrics.record_peer_request("stop-job", result.is_ok());
        result
    }

    pub async fn queue_status(&self, address: &str) -> Result<QueueStatus, PeerError> {
        let response = send(address, self.client.get(endpoint(address, "/queue-status"))).await?;
        decode(address, response).await
    }

    pub async fn create_job(
        &self,
        address: &str,
        body: &CreateJobRequest,
    ) -> Result<Vec<RemoteJob>, PeerError> {
        let request = self.client.post(endpoint(address, "/create-job")).json(body);
        let response = send(address, request).await?;
        decode(address, response).await
    }

    pub async fn resume_job(&self, address: &str, job_id: &str) -> Result<RemoteJob, PeerError> {
        let path = format!("/job/{}/resume", job_id);
        let response = send(address, self.client.post(endpoint(address, &path))).await?;
        decode(address, response).await
    }
}

fn endpoint(address: &str, path: &str) -> String {
    format!("{}{}", address.trim_end_matches('/'), path)
}

async fn send(address: &str, request: RequestBuilder) -> Result<reqwest::Response, PeerError> {
    let response = request.send().await.map_err(|e| PeerError::Request {
        address: address.to_string(),
        message: e.to_string(),
    })?;

    let status = response.status();
    debug!(address, status = %status, "Peer responded");
    if !status.is_success() {
        return Err(PeerError::Status {
            address: address.to_string(),
            code: status.as_u16(),
        });
    }
    Ok(response)
}

async fn decode<T: DeserializeOwned>(address: &str, response: reqwest::Response) -> Result<T, PeerError> {
    response.json::<T>().await.map_err(|e| PeerError::Request {
        address: address.to_string(),
        message: format!("invalid response body: {}", e),
    })
}
