//! Job records exchanged between nodes.
//!
//! - `RemoteJob`: one node's shard of a campaign, as stored and shipped
//! - `JobStatus`: lifecycle state of a job
//! - `JobSettings`: optional per-job overrides of node defaults
//! - Request/response bodies for the peer HTTP surface

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::campaign::UnitRange;

/// Lifecycle state of a job.
///
/// Transitions only move forward: `pending -> running -> {completed | error |
/// cancelled}`, `pending -> cancelled`, and `running -> interrupted` on
/// restart. Only an operator resume returns a job to `pending`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Error,
    Cancelled,
    Interrupted,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Error => "error",
            JobStatus::Cancelled => "cancelled",
            JobStatus::Interrupted => "interrupted",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Error | JobStatus::Cancelled
        )
    }

    /// Whether an operator may clone this job back to pending.
    pub fn is_resumable(&self) -> bool {
        self.is_terminal() || *self == JobStatus::Interrupted
    }

    fn can_become(&self, next: JobStatus) -> bool {
        use JobStatus::*;
        matches!(
            (self, next),
            (Pending, Running)
                | (Pending, Cancelled)
                | (Running, Completed)
                | (Running, Error)
                | (Running, Cancelled)
                | (Running, Interrupted)
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// Per-job overrides. `None` falls back to the node's configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub concurrency: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shuffle: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_indeterminate: Option<u32>,
}

/// One node's shard of a campaign.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteJob {
    /// Globally unique; shards of one campaign share a prefix.
    pub id: String,
    pub name: String,
    pub target_key: String,
    /// This node's shard.
    pub range: UnitRange,
    /// The full campaign range before splitting.
    pub original_range: UnitRange,
    pub status: JobStatus,
    /// 1-based node this shard belongs to.
    pub node_id: usize,
    pub total_nodes: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_address: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub found_unit: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub settings: JobSettings,
}

impl RemoteJob {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        target_key: impl Into<String>,
        range: UnitRange,
        original_range: UnitRange,
        node_id: usize,
        total_nodes: usize,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            target_key: target_key.into(),
            range,
            original_range,
            status: JobStatus::Pending,
            node_id,
            total_nodes,
            node_address: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            found_unit: None,
            error: None,
            settings: JobSettings::default(),
        }
    }

    pub fn with_settings(mut self, settings: JobSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_node_address(mut self, address: impl Into<String>) -> Self {
        self.node_address = Some(address.into());
        self
    }

    /// Moves to `next` if the lifecycle allows it. Returns whether it moved.
    pub fn transition(&mut self, next: JobStatus) -> bool {
        if !self.status.can_become(next) {
            return false;
        }
        let now = Utc::now();
        match next {
            JobStatus::Running => self.started_at = Some(now),
            JobStatus::Completed | JobStatus::Error | JobStatus::Cancelled => {
                self.completed_at = Some(now)
            }
            JobStatus::Pending | JobStatus::Interrupted => {}
        }
        self.status = next;
        true
    }

    /// Operator resume: back to pending with the run history cleared.
    pub fn reset_for_resume(&mut self) -> bool {
        if !self.status.is_resumable() {
            return false;
        }
        self.status = JobStatus::Pending;
        self.started_at = None;
        self.completed_at = None;
        self.found_unit = None;
        self.error = None;
        true
    }
}

/// Body of `POST /create-job`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateJobRequest {
    pub name: String,
    pub target_key: String,
    pub range: UnitRange,
    #[serde(default)]
    pub settings: JobSettings,
}

/// Body of `POST /stop-job`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StopJobRequest {
    pub target_key: String,
    pub found_unit: String,
}

/// Body of `PUT /job/{id}`. Absent fields are left unchanged.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobUpdate {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub target_key: Option<String>,
    #[serde(default)]
    pub range: Option<UnitRange>,
    #[serde(default)]
    pub settings: Option<JobSettings>,
}

/// Job counts by status.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCounts {
    pub pending: usize,
    pub running: usize,
    pub completed: usize,
    pub error: usize,
    pub cancelled: usize,
    pub interrupted: usize,
}

impl StatusCounts {
    pub fn tally<'a>(jobs: impl IntoIterator<Item = &'a RemoteJob>) -> Self {
        let mut counts = Self::default();
        for job in jobs {
            let slot = match job.status {
                JobStatus::Pending => &mut counts.pending,
                JobStatus::Running => &mut counts.running,
                JobStatus::Completed => &mut counts.completed,
                JobStatus::Error => &mut counts.error,
                JobStatus::Cancelled => &mut counts.cancelled,
                JobStatus::Interrupted => &mut counts.interrupted,
            };
            *slot += 1;
        }
        counts
    }
}

/// Body of `GET /queue-status`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueStatus {
    pub node_id: usize,
    pub total_nodes: usize,
    pub node_addresses: Vec<String>,
    pub counts: StatusCounts,
    pub current_job: Option<String>,
    pub jobs: Vec<RemoteJob>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job() -> RemoteJob {
        let range = UnitRange::new(0, 99).unwrap();
        RemoteJob::new("j1", "sweep", "acct", range, range, 1, 1)
    }

    #[test]
    fn test_forward_only_transitions() {
        let mut job = job();
        assert!(!job.transition(JobStatus::Completed));
        assert!(job.transition(JobStatus::Running));
        assert!(job.started_at.is_some());
        assert!(job.transition(JobStatus::Cancelled));
        assert!(job.completed_at.is_some());
        assert!(!job.transition(JobStatus::Running));
        assert!(!job.transition(JobStatus::Pending));
        assert_eq!(job.status, JobStatus::Cancelled);
    }

    #[test]
    fn test_interrupted_only_from_running() {
        let mut job = job();
        assert!(!job.transition(JobStatus::Interrupted));
        job.transition(JobStatus::Running);
        assert!(job.transition(JobStatus::Interrupted));
        assert!(!job.transition(JobStatus::Completed));
    }

    #[test]
    fn test_resume_clears_history() {
        let mut job = job();
        assert!(!job.reset_for_resume());

        job.transition(JobStatus::Running);
        job.error = Some("boom".to_string());
        job.transition(JobStatus::Error);
        assert!(job.reset_for_resume());
        assert_eq!(job.status, JobStatus::Pending);
        assert!(job.error.is_none());
        assert!(job.started_at.is_none());
    }

    #[test]
    fn test_status_serializes_lowercase() {
        let json = serde_json::to_string(&JobStatus::Interrupted).unwrap();
        assert_eq!(json, "\"interrupted\"");
    }

    #[test]
    fn test_remote_job_deserializes_with_defaults() {
        let json = r#"{
            "id": "x-n2", "name": "sweep", "target_key": "acct",
            "range": {"start": 5000, "end": 9999},
            "original_range": {"start": 0, "end": 9999},
            "status": "pending", "node_id": 2, "total_nodes": 2,
            "created_at": "2024-01-01T00:00:00Z"
        }"#;
        let job: RemoteJob = serde_json::from_str(json).unwrap();
        assert_eq!(job.range.start, 5000);
        assert_eq!(job.settings, JobSettings::default());
        assert!(job.found_unit.is_none());
    }

    #[test]
    fn test_status_counts() {
        let mut running = job();
        running.transition(JobStatus::Running);
        let counts = StatusCounts::tally([&job(), &job(), &running]);
        assert_eq!(counts.pending, 2);
        assert_eq!(counts.running, 1);
        assert_eq!(counts.completed, 0);
    }
}
