//! Durable queue state: one JSON array of jobs per node.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::error::QueueError;

use super::job::{JobStatus, RemoteJob};

pub const QUEUE_STATE_FILE: &str = "queue_state.json";

#[derive(Debug, Clone)]
pub struct QueueStore {
    path: PathBuf,
}

impl QueueStore {
    pub fn new(data_dir: impl AsRef<Path>) -> Self {
        Self {
            path: data_dir.as_ref().join(QUEUE_STATE_FILE),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Loads the saved jobs. Jobs that were running when the process died
    /// come back as `interrupted`.
    ///
    /// A missing file is an empty queue.
    pub fn load(&self) -> Result<Vec<RemoteJob>, QueueError> {
        let data = match fs::read(&self.path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut jobs: Vec<RemoteJob> = serde_json::from_slice(&data)?;
        for job in jobs.iter_mut().filter(|j| j.status == JobStatus::Running) {
            job.transition(JobStatus::Interrupted);
            warn!(job_id = %job.id, target_key = %job.target_key, "Job was running at shutdown, marked interrupted");
        }

        info!(path = %self.path.display(), jobs = jobs.len(), "Loaded queue state");
        Ok(jobs)
    }

    /// Rewrites the whole file via a temp file and rename.
    ///
    /// Callers hold the queue lock so snapshots reach disk in order. This
    /// runs once per job transition, never per unit.
    pub fn save(&self, jobs: &[RemoteJob]) -> Result<(), QueueError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }

        let tmp = self.path.with_extension("json.tmp");
        let data = serde_json::to_vec_pretty(jobs)?;
        {
            let mut file = fs::File::create(&tmp)?;
            file.write_all(&data)?;
            file.sync_all()?;
        }
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}
