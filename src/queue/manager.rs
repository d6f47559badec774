//! Per-node job queue and cross-node coordination.
//!
//! Jobs run one at a time in FIFO order. When a job finds its unit, every
//! peer is told to stop its shard for the same target. State is rewritten
//! to disk after every mutation.

use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use futures::future::join_all;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::campaign::{split_range_across_nodes, StopSignal, UnitRange};
use crate::config::SweepConfig;
use crate::error::QueueError;
use crate::metrics::MetricsCollector;

use super::job::{
    CreateJobRequest, JobStatus, JobUpdate, QueueStatus, RemoteJob, StatusCounts, StopJobRequest,
};
use super::peer::PeerClient;
use super::store::QueueStore;

/// What a job run produced.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobOutcome {
    pub found_unit: Option<String>,
    pub error: Option<String>,
    /// The run hit a condition that should shut the node down.
    pub fatal: bool,
}

impl JobOutcome {
    pub fn completed() -> Self {
        Self::default()
    }

    pub fn found(unit: impl Into<String>) -> Self {
        Self {
            found_unit: Some(unit.into()),
            ..Self::default()
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Self::default()
        }
    }

    pub fn cancelled() -> Self {
        Self::failed("cancelled")
    }

    pub fn fatal(error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            fatal: true,
            ..Self::default()
        }
    }
}

/// Executes one job. Implemented by the campaign coordinator.
#[async_trait]
pub trait JobRunner: Send + Sync {
    async fn run_job(&self, job: RemoteJob, cancel: StopSignal) -> JobOutcome;
}

#[derive(Debug)]
struct CurrentJob {
    id: String,
    cancel: StopSignal,
}

#[derive(Debug, Default)]
struct QueueState {
    jobs: Vec<RemoteJob>,
    current: Option<CurrentJob>,
}

impl QueueState {
    fn find(&self, id: &str) -> Result<&RemoteJob, QueueError> {
        self.jobs
            .iter()
            .find(|j| j.id == id)
            .ok_or_else(|| QueueError::JobNotFound(id.to_string()))
    }

    fn find_mut(&mut self, id: &str) -> Result<&mut RemoteJob, QueueError> {
        self.jobs
            .iter_mut()
            .find(|j| j.id == id)
            .ok_or_else(|| QueueError::JobNotFound(id.to_string()))
    }

    fn pending_count(&self) -> usize {
        self.jobs
            .iter()
            .filter(|j| j.status == JobStatus::Pending)
            .count()
    }
}

fn ensure_pending(job: &RemoteJob) -> Result<(), QueueError> {
    if job.status != JobStatus::Pending {
        return Err(QueueError::JobNotPending {
            id: job.id.clone(),
            status: job.status.to_string(),
        });
    }
    Ok(())
}

pub struct QueueManager {
    config: Arc<SweepConfig>,
    state: Mutex<QueueState>,
    store: QueueStore,
    peers: PeerClient,
    runner: Arc<dyn JobRunner>,
    shutdown: watch::Sender<bool>,
    metrics: MetricsCollector,
}

impl QueueManager {
    /// Loads the saved queue from `config.data_dir`.
    ///
    /// Jobs that were running when the node went down are kept as
    /// `interrupted` and are not restarted.
    pub fn open(
        config: Arc<SweepConfig>,
        runner: Arc<dyn JobRunner>,
        peers: PeerClient,
    ) -> Result<Arc<Self>, QueueError> {
        let store = QueueStore::new(&config.data_dir);
        let jobs = store.load()?;
        let (shutdown, _) = watch::channel(false);

        let manager = Arc::new(Self {
            config,
            state: Mutex::new(QueueState {
                jobs,
                current: None,
            }),
            store,
            peers,
            runner,
            shutdown,
            metrics: MetricsCollector::new(),
        });

        let state = manager.lock();
        manager.persist(&state);
        drop(state);
        Ok(manager)
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().expect("queue state lock poisoned")
    }

    /// Writes the job list and refreshes the queue-depth gauge. Failures are
    /// logged; the in-memory queue stays authoritative.
    fn persist(&self, state: &QueueState) {
        self.metrics.set_queue_depth(state.pending_count());
        if let Err(e) = self.store.save(&state.jobs) {
            self.metrics.record_persist_failure();
            error!(path = %self.store.path().display(), error = %e, "Failed to persist queue state");
        }
    }

    /// Rejects inverted ranges and ranges longer than `max_range_len`.
    fn check_range(&self, range: &UnitRange) -> Result<(), QueueError> {
        range.validate()?;
        let max = self.config.max_range_len;
        if range.len() > max {
            return Err(QueueError::RangeTooLarge {
                len: range.len(),
                max,
            });
        }
        Ok(())
    }

    pub fn config(&self) -> &SweepConfig {
        &self.config
    }

    pub fn peers(&self) -> &PeerClient {
        &self.peers
    }

    /// Resolves to true once a job reported a fatal condition.
    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown.subscribe()
    }

    /// Splits the request's range across every node.
    ///
    /// The local shard is queued here; the others are posted to their nodes
    /// concurrently. Unreachable peers are logged and skipped.
    pub async fn create_job_for_all_nodes(
        self: &Arc<Self>,
        request: CreateJobRequest,
    ) -> Result<Vec<RemoteJob>, QueueError> {
        request.range.validate()?;
        let shards = split_range_across_nodes(request.range, self.config.total_nodes);
        for (_, range) in &shards {
            self.check_range(range)?;
        }

        let group = Uuid::new_v4().simple().to_string();
        let total_nodes = self.config.total_nodes;
        let jobs: Vec<RemoteJob> = shards
            .into_iter()
            .map(|(node_id, range)| {
                let mut job = RemoteJob::new(
                    format!("{}-n{}", group, node_id),
                    request.name.clone(),
                    request.target_key.clone(),
                    range,
                    request.range,
                    node_id,
                    total_nodes,
                )
                .with_settings(request.settings.clone());
                job.node_address = self.config.node_address(node_id).map(str::to_string);
                job
            })
            .collect();

        info!(
            name = %request.name,
            target_key = %request.target_key,
            range = %request.range,
            shards = jobs.len(),
            "Creating job on all nodes"
        );

        let mut deliveries = Vec::new();
        for job in &jobs {
            if job.node_id == self.config.node_id {
                self.add_job(job.clone())?;
                continue;
            }
            let Some(address) = job.node_address.clone() else {
                warn!(job_id = %job.id, node_id = job.node_id, "No address for node, shard not delivered");
                continue;
            };
            deliveries.push(async move {
                let result = self.peers.add_job(&address, job).await;
                (job, address, result)
            });
        }

        for (job, address, result) in join_all(deliveries).await {
            match result {
                Ok(()) => info!(job_id = %job.id, node_id = job.node_id, "Shard delivered"),
                Err(e) => warn!(
                    job_id = %job.id,
                    node_id = job.node_id,
                    address = %address,
                    error = %e,
                    "Failed to deliver shard"
                ),
            }
        }

        Ok(jobs)
    }

    /// Queues a job (the receiving side of `/add-job`) and starts it if idle.
    ///
    /// Re-delivery of a known id is ignored.
    pub fn add_job(self: &Arc<Self>, mut job: RemoteJob) -> Result<(), QueueError> {
        self.check_range(&job.range)?;
        job.original_range.validate()?;
        {
            let mut state = self.lock();
            if state.jobs.iter().any(|j| j.id == job.id) {
                warn!(job_id = %job.id, "Job already queued, ignoring");
                return Ok(());
            }
            job.status = JobStatus::Pending;
            info!(job_id = %job.id, target_key = %job.target_key, range = %job.range, "Job queued");
            state.jobs.push(job);
            self.persist(&state);
        }
        self.metrics.record_job_status(JobStatus::Pending.as_str());
        self.start_next_job();
        Ok(())
    }

    /// Starts the oldest pending job if nothing is running.
    /// Returns the id of the job started.
    pub fn start_next_job(self: &Arc<Self>) -> Option<String> {
        let (job, cancel) = {
            let mut state = self.lock();
            if state.current.is_some() {
                return None;
            }
            let job = state
                .jobs
                .iter_mut()
                .find(|j| j.status == JobStatus::Pending)?;
            job.transition(JobStatus::Running);
            let job = job.clone();

            let cancel = StopSignal::new();
            state.current = Some(CurrentJob {
                id: job.id.clone(),
                cancel: cancel.clone(),
            });
            self.persist(&state);
            (job, cancel)
        };

        self.metrics.record_job_status(JobStatus::Running.as_str());
        info!(job_id = %job.id, target_key = %job.target_key, range = %job.range, "Job started");

        let id = job.id.clone();
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            let job_id = job.id.clone();
            let outcome = manager.runner.run_job(job, cancel).await;
            if outcome.fatal {
                manager.fail_fatally(&job_id, outcome.error);
                return;
            }
            manager
                .complete_job(&job_id, outcome.found_unit, outcome.error)
                .await;
        });
        Some(id)
    }

    /// Records a job's end and moves the queue along.
    ///
    /// A found unit completes the job and tells every peer to stop. A job
    /// already cancelled by a peer keeps its status. The next pending job
    /// starts after `next_job_delay`.
    pub async fn complete_job(
        self: &Arc<Self>,
        job_id: &str,
        found_unit: Option<String>,
        error: Option<String>,
    ) {
        let stop_target = {
            let mut state = self.lock();
            if state.current.as_ref().is_some_and(|c| c.id == job_id) {
                state.current = None;
            }

            let job = match state.find_mut(job_id) {
                Ok(job) => job,
                Err(e) => {
                    warn!(error = %e, "Completion for unknown job");
                    return;
                }
            };

            let mut stop_target = None;
            if job.status == JobStatus::Running {
                let next = match (&found_unit, &error) {
                    (Some(unit), _) => {
                        job.found_unit = Some(unit.clone());
                        stop_target = Some((job.target_key.clone(), unit.clone()));
                        JobStatus::Completed
                    }
                    (None, Some(message)) => {
                        job.error = Some(message.clone());
                        JobStatus::Error
                    }
                    (None, None) => JobStatus::Completed,
                };
                job.transition(next);
                self.metrics.record_job_status(next.as_str());
                info!(job_id, status = %next, found_unit = ?found_unit, error = ?error, "Job finished");
            } else {
                debug!(job_id, status = %job.status, "Job already settled");
            }

            self.persist(&state);
            stop_target
        };

        if let Some((target_key, unit)) = stop_target {
            self.notify_peers_to_stop(&target_key, &unit).await;
        }
        self.schedule_next();
    }

    fn fail_fatally(&self, job_id: &str, error: Option<String>) {
        let mut state = self.lock();
        state.current = None;
        if let Ok(job) = state.find_mut(job_id) {
            job.error = error.clone();
            if job.transition(JobStatus::Error) {
                self.metrics.record_job_status(JobStatus::Error.as_str());
            }
        }
        self.persist(&state);
        drop(state);

        error!(job_id, error = ?error, "Fatal job error, requesting shutdown");
        self.shutdown.send_replace(true);
    }

    fn schedule_next(self: &Arc<Self>) {
        let manager = Arc::clone(self);
        let delay = self.config.next_job_delay;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if *manager.shutdown.borrow() {
                return;
            }
            manager.start_next_job();
        });
    }

    /// Tells every other node to stop its job for `target_key`.
    /// Returns how many peers confirmed they stopped something.
    pub async fn notify_peers_to_stop(&self, target_key: &str, found_unit: &str) -> usize {
        let body = StopJobRequest {
            target_key: target_key.to_string(),
            found_unit: found_unit.to_string(),
        };

        let requests = self.config.peers().map(|(node_id, address)| {
            let body = &body;
            async move { (node_id, address, self.peers.stop_job(address, body).await) }
        });

        let mut stopped = 0;
        for (node_id, address, result) in join_all(requests).await {
            match result {
                Ok(true) => {
                    stopped += 1;
                    info!(node_id, address, target_key, "Peer stopped its job");
                }
                Ok(false) => debug!(node_id, address, target_key, "Peer had nothing to stop"),
                Err(e) => warn!(node_id, address, error = %e, "Failed to notify peer"),
            }
        }
        stopped
    }

    /// Cancels local work for `target_key` after a peer found `found_unit`.
    ///
    /// The running job is marked `cancelled` and its workers are told to
    /// stop; pending jobs for the same target are cancelled too. The queue
    /// moves on once the running job's workers have wound down.
    pub fn stop_local_job(&self, target_key: &str, found_unit: &str) -> bool {
        let mut state = self.lock();
        let running = state.current.as_ref().map(|c| c.id.clone());
        let reason = format!("cancelled: unit {} found by another node", found_unit);

        let mut stopped = false;
        for job in state.jobs.iter_mut().filter(|j| j.target_key == target_key) {
            let is_running = running.as_deref() == Some(job.id.as_str());
            if !(is_running || job.status == JobStatus::Pending) {
                continue;
            }
            if job.transition(JobStatus::Cancelled) {
                job.error = Some(reason.clone());
                self.metrics.record_job_status(JobStatus::Cancelled.as_str());
                info!(job_id = %job.id, target_key, found_unit, "Job cancelled by peer");
                stopped = true;
            }
        }

        if stopped {
            if let Some(current) = &state.current {
                if state
                    .jobs
                    .iter()
                    .any(|j| j.id == current.id && j.status == JobStatus::Cancelled)
                {
                    current.cancel.cancel();
                }
            }
            self.persist(&state);
        }
        stopped
    }

    pub fn delete_job(&self, id: &str) -> Result<RemoteJob, QueueError> {
        let mut state = self.lock();
        ensure_pending(state.find(id)?)?;
        let pos = state
            .jobs
            .iter()
            .position(|j| j.id == id)
            .ok_or_else(|| QueueError::JobNotFound(id.to_string()))?;
        let removed = state.jobs.remove(pos);
        self.persist(&state);
        info!(job_id = id, "Job deleted");
        Ok(removed)
    }

    pub fn update_job(&self, id: &str, update: JobUpdate) -> Result<RemoteJob, QueueError> {
        if let Some(range) = &update.range {
            self.check_range(range)?;
        }

        let mut state = self.lock();
        let job = state.find_mut(id)?;
        ensure_pending(job)?;

        if let Some(name) = update.name {
            job.name = name;
        }
        if let Some(target_key) = update.target_key {
            job.target_key = target_key;
        }
        if let Some(range) = update.range {
            job.range = range;
        }
        if let Some(settings) = update.settings {
            job.settings = settings;
        }
        let updated = job.clone();
        self.persist(&state);
        info!(job_id = id, "Job updated");
        Ok(updated)
    }

    /// Queues a fresh copy of an interrupted or finished job.
    ///
    /// The original record is kept for inspection.
    pub fn resume_job(self: &Arc<Self>, id: &str) -> Result<RemoteJob, QueueError> {
        let resumed = {
            let mut state = self.lock();
            let original = state.find(id)?;
            let mut copy = original.clone();
            if !copy.reset_for_resume() {
                return Err(QueueError::NotResumable {
                    id: id.to_string(),
                    status: original.status.to_string(),
                });
            }
            copy.id = format!("{}-r{}", id, &Uuid::new_v4().simple().to_string()[..8]);
            copy.created_at = chrono::Utc::now();

            state.jobs.push(copy.clone());
            self.persist(&state);
            copy
        };

        info!(job_id = id, resumed_as = %resumed.id, "Job resumed");
        self.metrics.record_job_status(JobStatus::Pending.as_str());
        self.start_next_job();
        Ok(resumed)
    }

    pub fn status(&self) -> QueueStatus {
        let state = self.lock();
        QueueStatus {
            node_id: self.config.node_id,
            total_nodes: self.config.total_nodes,
            node_addresses: self.config.node_addresses.clone(),
            counts: StatusCounts::tally(&state.jobs),
            current_job: state.current.as_ref().map(|c| c.id.clone()),
            jobs: state.jobs.clone(),
        }
    }

    pub fn jobs(&self) -> Vec<RemoteJob> {
        self.lock().jobs.clone()
    }

    pub fn job(&self, id: &str) -> Option<RemoteJob> {
        self.lock().find(id).ok().cloned()
    }

    pub fn current_job_id(&self) -> Option<String> {
        self.lock().current.as_ref().map(|c| c.id.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::campaign::UnitRange;
    use std::time::Duration;
    use tempfile::TempDir;
    use tokio::sync::Notify;

    /// Blocks until cancelled or released, then returns the scripted outcome.
    struct FakeRunner {
        outcome: Mutex<JobOutcome>,
        release: Notify,
        started: Mutex<Vec<String>>,
    }

    impl FakeRunner {
        fn new(outcome: JobOutcome) -> Arc<Self> {
            Arc::new(Self {
                outcome: Mutex::new(outcome),
                release: Notify::new(),
                started: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl JobRunner for FakeRunner {
        async fn run_job(&self, job: RemoteJob, cancel: StopSignal) -> JobOutcome {
            self.started.lock().unwrap().push(job.id.clone());
            loop {
                if cancel.is_cancelled() {
                    return JobOutcome::cancelled();
                }
                tokio::select! {
                    _ = self.release.notified() => break,
                    _ = tokio::time::sleep(Duration::from_millis(5)) => {}
                }
            }
            self.outcome.lock().unwrap().clone()
        }
    }

    fn config(dir: &TempDir) -> Arc<SweepConfig> {
        Arc::new(
            SweepConfig::new()
                .with_data_dir(dir.path())
                .with_next_job_delay(Duration::from_millis(10))
                .with_peer_timeouts(Duration::from_millis(200), Duration::from_millis(200)),
        )
    }

    fn manager(dir: &TempDir, runner: Arc<FakeRunner>) -> Arc<QueueManager> {
        let config = config(dir);
        let peers = PeerClient::from_config(&config).expect("client");
        QueueManager::open(config, runner, peers).expect("open")
    }

    fn job(id: &str, target: &str) -> RemoteJob {
        let range = UnitRange::new(0, 9).unwrap();
        RemoteJob::new(id, "sweep", target, range, range, 1, 1)
    }

    async fn wait_for<F: Fn() -> bool>(check: F) {
        for _ in 0..200 {
            if check() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not reached");
    }

    #[tokio::test]
    async fn test_fifo_one_at_a_time() {
        let dir = TempDir::new().expect("tempdir");
        let runner = FakeRunner::new(JobOutcome::completed());
        let manager = manager(&dir, runner.clone());

        manager.add_job(job("a", "x")).unwrap();
        manager.add_job(job("b", "y")).unwrap();

        assert_eq!(manager.current_job_id().as_deref(), Some("a"));
        assert_eq!(manager.job("b").unwrap().status, JobStatus::Pending);

        runner.release.notify_one();
        wait_for(|| manager.current_job_id().as_deref() == Some("b")).await;
        assert_eq!(manager.job("a").unwrap().status, JobStatus::Completed);

        runner.release.notify_one();
        wait_for(|| manager.job("b").unwrap().status == JobStatus::Completed).await;
        assert_eq!(*runner.started.lock().unwrap(), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_stop_local_job_cancels_running_match() {
        let dir = TempDir::new().expect("tempdir");
        let runner = FakeRunner::new(JobOutcome::completed());
        let manager = manager(&dir, runner.clone());

        manager.add_job(job("a", "x")).unwrap();
        assert!(!manager.stop_local_job("other", "0001"));
        assert!(manager.stop_local_job("x", "2500"));

        let cancelled = manager.job("a").unwrap();
        assert_eq!(cancelled.status, JobStatus::Cancelled);
        assert!(cancelled.error.as_deref().unwrap().contains("2500"));

        wait_for(|| manager.current_job_id().is_none()).await;
        assert_eq!(manager.job("a").unwrap().status, JobStatus::Cancelled);

        let saved = QueueStore::new(dir.path()).load().unwrap();
        assert_eq!(saved[0].status, JobStatus::Cancelled);
    }

    #[tokio::test]
    async fn test_error_outcome_marks_error() {
        let dir = TempDir::new().expect("tempdir");
        let runner = FakeRunner::new(JobOutcome::failed("every worker stopped by circuit breaker"));
        let manager = manager(&dir, runner.clone());

        manager.add_job(job("a", "x")).unwrap();
        runner.release.notify_one();
        wait_for(|| manager.job("a").unwrap().status == JobStatus::Error).await;
    }

    #[tokio::test]
    async fn test_found_outcome_completes_with_unit() {
        let dir = TempDir::new().expect("tempdir");
        let runner = FakeRunner::new(JobOutcome::found("0042"));
        let manager = manager(&dir, runner.clone());

        manager.add_job(job("a", "x")).unwrap();
        runner.release.notify_one();
        wait_for(|| manager.job("a").unwrap().status == JobStatus::Completed).await;
        assert_eq!(manager.job("a").unwrap().found_unit.as_deref(), Some("0042"));
    }

    #[tokio::test]
    async fn test_fatal_outcome_requests_shutdown() {
        let dir = TempDir::new().expect("tempdir");
        let runner = FakeRunner::new(JobOutcome::fatal("Resource pool is empty"));
        let manager = manager(&dir, runner.clone());
        let mut shutdown = manager.shutdown_signal();

        manager.add_job(job("a", "x")).unwrap();
        manager.add_job(job("b", "x")).unwrap();
        runner.release.notify_one();

        tokio::time::timeout(Duration::from_secs(2), shutdown.changed())
            .await
            .expect("shutdown requested")
            .expect("sender alive");
        assert_eq!(manager.job("a").unwrap().status, JobStatus::Error);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(manager.job("b").unwrap().status, JobStatus::Pending);
    }

    #[tokio::test]
    async fn test_delete_and_update_pending_only() {
        let dir = TempDir::new().expect("tempdir");
        let runner = FakeRunner::new(JobOutcome::completed());
        let manager = manager(&dir, runner.clone());

        manager.add_job(job("a", "x")).unwrap();
        manager.add_job(job("b", "y")).unwrap();

        assert!(matches!(
            manager.delete_job("a"),
            Err(QueueError::JobNotPending { .. })
        ));
        assert!(matches!(
            manager.delete_job("zzz"),
            Err(QueueError::JobNotFound(_))
        ));

        let updated = manager
            .update_job(
                "b",
                JobUpdate {
                    name: Some("renamed".to_string()),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(updated.name, "renamed");

        let bad_range = JobUpdate {
            range: Some(UnitRange { start: 9, end: 1 }),
            ..Default::default()
        };
        assert!(matches!(
            manager.update_job("b", bad_range),
            Err(QueueError::InvalidRange { .. })
        ));

        assert_eq!(manager.delete_job("b").unwrap().id, "b");
        assert!(manager.job("b").is_none());
    }

    #[tokio::test]
    async fn test_restart_marks_running_interrupted_and_resume_requeues() {
        let dir = TempDir::new().expect("tempdir");
        {
            let runner = FakeRunner::new(JobOutcome::completed());
            let manager = manager(&dir, runner);
            manager.add_job(job("a", "x")).unwrap();
            assert_eq!(manager.job("a").unwrap().status, JobStatus::Running);
        }

        let runner = FakeRunner::new(JobOutcome::completed());
        let manager = manager(&dir, runner.clone());
        assert_eq!(manager.job("a").unwrap().status, JobStatus::Interrupted);
        assert!(manager.current_job_id().is_none());

        let resumed = manager.resume_job("a").unwrap();
        assert_ne!(resumed.id, "a");
        assert_eq!(manager.current_job_id(), Some(resumed.id.clone()));
        assert_eq!(manager.job("a").unwrap().status, JobStatus::Interrupted);

        assert!(matches!(
            manager.resume_job(&resumed.id),
            Err(QueueError::NotResumable { .. })
        ));
    }

    #[tokio::test]
    async fn test_create_job_keeps_local_shard_when_peers_down() {
        let dir = TempDir::new().expect("tempdir");
        let config = Arc::new(
            SweepConfig::new()
                .with_data_dir(dir.path())
                .with_nodes(
                    1,
                    vec!["http://127.0.0.1:9".to_string(), "http://127.0.0.1:9".to_string()],
                )
                .with_peer_timeouts(Duration::from_millis(200), Duration::from_millis(200)),
        );
        let peers = PeerClient::from_config(&config).unwrap();
        let runner = FakeRunner::new(JobOutcome::completed());
        let manager = QueueManager::open(config, runner, peers).unwrap();

        let jobs = manager
            .create_job_for_all_nodes(CreateJobRequest {
                name: "sweep".to_string(),
                target_key: "acct".to_string(),
                range: UnitRange::new(0, 9999).unwrap(),
                settings: Default::default(),
            })
            .await
            .unwrap();

        assert_eq!(jobs.len(), 2);
        assert_eq!(jobs[0].range, UnitRange { start: 0, end: 4999 });
        assert_eq!(jobs[1].range, UnitRange { start: 5000, end: 9999 });
        assert_eq!(manager.jobs().len(), 1);
        assert_eq!(manager.jobs()[0].id, jobs[0].id);
    }

    #[tokio::test]
    async fn test_oversized_ranges_are_rejected() {
        let dir = TempDir::new().expect("tempdir");
        let config = Arc::new(
            SweepConfig::new()
                .with_data_dir(dir.path())
                .with_max_range_len(100),
        );
        let peers = PeerClient::from_config(&config).unwrap();
        let manager = QueueManager::open(config, FakeRunner::new(JobOutcome::completed()), peers)
            .unwrap();

        let huge = UnitRange::new(0, 1_000_000_000_000).unwrap();
        let oversized = RemoteJob::new("big", "sweep", "acct", huge, huge, 1, 1);
        assert!(matches!(
            manager.add_job(oversized),
            Err(QueueError::RangeTooLarge { max: 100, .. })
        ));

        let result = manager
            .create_job_for_all_nodes(CreateJobRequest {
                name: "sweep".to_string(),
                target_key: "acct".to_string(),
                range: huge,
                settings: Default::default(),
            })
            .await;
        assert!(matches!(result, Err(QueueError::RangeTooLarge { .. })));

        manager.add_job(job("ok", "x")).unwrap();
        manager.add_job(job("queued", "y")).unwrap();
        let widen = JobUpdate {
            range: Some(UnitRange::new(0, 100).unwrap()),
            ..Default::default()
        };
        assert!(matches!(
            manager.update_job("queued", widen),
            Err(QueueError::RangeTooLarge { len: 101, max: 100 })
        ));
        assert!(manager.job("big").is_none());
    }

    #[tokio::test]
    async fn test_add_job_rejects_inverted_original_range() {
        let dir = TempDir::new().expect("tempdir");
        let manager = manager(&dir, FakeRunner::new(JobOutcome::completed()));

        let mut shard = job("a", "x");
        shard.original_range = UnitRange { start: 50, end: 3 };
        assert!(matches!(
            manager.add_job(shard),
            Err(QueueError::InvalidRange { start: 50, end: 3 })
        ));
        assert!(manager.jobs().is_empty());
    }

    #[tokio::test]
    async fn test_create_job_rejects_inverted_range() {
        let dir = TempDir::new().expect("tempdir");
        let manager = manager(&dir, FakeRunner::new(JobOutcome::completed()));
        let result = manager
            .create_job_for_all_nodes(CreateJobRequest {
                name: "sweep".to_string(),
                target_key: "acct".to_string(),
                range: UnitRange { start: 10, end: 1 },
                settings: Default::default(),
            })
            .await;
        assert!(matches!(result, Err(QueueError::InvalidRange { .. })));
    }
}
