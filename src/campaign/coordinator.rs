//! Runs one campaign: partitions a shard across workers and aggregates them.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::Serialize;
use tracing::{error, info, warn};

use crate::config::{AssignmentMode, SweepConfig};
use crate::error::ResourceError;
use crate::notify::{Notifier, Priority};
use crate::probe::{ProbeExecutor, ProbeTarget};
use crate::progress::{ProgressStats, ProgressStore};
use crate::queue::{JobOutcome, JobRunner, RemoteJob};
use crate::resources::ResourcePool;

use super::partition::{chunk_units, UnitRange};
use super::signal::{StopSignal, SuccessReporter};
use super::worker::{StopReason, Worker, WorkerContext, WorkerReport};

/// Everything needed to run one campaign on this node.
#[derive(Debug, Clone)]
pub struct CampaignSpec {
    pub job_id: String,
    pub target_key: String,
    pub range: UnitRange,
    pub concurrency: usize,
    pub shuffle: bool,
    pub max_indeterminate: u32,
    pub created_at: DateTime<Utc>,
}

impl CampaignSpec {
    /// A spec using the node's defaults for concurrency and probing policy.
    pub fn new(
        job_id: impl Into<String>,
        target_key: impl Into<String>,
        range: UnitRange,
        config: &SweepConfig,
    ) -> Self {
        Self {
            job_id: job_id.into(),
            target_key: target_key.into(),
            range,
            concurrency: config.concurrency,
            shuffle: config.shuffle,
            max_indeterminate: config.max_indeterminate,
            created_at: Utc::now(),
        }
    }

    /// A spec for a queued job, applying its per-job overrides.
    pub fn from_job(job: &RemoteJob, config: &SweepConfig) -> Self {
        let settings = &job.settings;
        Self {
            job_id: job.id.clone(),
            target_key: job.target_key.clone(),
            range: job.range,
            concurrency: settings.concurrency.unwrap_or(config.concurrency).max(1),
            shuffle: settings.shuffle.unwrap_or(config.shuffle),
            max_indeterminate: settings
                .max_indeterminate
                .unwrap_or(config.max_indeterminate),
            created_at: job.created_at,
        }
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CampaignOutcome {
    Found,
    CompletedNoResult,
    /// Every worker tripped its circuit breaker.
    StoppedByCircuitBreaker,
    Cancelled,
}

impl CampaignOutcome {
    pub fn priority(&self) -> Priority {
        match self {
            CampaignOutcome::Found => Priority::High,
            CampaignOutcome::CompletedNoResult => Priority::Normal,
            CampaignOutcome::StoppedByCircuitBreaker | CampaignOutcome::Cancelled => Priority::Low,
        }
    }
}

impl fmt::Display for CampaignOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CampaignOutcome::Found => "found",
            CampaignOutcome::CompletedNoResult => "completed without result",
            CampaignOutcome::StoppedByCircuitBreaker => "stopped by circuit breaker",
            CampaignOutcome::Cancelled => "cancelled",
        })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CampaignReport {
    pub job_id: String,
    pub target_key: String,
    pub outcome: CampaignOutcome,
    pub found_unit: Option<String>,
    pub workers: Vec<WorkerReport>,
    pub stats: ProgressStats,
    #[serde(serialize_with = "serialize_millis")]
    pub elapsed: Duration,
}

impl CampaignReport {
    /// Units left untouched because their worker could not lease a resource.
    pub fn unprobed_for_lack_of_resources(&self) -> usize {
        self.workers
            .iter()
            .filter(|w| w.stop_reason == StopReason::NoResource)
            .map(|w| w.assigned.saturating_sub(w.processed + w.skipped))
            .sum()
    }

    fn summary(&self) -> String {
        let mut body = format!(
            "Target {}: {}. Attempted {}, blocklisted {}, valid {}.",
            self.target_key,
            self.outcome,
            self.stats.attempted,
            self.stats.blocklisted,
            self.stats.valid
        );
        if let Some(unit) = &self.found_unit {
            body.push_str(&format!(" Found unit {}.", unit));
        }
        body.push_str(&format!(" Elapsed {:.1}s.", self.elapsed.as_secs_f64()));
        body
    }
}

fn serialize_millis<S: serde::Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_u64(d.as_millis() as u64)
}

/// Splits a node's shard across workers and reports the aggregate outcome.
pub struct CampaignCoordinator {
    config: Arc<SweepConfig>,
    store: Arc<ProgressStore>,
    pool: Arc<ResourcePool>,
    executor: ProbeExecutor,
    notifier: Arc<dyn Notifier>,
}

impl CampaignCoordinator {
    pub fn new(
        config: Arc<SweepConfig>,
        store: Arc<ProgressStore>,
        pool: Arc<ResourcePool>,
        target: Arc<dyn ProbeTarget>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let executor = ProbeExecutor::from_config(target, &config);
        Self {
            config,
            store,
            pool,
            executor,
            notifier,
        }
    }

    pub fn store(&self) -> &Arc<ProgressStore> {
        &self.store
    }

    pub fn pool(&self) -> &Arc<ResourcePool> {
        &self.pool
    }

    /// Unattempted units of `range`, chunked into at most `worker_count` batches.
    pub fn distribute(&self, target_key: &str, range: UnitRange, worker_count: usize) -> Vec<Vec<u64>> {
        let unsent = self.store.filter_unattempted(target_key, range.iter());
        chunk_units(unsent, worker_count)
    }

    /// Runs one campaign to completion.
    ///
    /// # Errors
    ///
    /// `ResourceError::PoolEmpty` in round-robin mode when no resources are
    /// left. The process should shut down.
    pub async fn run(
        &self,
        spec: &CampaignSpec,
        cancel: &StopSignal,
    ) -> Result<CampaignReport, ResourceError> {
        let started = Instant::now();
        let signal = cancel.for_campaign();
        info!(
            job_id = %spec.job_id,
            target_key = %spec.target_key,
            range = %spec.range,
            concurrency = spec.concurrency,
            "Campaign starting"
        );

        if signal.is_cancelled() {
            return Ok(self
                .finish(spec, CampaignOutcome::Cancelled, None, Vec::new(), started)
                .await);
        }

        if let Some(valid) = self.store.valid_unblocked(&spec.target_key).into_iter().next() {
            info!(target_key = %spec.target_key, unit = %valid.unit, "Target already solved");
            return Ok(self
                .finish(spec, CampaignOutcome::Found, Some(valid.unit), Vec::new(), started)
                .await);
        }

        if self.pool.mode() == AssignmentMode::RoundRobin && self.pool.is_empty() {
            error!(job_id = %spec.job_id, "Resource pool is empty");
            return Err(ResourceError::PoolEmpty);
        }

        let batches = self.distribute(&spec.target_key, spec.range, spec.concurrency);
        if batches.is_empty() {
            info!(target_key = %spec.target_key, "Every unit already attempted");
            return Ok(self
                .finish(spec, CampaignOutcome::CompletedNoResult, None, Vec::new(), started)
                .await);
        }

        let reporter = SuccessReporter::new(signal.clone());
        let ctx = WorkerContext {
            target_key: spec.target_key.clone(),
            store: Arc::clone(&self.store),
            pool: Arc::clone(&self.pool),
            executor: self.executor.clone(),
            signal: signal.clone(),
            reporter: reporter.clone(),
            max_indeterminate: spec.max_indeterminate,
            channel_ttl: self.config.channel_ttl,
            unit_delay: self.config.unit_delay,
            shuffle: spec.shuffle,
            shuffle_seed: self.config.shuffle_seed,
        };

        let handles: Vec<_> = batches
            .into_iter()
            .enumerate()
            .map(|(idx, batch)| tokio::spawn(Worker::new(idx + 1, batch, ctx.clone()).run()))
            .collect();

        let mut reports = Vec::with_capacity(handles.len());
        for result in join_all(handles).await {
            match result {
                Ok(report) => reports.push(report),
                Err(e) => error!(job_id = %spec.job_id, error = %e, "Worker task failed"),
            }
        }

        for report in reports.iter().filter(|r| r.tripped) {
            self.notifier
                .send(
                    &format!("Worker {} stopped", report.worker_id),
                    &format!(
                        "Target {}: worker {} hit {} consecutive indeterminate results after {} units.",
                        spec.target_key,
                        report.worker_id,
                        spec.max_indeterminate,
                        report.processed
                    ),
                    Priority::Low,
                )
                .await;
        }

        if self.pool.mode() == AssignmentMode::RoundRobin
            && self.pool.is_empty()
            && reports.iter().any(|r| r.stop_reason == StopReason::NoResource)
        {
            error!(job_id = %spec.job_id, "Resource pool drained during campaign");
            return Err(ResourceError::PoolEmpty);
        }

        let (outcome, found_unit) = match reporter.winner() {
            Some((_, unit)) => (CampaignOutcome::Found, Some(unit)),
            None if signal.is_cancelled() => (CampaignOutcome::Cancelled, None),
            None if !reports.is_empty() && reports.iter().all(|r| r.tripped) => {
                (CampaignOutcome::StoppedByCircuitBreaker, None)
            }
            None => (CampaignOutcome::CompletedNoResult, None),
        };

        Ok(self.finish(spec, outcome, found_unit, reports, started).await)
    }

    async fn finish(
        &self,
        spec: &CampaignSpec,
        outcome: CampaignOutcome,
        found_unit: Option<String>,
        workers: Vec<WorkerReport>,
        started: Instant,
    ) -> CampaignReport {
        let report = CampaignReport {
            job_id: spec.job_id.clone(),
            target_key: spec.target_key.clone(),
            outcome,
            found_unit,
            workers,
            stats: self.store.stats(&spec.target_key),
            elapsed: started.elapsed(),
        };

        let unprobed = report.unprobed_for_lack_of_resources();
        if unprobed > 0 {
            warn!(job_id = %spec.job_id, unprobed, "Units skipped for lack of resources");
        }

        info!(
            job_id = %spec.job_id,
            target_key = %spec.target_key,
            outcome = %outcome,
            found_unit = ?report.found_unit,
            elapsed_ms = report.elapsed.as_millis() as u64,
            "Campaign finished"
        );

        let title = format!("Campaign {}: {}", spec.target_key, outcome);
        self.notifier
            .send(&title, &report.summary(), outcome.priority())
            .await;
        report
    }

    /// Runs several campaigns in order, stopping early only on cancellation.
    pub async fn run_many(
        &self,
        specs: &[CampaignSpec],
        cancel: &StopSignal,
    ) -> Result<Vec<CampaignReport>, ResourceError> {
        let mut reports = Vec::with_capacity(specs.len());
        for (idx, spec) in specs.iter().enumerate() {
            if cancel.is_cancelled() {
                info!(remaining = specs.len() - idx, "Multi-target run cancelled");
                break;
            }
            reports.push(self.run(spec, cancel).await?);
        }
        Ok(reports)
    }
}

#[async_trait]
impl JobRunner for CampaignCoordinator {
    async fn run_job(&self, job: RemoteJob, cancel: StopSignal) -> JobOutcome {
        let spec = CampaignSpec::from_job(&job, &self.config);
        match self.run(&spec, &cancel).await {
            Ok(report) => match report.outcome {
                CampaignOutcome::Found => JobOutcome::found(report.found_unit.unwrap_or_default()),
                CampaignOutcome::Cancelled => JobOutcome::cancelled(),
                CampaignOutcome::StoppedByCircuitBreaker => {
                    JobOutcome::failed("every worker stopped by circuit breaker")
                }
                CampaignOutcome::CompletedNoResult => {
                    match report.unprobed_for_lack_of_resources() {
                        0 => JobOutcome::completed(),
                        n => JobOutcome::failed(format!("{} units left unprobed: no free resource", n)),
                    }
                }
            },
            Err(e) => JobOutcome::fatal(e.to_string()),
        }
    }
}
