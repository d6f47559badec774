//! A single worker: one lease, one batch of units.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::Serialize;
use tracing::{debug, error, info, trace, warn};

use crate::config::AssignmentMode;
use crate::error::ResourceError;
use crate::metrics::MetricsCollector;
use crate::probe::{CircuitBreaker, ProbeExecutor, ProbeResult};
use crate::progress::ProgressStore;
use crate::resources::{Channel, ResourcePool};

use super::signal::{StopSignal, SuccessReporter};

/// Where a worker is in its unit cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerPhase {
    Idle,
    Fetching,
    Probing,
    Recording,
    Stopped,
}

/// Why a worker reached `Stopped`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// Every assigned unit has been attempted.
    Exhausted,
    /// This worker found a non-blocklisted success.
    Found,
    /// Another worker in the campaign found one.
    SiblingFound,
    CircuitTripped,
    Cancelled,
    /// No resource could be leased. Fatal for this worker only.
    NoResource,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StopReason::Exhausted => "exhausted",
            StopReason::Found => "found",
            StopReason::SiblingFound => "sibling_found",
            StopReason::CircuitTripped => "circuit_tripped",
            StopReason::Cancelled => "cancelled",
            StopReason::NoResource => "no_resource",
        };
        f.write_str(s)
    }
}

/// Final snapshot of a worker, read by the coordinator.
#[derive(Debug, Clone, Serialize)]
pub struct WorkerReport {
    pub worker_id: usize,
    pub resource_id: Option<String>,
    pub assigned: usize,
    /// Units actually probed.
    pub processed: usize,
    /// Units skipped because they were already attempted.
    pub skipped: usize,
    pub consecutive_indeterminate: u32,
    pub tripped: bool,
    pub stop_reason: StopReason,
    pub found_unit: Option<String>,
}

/// Everything a worker shares with its siblings.
#[derive(Clone)]
pub struct WorkerContext {
    pub target_key: String,
    pub store: Arc<ProgressStore>,
    pub pool: Arc<ResourcePool>,
    pub executor: ProbeExecutor,
    pub signal: StopSignal,
    pub reporter: SuccessReporter,
    pub max_indeterminate: u32,
    pub channel_ttl: Duration,
    pub unit_delay: Duration,
    pub shuffle: bool,
    pub shuffle_seed: Option<u64>,
}

pub struct Worker {
    id: usize,
    units: Vec<u64>,
    ctx: WorkerContext,
    phase: WorkerPhase,
    breaker: CircuitBreaker,
    resource_id: Option<String>,
    processed: usize,
    skipped: usize,
    found_unit: Option<String>,
    metrics: MetricsCollector,
}

impl Worker {
    pub fn new(id: usize, units: Vec<u64>, ctx: WorkerContext) -> Self {
        let breaker = CircuitBreaker::new(ctx.max_indeterminate);
        Self {
            id,
            units,
            ctx,
            phase: WorkerPhase::Idle,
            breaker,
            resource_id: None,
            processed: 0,
            skipped: 0,
            found_unit: None,
            metrics: MetricsCollector::new(),
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn phase(&self) -> WorkerPhase {
        self.phase
    }

    fn set_phase(&mut self, phase: WorkerPhase) {
        trace!(worker_id = self.id, from = ?self.phase, to = ?phase, "Worker phase");
        self.phase = phase;
    }

    /// Runs the worker to completion and releases its lease.
    pub async fn run(mut self) -> WorkerReport {
        self.metrics.worker_started();
        info!(
            worker_id = self.id,
            target_key = %self.ctx.target_key,
            units = self.units.len(),
            "Worker starting"
        );

        let reason = self.process().await;
        self.set_phase(WorkerPhase::Stopped);

        if self.ctx.pool.mode() == AssignmentMode::Dedicated {
            self.ctx.pool.release(self.id);
        }
        self.metrics.worker_stopped();

        info!(
            worker_id = self.id,
            reason = %reason,
            processed = self.processed,
            skipped = self.skipped,
            "Worker stopped"
        );

        WorkerReport {
            worker_id: self.id,
            resource_id: self.resource_id,
            assigned: self.units.len(),
            processed: self.processed,
            skipped: self.skipped,
            consecutive_indeterminate: self.breaker.consecutive_indeterminate(),
            tripped: self.breaker.is_tripped(),
            stop_reason: reason,
            found_unit: self.found_unit,
        }
    }

    fn lease(&mut self) -> Result<String, ResourceError> {
        let resource_id = match self.ctx.pool.mode() {
            AssignmentMode::Dedicated => self
                .ctx
                .pool
                .assign_dedicated(self.id)
                .ok_or(ResourceError::NoFreeResource { worker_id: self.id })?,
            AssignmentMode::RoundRobin => self.ctx.pool.get_available(self.id)?.resource_id,
        };
        self.resource_id = Some(resource_id.clone());
        Ok(resource_id)
    }

    fn ordered_units(&self) -> VecDeque<u64> {
        let mut units = self.units.clone();
        if self.ctx.shuffle {
            let mut rng = match self.ctx.shuffle_seed {
                Some(seed) => ChaCha8Rng::seed_from_u64(seed.wrapping_add(self.id as u64)),
                None => ChaCha8Rng::from_rng(&mut rand::rng()),
            };
            units.shuffle(&mut rng);
        }
        units.into()
    }

    /// Next unit not yet attempted, or `None` when the batch is exhausted.
    fn fetch(&mut self, queue: &mut VecDeque<u64>) -> Option<u64> {
        while let Some(unit) = queue.pop_front() {
            if self.ctx.store.is_attempted(&self.ctx.target_key, unit) {
                self.skipped += 1;
                continue;
            }
            return Some(unit);
        }
        None
    }

    fn interrupted(&self) -> Option<StopReason> {
        if self.ctx.signal.is_cancelled() {
            Some(StopReason::Cancelled)
        } else if self.ctx.signal.is_found() {
            Some(StopReason::SiblingFound)
        } else {
            None
        }
    }

    async fn refresh_channel(&mut self, resource_id: &mut String) -> Result<Channel, StopReason> {
        if self.ctx.pool.mode() == AssignmentMode::RoundRobin {
            *resource_id = self.lease().map_err(|e| self.resource_failure(&e))?;
        }

        let signal = self.ctx.signal.clone();
        self.ctx
            .pool
            .acquire_channel(resource_id.as_str(), || signal.should_stop())
            .await
            .map_err(|e| match e {
                ResourceError::Cancelled(_) => self.interrupted().unwrap_or(StopReason::Cancelled),
                other => self.resource_failure(&other),
            })
    }

    fn resource_failure(&self, e: &ResourceError) -> StopReason {
        if matches!(e, ResourceError::PoolEmpty) {
            error!(worker_id = self.id, error = %e, "Resource pool empty");
        } else {
            warn!(worker_id = self.id, error = %e, "Worker has no usable resource");
        }
        StopReason::NoResource
    }

    async fn process(&mut self) -> StopReason {
        if let Some(reason) = self.interrupted() {
            return reason;
        }

        let mut resource_id = match self.lease() {
            Ok(id) => id,
            Err(e) => return self.resource_failure(&e),
        };
        debug!(worker_id = self.id, resource_id = %resource_id, "Lease acquired");

        let mut queue = self.ordered_units();
        let mut channel: Option<Channel> = None;

        loop {
            self.set_phase(WorkerPhase::Fetching);
            if let Some(reason) = self.interrupted() {
                return reason;
            }
            let Some(unit) = self.fetch(&mut queue) else {
                return StopReason::Exhausted;
            };

            let current = match channel.take() {
                Some(c) if !c.is_stale(self.ctx.channel_ttl) => c,
                stale => {
                    if stale.is_some() {
                        debug!(worker_id = self.id, resource_id = %resource_id, "Channel stale, rotating");
                    }
                    match self.refresh_channel(&mut resource_id).await {
                        Ok(c) => c,
                        Err(reason) => return reason,
                    }
                }
            };

            self.set_phase(WorkerPhase::Probing);
            let unit_key = self.ctx.store.key(unit);
            let attempt = self
                .ctx
                .executor
                .execute(&self.ctx.target_key, &unit_key, &current)
                .await;
            channel = Some(current);
            self.processed += 1;

            self.set_phase(WorkerPhase::Recording);
            self.ctx.store.mark_attempted(&self.ctx.target_key, unit).await;
            debug!(
                worker_id = self.id,
                unit = %unit_key,
                result = %attempt.result,
                attempts = attempt.attempts,
                "Unit probed"
            );

            let effective = match attempt.result {
                ProbeResult::Success if self.ctx.store.is_blocklisted(&self.ctx.target_key, unit) => {
                    warn!(worker_id = self.id, unit = %unit_key, "Success on blocklisted unit, continuing");
                    ProbeResult::Negative
                }
                other => other,
            };

            if effective == ProbeResult::Success {
                self.ctx.store.record_valid(&self.ctx.target_key, unit).await;
                self.breaker.record(effective);
                self.found_unit = Some(unit_key.clone());
                if self.ctx.reporter.report_success(self.id, &unit_key) {
                    info!(worker_id = self.id, unit = %unit_key, "Found");
                }
                return StopReason::Found;
            }

            if self.breaker.record(effective) {
                warn!(
                    worker_id = self.id,
                    threshold = self.breaker.threshold(),
                    "Circuit breaker tripped"
                );
                return StopReason::CircuitTripped;
            }

            if !self.ctx.unit_delay.is_zero() {
                tokio::time::sleep(self.ctx.unit_delay).await;
            }
        }
    }
}
