//! Resource pool with exclusive per-worker leases.
//!
//! Two assignment modes are supported:
//!
//! - `Dedicated`: each worker leases one resource for its whole lifetime and
//!   no two workers ever hold the same resource.
//! - `RoundRobin`: `get_available` cycles through the pool in insertion order.
//!   Leases are not exclusive; an empty pool is fatal for the process.
//!
//! `serve` builds the pool once from `SWEEP_RESOURCES` and never changes it.
//! `add_resource` and `remove_resource` are library-only: there is no CLI
//! command or HTTP route for them, since the static provisioner only knows
//! the addresses it was configured with.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::config::{AssignmentMode, SweepConfig};
use crate::error::ResourceError;

use super::channel::Channel;
use super::provisioning::ChannelProvisioner;

const CANCEL_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// A resource leased to a worker.
#[derive(Debug, Clone)]
pub struct ResourceBinding {
    pub resource_id: String,
    pub worker_id: usize,
    pub lease_start: DateTime<Utc>,
    pub channel: Option<Channel>,
}

impl ResourceBinding {
    fn new(resource_id: String, worker_id: usize) -> Self {
        Self {
            resource_id,
            worker_id,
            lease_start: Utc::now(),
            channel: None,
        }
    }
}

#[derive(Debug, Default)]
struct PoolState {
    /// Resource ids in insertion order.
    resources: Vec<String>,
    /// Dedicated leases keyed by worker id.
    bindings: HashMap<usize, ResourceBinding>,
    cursor: usize,
}

impl PoolState {
    fn holder_of(&self, resource_id: &str) -> Option<usize> {
        self.bindings
            .values()
            .find(|b| b.resource_id == resource_id)
            .map(|b| b.worker_id)
    }
}

/// Finite set of scarce resources shared by the workers of one node.
pub struct ResourcePool {
    mode: AssignmentMode,
    state: Mutex<PoolState>,
    provisioner: Arc<dyn ChannelProvisioner>,
    retry_delay: Duration,
}

impl ResourcePool {
    pub fn new(
        mode: AssignmentMode,
        resource_ids: Vec<String>,
        provisioner: Arc<dyn ChannelProvisioner>,
        retry_delay: Duration,
    ) -> Self {
        let mut resources = Vec::with_capacity(resource_ids.len());
        for id in resource_ids {
            if !resources.contains(&id) {
                resources.push(id);
            }
        }

        Self {
            mode,
            state: Mutex::new(PoolState {
                resources,
                ..Default::default()
            }),
            provisioner,
            retry_delay,
        }
    }

    pub fn from_config(config: &SweepConfig, provisioner: Arc<dyn ChannelProvisioner>) -> Self {
        Self::new(
            config.assignment_mode,
            config.resources.iter().map(|r| r.id.clone()).collect(),
            provisioner,
            config.provision_retry_delay,
        )
    }

    pub fn mode(&self) -> AssignmentMode {
        self.mode
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, PoolState> {
        self.state.lock().expect("resource pool lock poisoned")
    }

    /// Leases a free resource to `worker_id`.
    ///
    /// A worker that already holds a lease gets the same resource back.
    /// Returns `None` when every resource is leased.
    pub fn assign_dedicated(&self, worker_id: usize) -> Option<String> {
        let mut state = self.lock();

        if let Some(existing) = state.bindings.get(&worker_id) {
            return Some(existing.resource_id.clone());
        }

        let free = state
            .resources
            .iter()
            .find(|id| state.holder_of(id).is_none())
            .cloned()?;

        state
            .bindings
            .insert(worker_id, ResourceBinding::new(free.clone(), worker_id));
        debug!(worker_id, resource_id = %free, "Resource leased");
        Some(free)
    }

    /// Drops the worker's lease, returning the freed resource id.
    pub fn release(&self, worker_id: usize) -> Option<String> {
        let released = self.lock().bindings.remove(&worker_id)?;
        debug!(worker_id, resource_id = %released.resource_id, "Resource released");
        Some(released.resource_id)
    }

    /// Next resource in insertion order, wrapping around.
    ///
    /// # Errors
    ///
    /// `ResourceError::PoolEmpty` if the pool holds no resources. Callers
    /// should shut the process down rather than retry.
    pub fn get_available(&self, worker_id: usize) -> Result<ResourceBinding, ResourceError> {
        let mut state = self.lock();
        if state.resources.is_empty() {
            return Err(ResourceError::PoolEmpty);
        }

        let idx = state.cursor % state.resources.len();
        state.cursor = idx + 1;
        Ok(ResourceBinding::new(state.resources[idx].clone(), worker_id))
    }

    /// Obtains a fresh channel for `resource_id`.
    ///
    /// Provisioning failures are retried forever with a fixed delay. Only
    /// `should_stop` returning true ends the loop early.
    pub async fn acquire_channel<F>(
        &self,
        resource_id: &str,
        should_stop: F,
    ) -> Result<Channel, ResourceError>
    where
        F: Fn() -> bool,
    {
        let mut attempt: u64 = 0;
        loop {
            if should_stop() {
                return Err(ResourceError::Cancelled(resource_id.to_string()));
            }
            if !self.contains(resource_id) {
                return Err(ResourceError::UnknownResource(resource_id.to_string()));
            }

            attempt += 1;
            match self.provisioner.request_channel(resource_id).await {
                Ok(grant) => {
                    let channel = Channel::new(resource_id, grant);
                    self.attach_channel(&channel);
                    info!(resource_id, attempt, address = %channel.address(), "Channel acquired");
                    return Ok(channel);
                }
                Err(e) => {
                    warn!(
                        resource_id,
                        attempt,
                        error = %e,
                        retry_in = ?self.retry_delay,
                        "Channel provisioning failed"
                    );
                }
            }

            if sleep_unless(self.retry_delay, &should_stop).await {
                return Err(ResourceError::Cancelled(resource_id.to_string()));
            }
        }
    }

    fn attach_channel(&self, channel: &Channel) {
        let mut state = self.lock();
        if let Some(binding) = state
            .bindings
            .values_mut()
            .find(|b| b.resource_id == channel.resource_id())
        {
            binding.channel = Some(channel.clone());
        }
    }

    /// Adds a resource at the end of the rotation.
    ///
    /// The provisioner must already know how to open a channel for it.
    pub fn add_resource(&self, resource_id: impl Into<String>) -> Result<(), ResourceError> {
        let resource_id = resource_id.into();
        let mut state = self.lock();
        if state.resources.contains(&resource_id) {
            return Err(ResourceError::DuplicateResource(resource_id));
        }
        info!(resource_id = %resource_id, "Resource added to pool");
        state.resources.push(resource_id);
        Ok(())
    }

    /// Removes a resource and any lease on it.
    ///
    /// Returns the worker that held it, if any. That worker keeps its current
    /// channel until the next rotation, which will fail.
    pub fn remove_resource(&self, resource_id: &str) -> Result<Option<usize>, ResourceError> {
        let mut state = self.lock();
        let Some(pos) = state.resources.iter().position(|id| id == resource_id) else {
            return Err(ResourceError::UnknownResource(resource_id.to_string()));
        };
        state.resources.remove(pos);
        if state.cursor > pos {
            state.cursor -= 1;
        }

        let holder = state.holder_of(resource_id);
        if let Some(worker_id) = holder {
            state.bindings.remove(&worker_id);
        }
        warn!(resource_id, holder = ?holder, "Resource removed from pool");
        Ok(holder)
    }

    pub fn contains(&self, resource_id: &str) -> bool {
        self.lock().resources.iter().any(|id| id == resource_id)
    }

    /// Snapshot of current dedicated leases, ordered by worker id.
    pub fn bindings(&self) -> Vec<ResourceBinding> {
        let mut bindings: Vec<_> = self.lock().bindings.values().cloned().collect();
        bindings.sort_by_key(|b| b.worker_id);
        bindings
    }

    /// Resources not currently leased.
    pub fn available_count(&self) -> usize {
        let state = self.lock();
        state
            .resources
            .iter()
            .filter(|id| state.holder_of(id).is_none())
            .count()
    }

    pub fn len(&self) -> usize {
        self.lock().resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Sleeps for `delay`, waking early if `should_stop` flips. Returns true if stopped.
async fn sleep_unless<F>(delay: Duration, should_stop: &F) -> bool
where
    F: Fn() -> bool,
{
    let deadline = tokio::time::Instant::now() + delay;
    loop {
        if should_stop() {
            return true;
        }
        let now = tokio::time::Instant::now();
        if now >= deadline {
            return false;
        }
        tokio::time::sleep((deadline - now).min(CANCEL_POLL_INTERVAL)).await;
    }
}
