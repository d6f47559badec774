//! Node and campaign configuration.
//!
//! `SweepConfig` is built once at startup (from defaults, environment
//! variables, or the builder methods) and then shared read-only as
//! `Arc<SweepConfig>` with every component constructor.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur during configuration operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A required environment variable is missing.
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),

    /// An environment variable has an invalid value.
    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    /// Configuration validation failed.
    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),
}

/// How scarce resources are handed to workers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum AssignmentMode {
    /// One resource leased exclusively per worker for its whole lifetime.
    #[default]
    Dedicated,
    /// Resources handed out in insertion order, cycling.
    RoundRobin,
}

impl std::str::FromStr for AssignmentMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "dedicated" => Ok(Self::Dedicated),
            "round-robin" | "round_robin" | "roundrobin" => Ok(Self::RoundRobin),
            other => Err(format!("unknown assignment mode '{}'", other)),
        }
    }
}

/// A configured resource: an identity id and the egress address the static
/// provisioner hands out for it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceSpec {
    pub id: String,
    pub address: String,
}

impl ResourceSpec {
    pub fn new(id: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            address: address.into(),
        }
    }
}

/// Settings for the ntfy-compatible notification sink.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NtfyConfig {
    pub server: String,
    pub topic: String,
}

/// Configuration for one sweep node.
#[derive(Debug, Clone)]
pub struct SweepConfig {
    // Node identity
    /// 1-based id of this node.
    pub node_id: usize,
    /// Number of nodes sharing each job.
    pub total_nodes: usize,
    /// Base URL of every node, indexed by `node_id - 1`.
    pub node_addresses: Vec<String>,
    /// Socket address the HTTP surface binds to.
    pub bind_address: String,
    /// Root directory for progress files and the queue state file.
    pub data_dir: PathBuf,

    // Campaign settings
    /// Workers per campaign on this node.
    pub concurrency: usize,
    /// Shuffle each worker's batch once before probing.
    pub shuffle: bool,
    /// Fixed seed for the shuffle (None = non-deterministic).
    pub shuffle_seed: Option<u64>,
    /// Pause between consecutive units of one worker.
    pub unit_delay: Duration,
    /// Zero-padded width of canonical unit keys.
    pub unit_width: usize,
    /// Largest range a single job may cover on this node.
    pub max_range_len: u64,

    // Probe settings
    /// Attempts per unit for indeterminate outcomes.
    pub max_retries: u32,
    /// Delay between attempts on the same unit.
    pub retry_delay: Duration,
    /// Consecutive indeterminate units before a worker trips.
    pub max_indeterminate: u32,
    /// Executable invoked by the command probe.
    pub probe_command: Option<PathBuf>,
    /// Timeout for a single probe attempt.
    pub probe_timeout: Duration,

    // Resource settings
    pub assignment_mode: AssignmentMode,
    pub resources: Vec<ResourceSpec>,
    /// Age after which a channel must be re-acquired.
    pub channel_ttl: Duration,
    /// Delay between provisioning attempts.
    pub provision_retry_delay: Duration,

    // Peer settings
    pub add_job_timeout: Duration,
    pub stop_job_timeout: Duration,
    /// Pause before starting the next pending job.
    pub next_job_delay: Duration,

    // Notifications
    pub ntfy: Option<NtfyConfig>,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            node_id: 1,
            total_nodes: 1,
            node_addresses: default_node_addresses(1),
            bind_address: "0.0.0.0:3000".to_string(),
            data_dir: PathBuf::from("./data"),

            concurrency: 1,
            shuffle: false,
            shuffle_seed: None,
            unit_delay: Duration::ZERO,
            unit_width: 4,
            max_range_len: 10_000_000,

            max_retries: 10,
            retry_delay: Duration::from_millis(3000),
            max_indeterminate: 10,
            probe_command: None,
            probe_timeout: Duration::from_secs(60),

            assignment_mode: AssignmentMode::Dedicated,
            resources: Vec::new(),
            channel_ttl: Duration::from_secs(150),
            provision_retry_delay: Duration::from_secs(30),

            add_job_timeout: Duration::from_secs(10),
            stop_job_timeout: Duration::from_secs(5),
            next_job_delay: Duration::from_secs(1),

            ntfy: None,
        }
    }
}

impl SweepConfig {
    /// Creates a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `SWEEP_NODE_ID`, `SWEEP_TOTAL_NODES`: node identity (default: 1/1)
    /// - `SWEEP_NODE_<i>_ADDRESS`: base URL of node `i` (default: `http://localhost:<2999+i>`)
    /// - `SWEEP_BIND`: HTTP bind address (default: 0.0.0.0:3000)
    /// - `SWEEP_DATA_DIR`: state directory (default: ./data)
    /// - `SWEEP_CONCURRENCY`: workers per campaign (default: 1)
    /// - `SWEEP_SHUFFLE`, `SWEEP_SHUFFLE_SEED`: batch ordering
    /// - `SWEEP_UNIT_DELAY_MS`: pause between units (default: 0)
    /// - `SWEEP_UNIT_WIDTH`: canonical key width (default: 4)
    /// - `SWEEP_MAX_RANGE_LEN`: largest per-job range (default: 10000000)
    /// - `SWEEP_MAX_RETRIES`, `SWEEP_RETRY_DELAY_MS`: probe retry policy (default: 10, 3000)
    /// - `SWEEP_MAX_INDETERMINATE`: circuit breaker threshold (default: 10)
    /// - `SWEEP_PROBE_COMMAND`, `SWEEP_PROBE_TIMEOUT_SECS`: command probe
    /// - `SWEEP_ASSIGNMENT`: `dedicated` or `round-robin`
    /// - `SWEEP_RESOURCES`: comma-separated `id=address` pairs
    /// - `SWEEP_CHANNEL_TTL_SECS`: channel expiry (default: 150)
    /// - `SWEEP_PROVISION_RETRY_SECS`: provisioning retry delay (default: 30)
    /// - `SWEEP_NTFY_SERVER`, `SWEEP_NTFY_TOPIC`: enable ntfy notifications
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(val) = lookup("SWEEP_NODE_ID") {
            config.node_id = parse_env_value(&val, "SWEEP_NODE_ID")?;
        }
        if let Some(val) = lookup("SWEEP_TOTAL_NODES") {
            config.total_nodes = parse_env_value(&val, "SWEEP_TOTAL_NODES")?;
        }

        let mut addresses = default_node_addresses(config.total_nodes);
        for (idx, address) in addresses.iter_mut().enumerate() {
            if let Some(val) = lookup(&format!("SWEEP_NODE_{}_ADDRESS", idx + 1)) {
                *address = val.trim_end_matches('/').to_string();
            }
        }
        config.node_addresses = addresses;

        if let Some(val) = lookup("SWEEP_BIND") {
            config.bind_address = val;
        }
        if let Some(val) = lookup("SWEEP_DATA_DIR") {
            config.data_dir = PathBuf::from(val);
        }

        if let Some(val) = lookup("SWEEP_CONCURRENCY") {
            config.concurrency = parse_env_value(&val, "SWEEP_CONCURRENCY")?;
        }
        if let Some(val) = lookup("SWEEP_SHUFFLE") {
            config.shuffle = parse_env_bool(&val, "SWEEP_SHUFFLE")?;
        }
        if let Some(val) = lookup("SWEEP_SHUFFLE_SEED") {
            config.shuffle_seed = Some(parse_env_value(&val, "SWEEP_SHUFFLE_SEED")?);
        }
        if let Some(val) = lookup("SWEEP_UNIT_DELAY_MS") {
            let ms: u64 = parse_env_value(&val, "SWEEP_UNIT_DELAY_MS")?;
            config.unit_delay = Duration::from_millis(ms);
        }
        if let Some(val) = lookup("SWEEP_UNIT_WIDTH") {
            config.unit_width = parse_env_value(&val, "SWEEP_UNIT_WIDTH")?;
        }

        if let Some(val) = lookup("SWEEP_MAX_RANGE_LEN") {
            config.max_range_len = parse_env_value(&val, "SWEEP_MAX_RANGE_LEN")?;
        }
        if let Some(val) = lookup("SWEEP_MAX_RETRIES") {
            config.max_retries = parse_env_value(&val, "SWEEP_MAX_RETRIES")?;
        }
        if let Some(val) = lookup("SWEEP_RETRY_DELAY_MS") {
            let ms: u64 = parse_env_value(&val, "SWEEP_RETRY_DELAY_MS")?;
            config.retry_delay = Duration::from_millis(ms);
        }
        if let Some(val) = lookup("SWEEP_MAX_INDETERMINATE") {
            config.max_indeterminate = parse_env_value(&val, "SWEEP_MAX_INDETERMINATE")?;
        }
        if let Some(val) = lookup("SWEEP_PROBE_COMMAND") {
            config.probe_command = Some(PathBuf::from(val));
        }
        if let Some(val) = lookup("SWEEP_PROBE_TIMEOUT_SECS") {
            let secs: u64 = parse_env_value(&val, "SWEEP_PROBE_TIMEOUT_SECS")?;
            config.probe_timeout = Duration::from_secs(secs);
        }

        if let Some(val) = lookup("SWEEP_ASSIGNMENT") {
            config.assignment_mode =
                val.parse()
                    .map_err(|message| ConfigError::InvalidValue {
                        key: "SWEEP_ASSIGNMENT".to_string(),
                        message,
                    })?;
        }
        if let Some(val) = lookup("SWEEP_RESOURCES") {
            config.resources = parse_resources(&val)?;
        }
        if let Some(val) = lookup("SWEEP_CHANNEL_TTL_SECS") {
            let secs: u64 = parse_env_value(&val, "SWEEP_CHANNEL_TTL_SECS")?;
            config.channel_ttl = Duration::from_secs(secs);
        }
        if let Some(val) = lookup("SWEEP_PROVISION_RETRY_SECS") {
            let secs: u64 = parse_env_value(&val, "SWEEP_PROVISION_RETRY_SECS")?;
            config.provision_retry_delay = Duration::from_secs(secs);
        }

        if let (Some(server), Some(topic)) = (lookup("SWEEP_NTFY_SERVER"), lookup("SWEEP_NTFY_TOPIC"))
        {
            config.ntfy = Some(NtfyConfig {
                server: server.trim_end_matches('/').to_string(),
                topic,
            });
        }

        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration values.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationFailed` if any values are invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.total_nodes == 0 {
            return Err(ConfigError::ValidationFailed(
                "total_nodes must be greater than 0".to_string(),
            ));
        }

        if self.node_id == 0 || self.node_id > self.total_nodes {
            return Err(ConfigError::ValidationFailed(format!(
                "node_id must be between 1 and {}",
                self.total_nodes
            )));
        }

        if self.node_addresses.len() != self.total_nodes {
            return Err(ConfigError::ValidationFailed(format!(
                "expected {} node addresses, got {}",
                self.total_nodes,
                self.node_addresses.len()
            )));
        }

        if self.concurrency == 0 {
            return Err(ConfigError::ValidationFailed(
                "concurrency must be greater than 0".to_string(),
            ));
        }

        if self.max_retries == 0 {
            return Err(ConfigError::ValidationFailed(
                "max_retries must be greater than 0".to_string(),
            ));
        }

        if self.max_indeterminate == 0 {
            return Err(ConfigError::ValidationFailed(
                "max_indeterminate must be greater than 0".to_string(),
            ));
        }

        if self.unit_width == 0 || self.unit_width > 20 {
            return Err(ConfigError::ValidationFailed(
                "unit_width must be between 1 and 20".to_string(),
            ));
        }

        if self.max_range_len == 0 {
            return Err(ConfigError::ValidationFailed(
                "max_range_len must be greater than 0".to_string(),
            ));
        }

        if self.channel_ttl.is_zero() {
            return Err(ConfigError::ValidationFailed(
                "channel_ttl must be greater than 0".to_string(),
            ));
        }

        let mut seen = std::collections::HashSet::new();
        for resource in &self.resources {
            if !seen.insert(resource.id.as_str()) {
                return Err(ConfigError::ValidationFailed(format!(
                    "duplicate resource id '{}'",
                    resource.id
                )));
            }
        }

        Ok(())
    }

    /// Checks the settings `serve` cannot run without.
    ///
    /// # Errors
    ///
    /// `ConfigError::MissingEnvVar` naming the first unset variable.
    pub fn require_serving(&self) -> Result<(), ConfigError> {
        if self.probe_command.is_none() {
            return Err(ConfigError::MissingEnvVar("SWEEP_PROBE_COMMAND".to_string()));
        }
        if self.resources.is_empty() {
            return Err(ConfigError::MissingEnvVar("SWEEP_RESOURCES".to_string()));
        }
        Ok(())
    }

    /// Base URL of the given node, if configured.
    pub fn node_address(&self, node_id: usize) -> Option<&str> {
        node_id
            .checked_sub(1)
            .and_then(|idx| self.node_addresses.get(idx))
            .map(String::as_str)
    }

    /// Every other node as `(node_id, address)`.
    pub fn peers(&self) -> impl Iterator<Item = (usize, &str)> + '_ {
        self.node_addresses
            .iter()
            .enumerate()
            .map(|(idx, address)| (idx + 1, address.as_str()))
            .filter(move |(node_id, _)| *node_id != self.node_id)
    }

    /// Sets this node's identity and the full address list.
    pub fn with_nodes(mut self, node_id: usize, addresses: Vec<String>) -> Self {
        self.node_id = node_id;
        self.total_nodes = addresses.len();
        self.node_addresses = addresses;
        self
    }

    pub fn with_data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.data_dir = dir.into();
        self
    }

    pub fn with_bind_address(mut self, bind: impl Into<String>) -> Self {
        self.bind_address = bind.into();
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    pub fn with_shuffle(mut self, shuffle: bool, seed: Option<u64>) -> Self {
        self.shuffle = shuffle;
        self.shuffle_seed = seed;
        self
    }

    pub fn with_unit_delay(mut self, delay: Duration) -> Self {
        self.unit_delay = delay;
        self
    }

    pub fn with_unit_width(mut self, width: usize) -> Self {
        self.unit_width = width;
        self
    }

    pub fn with_retry_policy(mut self, max_retries: u32, retry_delay: Duration) -> Self {
        self.max_retries = max_retries;
        self.retry_delay = retry_delay;
        self
    }

    pub fn with_max_indeterminate(mut self, max: u32) -> Self {
        self.max_indeterminate = max;
        self
    }

    pub fn with_probe_command(mut self, command: impl Into<PathBuf>) -> Self {
        self.probe_command = Some(command.into());
        self
    }

    pub fn with_assignment_mode(mut self, mode: AssignmentMode) -> Self {
        self.assignment_mode = mode;
        self
    }

    pub fn with_resources(mut self, resources: Vec<ResourceSpec>) -> Self {
        self.resources = resources;
        self
    }

    pub fn with_channel_ttl(mut self, ttl: Duration) -> Self {
        self.channel_ttl = ttl;
        self
    }

    pub fn with_provision_retry_delay(mut self, delay: Duration) -> Self {
        self.provision_retry_delay = delay;
        self
    }

    pub fn with_max_range_len(mut self, max: u64) -> Self {
        self.max_range_len = max;
        self
    }

    pub fn with_next_job_delay(mut self, delay: Duration) -> Self {
        self.next_job_delay = delay;
        self
    }

    pub fn with_peer_timeouts(mut self, add_job: Duration, stop_job: Duration) -> Self {
        self.add_job_timeout = add_job;
        self.stop_job_timeout = stop_job;
        self
    }

    pub fn with_ntfy(mut self, server: impl Into<String>, topic: impl Into<String>) -> Self {
        self.ntfy = Some(NtfyConfig {
            server: server.into(),
            topic: topic.into(),
        });
        self
    }
}

/// Local test-friendly defaults: node `i` listens on port `2999 + i`.
fn default_node_addresses(total_nodes: usize) -> Vec<String> {
    (1..=total_nodes)
        .map(|i| format!("http://localhost:{}", 2999 + i))
        .collect()
}

/// Parse `id=address,id=address`.
fn parse_resources(value: &str) -> Result<Vec<ResourceSpec>, ConfigError> {
    value
        .split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            let (id, address) = entry.split_once('=').ok_or_else(|| ConfigError::InvalidValue {
                key: "SWEEP_RESOURCES".to_string(),
                message: format!("expected id=address, got '{}'", entry),
            })?;
            Ok(ResourceSpec::new(id.trim(), address.trim()))
        })
        .collect()
}

/// Parse an environment variable into any `FromStr` type.
fn parse_env_value<T: std::str::FromStr>(value: &str, key: &str) -> Result<T, ConfigError> {
    value.parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        message: format!("could not parse '{}'", value),
    })
}

/// Parse an environment variable as a boolean.
fn parse_env_bool(value: &str, key: &str) -> Result<bool, ConfigError> {
    match value.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("expected boolean value, got '{}'", value),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = SweepConfig::default();
        assert_eq!(config.node_id, 1);
        assert_eq!(config.total_nodes, 1);
        assert_eq!(config.node_addresses, vec!["http://localhost:3000"]);
        assert_eq!(config.max_retries, 10);
        assert_eq!(config.retry_delay, Duration::from_millis(3000));
        assert_eq!(config.max_indeterminate, 10);
        assert_eq!(config.channel_ttl, Duration::from_secs(150));
        assert_eq!(config.provision_retry_delay, Duration::from_secs(30));
        assert_eq!(config.add_job_timeout, Duration::from_secs(10));
        assert_eq!(config.stop_job_timeout, Duration::from_secs(5));
        assert_eq!(config.assignment_mode, AssignmentMode::Dedicated);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_lookup_reads_node_layout() {
        let config = SweepConfig::from_lookup(lookup_from(&[
            ("SWEEP_NODE_ID", "2"),
            ("SWEEP_TOTAL_NODES", "3"),
            ("SWEEP_NODE_1_ADDRESS", "http://10.0.0.1:3000/"),
            ("SWEEP_CONCURRENCY", "3"),
            ("SWEEP_SHUFFLE", "yes"),
            ("SWEEP_ASSIGNMENT", "round-robin"),
            ("SWEEP_RESOURCES", "k1=http://p1:8080, k2=http://p2:8080"),
        ]))
        .expect("config should load");

        assert_eq!(config.node_id, 2);
        assert_eq!(config.total_nodes, 3);
        assert_eq!(config.node_addresses[0], "http://10.0.0.1:3000");
        assert_eq!(config.node_addresses[2], "http://localhost:3002");
        assert_eq!(config.concurrency, 3);
        assert!(config.shuffle);
        assert_eq!(config.assignment_mode, AssignmentMode::RoundRobin);
        assert_eq!(config.resources.len(), 2);
        assert_eq!(config.resources[1], ResourceSpec::new("k2", "http://p2:8080"));
    }

    #[test]
    fn test_from_lookup_rejects_bad_number() {
        let result = SweepConfig::from_lookup(lookup_from(&[("SWEEP_MAX_RETRIES", "many")]));
        let err = result.expect_err("should reject");
        assert!(err.to_string().contains("SWEEP_MAX_RETRIES"));
    }

    #[test]
    fn test_validation_node_id_out_of_range() {
        let config = SweepConfig::default().with_nodes(3, vec!["http://a".into(), "http://b".into()]);
        let err = config.validate().expect_err("node 3 of 2 is invalid");
        assert!(err.to_string().contains("node_id"));
    }

    #[test]
    fn test_require_serving_names_missing_variable() {
        let config = SweepConfig::default();
        assert!(matches!(
            config.require_serving(),
            Err(ConfigError::MissingEnvVar(key)) if key == "SWEEP_PROBE_COMMAND"
        ));

        let config = config.with_probe_command("/bin/true");
        assert!(matches!(
            config.require_serving(),
            Err(ConfigError::MissingEnvVar(key)) if key == "SWEEP_RESOURCES"
        ));

        let config = config.with_resources(vec![ResourceSpec::new("k1", "a")]);
        assert!(config.require_serving().is_ok());
    }

    #[test]
    fn test_max_range_len_from_env() {
        let config = SweepConfig::from_lookup(lookup_from(&[("SWEEP_MAX_RANGE_LEN", "5000")]))
            .expect("config should load");
        assert_eq!(config.max_range_len, 5000);

        let result = SweepConfig::from_lookup(lookup_from(&[("SWEEP_MAX_RANGE_LEN", "0")]));
        assert!(matches!(result, Err(ConfigError::ValidationFailed(_))));
    }

    #[test]
    fn test_validation_duplicate_resource() {
        let config = SweepConfig::default().with_resources(vec![
            ResourceSpec::new("k1", "a"),
            ResourceSpec::new("k1", "b"),
        ]);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_peers_excludes_self() {
        let config = SweepConfig::default().with_nodes(
            2,
            vec!["http://a".into(), "http://b".into(), "http://c".into()],
        );
        let peers: Vec<_> = config.peers().collect();
        assert_eq!(peers, vec![(1, "http://a"), (3, "http://c")]);
        assert_eq!(config.node_address(2), Some("http://b"));
        assert_eq!(config.node_address(0), None);
    }
}
