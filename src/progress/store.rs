//! File-backed progress store.
//!
//! Each target key owns a directory with three JSON array files:
//!
//! - `attempted.json`: every unit ever handed to a probe
//! - `blocklist.json`: units excluded as known false positives
//! - `valid.json`: `{unit, found_at}` records for successful probes
//!
//! Directory names percent-encode the target key, so distinct keys never
//! share files. An in-memory index mirrors each target's files and is loaded
//! once on first access. Targets are locked independently. Mutations update
//! memory, then rewrite the file through `tokio::fs` while holding the
//! target's write lock, so files are written in mutation order and a
//! mutation is on disk before its future resolves. Write failures are logged
//! and counted; the in-memory state still advances, which at worst causes a
//! unit to be probed again after a crash.

use std::collections::{HashMap, HashSet};
use std::fs as std_fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, error, info, warn};

use crate::error::ProgressError;
use crate::metrics::MetricsCollector;

const ATTEMPTED_FILE: &str = "attempted.json";
const BLOCKLIST_FILE: &str = "blocklist.json";
const VALID_FILE: &str = "valid.json";

/// A unit that produced a success, with the time it was recorded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidUnit {
    pub unit: String,
    pub found_at: DateTime<Utc>,
}

/// Summary counts for one target key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressStats {
    pub attempted: usize,
    pub blocklisted: usize,
    pub valid: usize,
    /// Valid units that are not blocklisted.
    pub valid_unblocked: Vec<String>,
}

/// Formats a unit as its canonical fixed-width key.
///
/// Values wider than `width` are written in full, never truncated.
pub fn unit_key(unit: u64, width: usize) -> String {
    format!("{:0width$}", unit, width = width)
}

#[derive(Debug, Clone)]
struct ProgressPaths {
    attempted: PathBuf,
    blocklist: PathBuf,
    valid: PathBuf,
}

impl ProgressPaths {
    fn new(root: &Path, target_key: &str) -> Self {
        let dir = root.join(encode_target_key(target_key));
        Self {
            attempted: dir.join(ATTEMPTED_FILE),
            blocklist: dir.join(BLOCKLIST_FILE),
            valid: dir.join(VALID_FILE),
        }
    }
}

/// In-memory mirror of one target's files.
#[derive(Debug)]
struct TargetProgress {
    attempted_log: Vec<String>,
    attempted: HashSet<String>,
    blocklist_log: Vec<String>,
    blocklisted: HashSet<String>,
    valid: Vec<ValidUnit>,
}

impl TargetProgress {
    fn load(paths: &ProgressPaths, target_key: &str) -> Self {
        let attempted_log: Vec<String> = read_json_array(&paths.attempted);
        let blocklist_log: Vec<String> = read_json_array(&paths.blocklist);
        let valid: Vec<ValidUnit> = read_json_array(&paths.valid);

        debug!(
            target_key,
            attempted = attempted_log.len(),
            blocklisted = blocklist_log.len(),
            valid = valid.len(),
            "Loaded progress"
        );

        Self {
            attempted: attempted_log.iter().cloned().collect(),
            blocklisted: blocklist_log.iter().cloned().collect(),
            attempted_log,
            blocklist_log,
            valid,
        }
    }

    fn has_valid_unblocked(&self) -> bool {
        self.valid
            .iter()
            .any(|v| !self.blocklisted.contains(&v.unit))
    }

    fn valid_unblocked(&self) -> Vec<ValidUnit> {
        self.valid
            .iter()
            .filter(|v| !self.blocklisted.contains(&v.unit))
            .cloned()
            .collect()
    }
}

/// One target's state plus the lock that orders its file writes.
struct TargetSlot {
    paths: ProgressPaths,
    state: Mutex<TargetProgress>,
    writes: tokio::sync::Mutex<()>,
}

impl TargetSlot {
    fn lock(&self) -> MutexGuard<'_, TargetProgress> {
        self.state.lock().expect("progress lock poisoned")
    }
}

/// A serialized file image waiting to be written.
struct PendingWrite {
    path: PathBuf,
    data: Result<Vec<u8>, serde_json::Error>,
}

impl PendingWrite {
    fn new<T: Serialize>(path: &Path, items: &[T]) -> Self {
        Self {
            path: path.to_path_buf(),
            data: serde_json::to_vec_pretty(items),
        }
    }
}

/// Durable, idempotent record of attempted, blocklisted and valid units.
pub struct ProgressStore {
    root: PathBuf,
    unit_width: usize,
    targets: Mutex<HashMap<String, Arc<TargetSlot>>>,
    metrics: MetricsCollector,
}

impl ProgressStore {
    /// Creates a store rooted at `root`. Target directories are created lazily.
    pub fn new(root: impl Into<PathBuf>, unit_width: usize) -> Self {
        Self {
            root: root.into(),
            unit_width,
            targets: Mutex::new(HashMap::new()),
            metrics: MetricsCollector::new(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Canonical key for `unit` under this store's width.
    pub fn key(&self, unit: u64) -> String {
        unit_key(unit, self.unit_width)
    }

    fn targets(&self) -> MutexGuard<'_, HashMap<String, Arc<TargetSlot>>> {
        self.targets.lock().expect("progress lock poisoned")
    }

    /// The target's slot, loading its files on first access.
    ///
    /// Loading happens outside the map lock so one target's first read never
    /// stalls another target.
    fn slot(&self, target_key: &str) -> Arc<TargetSlot> {
        if let Some(slot) = self.targets().get(target_key) {
            return Arc::clone(slot);
        }

        let paths = ProgressPaths::new(&self.root, target_key);
        let state = TargetProgress::load(&paths, target_key);
        let mut targets = self.targets();
        let slot = targets.entry(target_key.to_string()).or_insert_with(|| {
            Arc::new(TargetSlot {
                paths,
                state: Mutex::new(state),
                writes: tokio::sync::Mutex::new(()),
            })
        });
        Arc::clone(slot)
    }

    fn read<R>(&self, target_key: &str, f: impl FnOnce(&TargetProgress) -> R) -> R {
        let slot = self.slot(target_key);
        let state = slot.lock();
        f(&state)
    }

    async fn persist(&self, target_key: &str, writes: Vec<PendingWrite>) {
        for write in writes {
            let result = match write.data {
                Ok(data) => write_atomic(&write.path, &data).await,
                Err(e) => Err(e.into()),
            };
            if let Err(e) = result {
                self.metrics.record_persist_failure();
                error!(target_key, path = %write.path.display(), error = %e, "Failed to persist progress");
            }
        }
    }

    pub fn is_attempted(&self, target_key: &str, unit: u64) -> bool {
        let key = self.key(unit);
        self.read(target_key, |p| p.attempted.contains(&key))
    }

    /// Adds `unit` to the attempted set. No-op when already present.
    pub async fn mark_attempted(&self, target_key: &str, unit: u64) {
        let key = self.key(unit);
        let slot = self.slot(target_key);
        let _ordered = slot.writes.lock().await;
        let write = {
            let mut p = slot.lock();
            if !p.attempted.insert(key.clone()) {
                return;
            }
            p.attempted_log.push(key);
            PendingWrite::new(&slot.paths.attempted, &p.attempted_log)
        };
        self.persist(target_key, vec![write]).await;
    }

    pub fn is_blocklisted(&self, target_key: &str, unit: u64) -> bool {
        let key = self.key(unit);
        self.read(target_key, |p| p.blocklisted.contains(&key))
    }

    /// Adds `unit` to the blocklist. No-op when already present.
    pub async fn add_blocklist(&self, target_key: &str, unit: u64) {
        let key = self.key(unit);
        let slot = self.slot(target_key);
        let _ordered = slot.writes.lock().await;
        let write = {
            let mut p = slot.lock();
            if !p.blocklisted.insert(key.clone()) {
                return;
            }
            info!(target_key, unit = %key, "Unit blocklisted");
            p.blocklist_log.push(key);
            PendingWrite::new(&slot.paths.blocklist, &p.blocklist_log)
        };
        self.persist(target_key, vec![write]).await;
    }

    /// Appends a valid record for `unit`.
    ///
    /// Does not dedupe; callers check `has_valid_unblocked` first. The unit
    /// is also added to the attempted set.
    pub async fn record_valid(&self, target_key: &str, unit: u64) {
        let key = self.key(unit);
        let slot = self.slot(target_key);
        let _ordered = slot.writes.lock().await;
        let writes = {
            let mut p = slot.lock();
            p.valid.push(ValidUnit {
                unit: key.clone(),
                found_at: Utc::now(),
            });
            let mut writes = vec![PendingWrite::new(&slot.paths.valid, &p.valid)];
            if p.attempted.insert(key.clone()) {
                p.attempted_log.push(key.clone());
                writes.push(PendingWrite::new(&slot.paths.attempted, &p.attempted_log));
            }
            writes
        };
        self.persist(target_key, writes).await;
        info!(target_key, unit = %key, "Valid unit recorded");
    }

    /// True if any recorded valid unit is not blocklisted.
    pub fn has_valid_unblocked(&self, target_key: &str) -> bool {
        self.read(target_key, |p| p.has_valid_unblocked())
    }

    /// Valid records whose unit is not blocklisted.
    pub fn valid_unblocked(&self, target_key: &str) -> Vec<ValidUnit> {
        self.read(target_key, |p| p.valid_unblocked())
    }

    pub fn stats(&self, target_key: &str) -> ProgressStats {
        self.read(target_key, |p| ProgressStats {
            attempted: p.attempted.len(),
            blocklisted: p.blocklisted.len(),
            valid: p.valid.len(),
            valid_unblocked: p.valid_unblocked().into_iter().map(|v| v.unit).collect(),
        })
    }

    /// Keys of `units` that have not been attempted yet, in input order.
    ///
    /// Holds only this target's lock.
    pub fn filter_unattempted(&self, target_key: &str, units: impl IntoIterator<Item = u64>) -> Vec<u64> {
        let width = self.unit_width;
        self.read(target_key, |p| {
            units
                .into_iter()
                .filter(|unit| !p.attempted.contains(&unit_key(*unit, width)))
                .collect()
        })
    }

    /// Deletes every progress file for `target_key`.
    ///
    /// Operator action only; nothing in the sweep path calls this.
    pub async fn reset(&self, target_key: &str) -> Result<(), ProgressError> {
        let slot = self.targets().remove(target_key);
        let _ordered = match &slot {
            Some(slot) => Some(slot.writes.lock().await),
            None => None,
        };

        let paths = ProgressPaths::new(&self.root, target_key);
        for path in [&paths.attempted, &paths.blocklist, &paths.valid] {
            match fs::remove_file(path).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }

        warn!(target_key, "Progress reset");
        Ok(())
    }
}

/// Write-to-temp, fsync, rename.
async fn write_atomic(path: &Path, data: &[u8]) -> Result<(), ProgressError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }

    let tmp = path.with_extension("json.tmp");
    let mut file = fs::File::create(&tmp).await?;
    file.write_all(data).await?;
    file.sync_all().await?;
    drop(file);
    fs::rename(&tmp, path).await?;
    Ok(())
}

/// Reads a JSON array, treating a missing or unreadable file as empty.
fn read_json_array<T: DeserializeOwned>(path: &Path) -> Vec<T> {
    let data = match std_fs::read(path) {
        Ok(data) => data,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Vec::new(),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Failed to read progress file");
            return Vec::new();
        }
    };

    match serde_json::from_slice(&data) {
        Ok(items) => items,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Corrupt progress file, starting empty");
            Vec::new()
        }
    }
}

/// Directory name for a target key.
///
/// ASCII alphanumerics, `-` and `_` pass through; every other byte becomes
/// `%XX`. The mapping is injective, so two keys never share a directory. The
/// empty key maps to a lone `%`, which no encoded key can produce.
fn encode_target_key(target_key: &str) -> String {
    if target_key.is_empty() {
        return "%".to_string();
    }

    let mut encoded = String::with_capacity(target_key.len());
    for byte in target_key.bytes() {
        if byte.is_ascii_alphanumeric() || matches!(byte, b'-' | b'_') {
            encoded.push(byte as char);
        } else {
            encoded.push_str(&format!("%{:02X}", byte));
        }
    }
    encoded
}
