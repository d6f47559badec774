//! Shared stop flags for the workers of one campaign.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tracing::info;

/// Found and cancelled flags visible to every worker.
///
/// Workers only read the flags. `found` is raised through a
/// [`SuccessReporter`]; `cancelled` by whoever owns the job.
#[derive(Debug, Clone, Default)]
pub struct StopSignal {
    cancelled: Arc<AtomicBool>,
    found: Arc<AtomicBool>,
}

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// A signal sharing this one's cancel flag with a fresh found flag.
    pub fn for_campaign(&self) -> Self {
        Self {
            cancelled: Arc::clone(&self.cancelled),
            found: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub fn is_found(&self) -> bool {
        self.found.load(Ordering::SeqCst)
    }

    pub fn should_stop(&self) -> bool {
        self.is_cancelled() || self.is_found()
    }

    fn raise_found(&self) -> bool {
        !self.found.swap(true, Ordering::SeqCst)
    }
}

/// Callback handed to workers for announcing a success.
#[derive(Debug, Clone)]
pub struct SuccessReporter {
    signal: StopSignal,
    winner: Arc<Mutex<Option<(usize, String)>>>,
}

impl SuccessReporter {
    pub fn new(signal: StopSignal) -> Self {
        Self {
            signal,
            winner: Arc::new(Mutex::new(None)),
        }
    }

    /// Raises the found flag. Returns true for the first reporter only.
    pub fn report_success(&self, worker_id: usize, unit_key: &str) -> bool {
        let mut winner = self.winner.lock().expect("success reporter lock poisoned");
        if !self.signal.raise_found() {
            return false;
        }
        *winner = Some((worker_id, unit_key.to_string()));
        info!(worker_id, unit = unit_key, "Success reported, stopping siblings");
        true
    }

    /// The winning `(worker_id, unit_key)`, if any.
    pub fn winner(&self) -> Option<(usize, String)> {
        self.winner
            .lock()
            .expect("success reporter lock poisoned")
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_campaign_signal_shares_cancel_only() {
        let job = StopSignal::new();
        let first = job.for_campaign();
        SuccessReporter::new(first.clone()).report_success(1, "0001");
        assert!(first.is_found());

        let second = job.for_campaign();
        assert!(!second.is_found());

        job.cancel();
        assert!(first.is_cancelled());
        assert!(second.should_stop());
    }

    #[test]
    fn test_first_reporter_wins() {
        let signal = StopSignal::new();
        let reporter = SuccessReporter::new(signal.clone());

        assert!(reporter.report_success(2, "0042"));
        assert!(!reporter.report_success(3, "0077"));
        assert_eq!(reporter.winner(), Some((2, "0042".to_string())));
        assert!(signal.should_stop());
        assert!(!signal.is_cancelled());
    }
}
