//! Consecutive-indeterminate circuit breaker for one worker.
//!
//! A worker whose channel keeps producing indeterminate results stops
//! rather than burning through its batch.

use super::target::ProbeResult;

/// Per-worker failure budget over consecutive indeterminate results.
///
/// Negative and Success reset the counter. Once tripped, the breaker stays
/// tripped.
#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    threshold: u32,
    consecutive_indeterminate: u32,
    tripped: bool,
}

impl CircuitBreaker {
    pub fn new(threshold: u32) -> Self {
        Self {
            threshold: threshold.max(1),
            consecutive_indeterminate: 0,
            tripped: false,
        }
    }

    /// Feeds one unit's final result. Returns whether the breaker is tripped.
    pub fn record(&mut self, result: ProbeResult) -> bool {
        match result {
            ProbeResult::Indeterminate => {
                self.consecutive_indeterminate += 1;
                if self.consecutive_indeterminate >= self.threshold {
                    self.tripped = true;
                }
            }
            ProbeResult::Success | ProbeResult::Negative => {
                self.consecutive_indeterminate = 0;
            }
        }
        self.tripped
    }

    pub fn is_tripped(&self) -> bool {
        self.tripped
    }

    pub fn consecutive_indeterminate(&self) -> u32 {
        self.consecutive_indeterminate
    }

    pub fn threshold(&self) -> u32 {
        self.threshold
    }
}
