//! Retry loop around a single probe target.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::config::SweepConfig;
use crate::metrics::MetricsCollector;
use crate::resources::Channel;

use super::target::{ProbeResult, ProbeTarget};

/// Result of driving one unit through the retry loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeAttempt {
    pub result: ProbeResult,
    pub attempts: u32,
}

/// Issues probes and retries indeterminate results with a fixed delay.
#[derive(Clone)]
pub struct ProbeExecutor {
    target: Arc<dyn ProbeTarget>,
    max_retries: u32,
    retry_delay: Duration,
    metrics: MetricsCollector,
}

impl ProbeExecutor {
    pub fn new(target: Arc<dyn ProbeTarget>, max_retries: u32, retry_delay: Duration) -> Self {
        Self {
            target,
            max_retries: max_retries.max(1),
            retry_delay,
            metrics: MetricsCollector::new(),
        }
    }

    pub fn from_config(target: Arc<dyn ProbeTarget>, config: &SweepConfig) -> Self {
        Self::new(target, config.max_retries, config.retry_delay)
    }

    /// Probes `unit_key` up to `max_retries` times.
    ///
    /// Success and Negative return immediately. Errors from the target count
    /// as Indeterminate. The whole sequence runs to completion; callers check
    /// cancellation only between units.
    pub async fn execute(&self, target_key: &str, unit_key: &str, channel: &Channel) -> ProbeAttempt {
        let mut attempts = 0;
        loop {
            attempts += 1;
            let result = match self.target.probe(target_key, unit_key, channel).await {
                Ok(result) => result,
                Err(e) => {
                    debug!(target_key, unit = unit_key, attempt = attempts, error = %e, "Probe error");
                    ProbeResult::Indeterminate
                }
            };
            self.metrics.record_probe(result.as_str());

            if result.is_terminal() || attempts >= self.max_retries {
                if !result.is_terminal() {
                    warn!(target_key, unit = unit_key, attempts, "Probe retries exhausted");
                }
                return ProbeAttempt { result, attempts };
            }

            tokio::time::sleep(self.retry_delay).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProbeError;
    use crate::resources::ChannelGrant;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    struct ScriptedProbe {
        script: Mutex<VecDeque<Result<ProbeResult, ProbeError>>>,
        calls: Mutex<u32>,
    }

    impl ScriptedProbe {
        fn new(script: Vec<Result<ProbeResult, ProbeError>>) -> Self {
            Self {
                script: Mutex::new(script.into()),
                calls: Mutex::new(0),
            }
        }
    }

    #[async_trait]
    impl ProbeTarget for ScriptedProbe {
        async fn probe(
            &self,
            _target_key: &str,
            _unit_key: &str,
            _channel: &Channel,
        ) -> Result<ProbeResult, ProbeError> {
            *self.calls.lock().unwrap() += 1;
            self.script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Ok(ProbeResult::Indeterminate))
        }
    }

    fn channel() -> Channel {
        Channel::new("r1", ChannelGrant::new("local"))
    }

    #[tokio::test]
    async fn test_retries_only_indeterminate() {
        let probe = Arc::new(ScriptedProbe::new(vec![
            Ok(ProbeResult::Indeterminate),
            Err(ProbeError::Transport("reset".to_string())),
            Ok(ProbeResult::Negative),
        ]));
        let executor = ProbeExecutor::new(probe.clone(), 10, Duration::from_millis(1));

        let attempt = executor.execute("acct", "0001", &channel()).await;
        assert_eq!(attempt.result, ProbeResult::Negative);
        assert_eq!(attempt.attempts, 3);
        assert_eq!(*probe.calls.lock().unwrap(), 3);
    }

    #[tokio::test]
    async fn test_success_is_immediate() {
        let probe = Arc::new(ScriptedProbe::new(vec![Ok(ProbeResult::Success)]));
        let executor = ProbeExecutor::new(probe.clone(), 10, Duration::from_millis(1));

        let attempt = executor.execute("acct", "0001", &channel()).await;
        assert_eq!(attempt, ProbeAttempt { result: ProbeResult::Success, attempts: 1 });
    }

    #[tokio::test]
    async fn test_gives_up_after_max_retries() {
        let probe = Arc::new(ScriptedProbe::new(Vec::new()));
        let executor = ProbeExecutor::new(probe.clone(), 4, Duration::from_millis(1));

        let attempt = executor.execute("acct", "0001", &channel()).await;
        assert_eq!(attempt.result, ProbeResult::Indeterminate);
        assert_eq!(attempt.attempts, 4);
        assert_eq!(*probe.calls.lock().unwrap(), 4);
    }
}
