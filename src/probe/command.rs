//! Probe target backed by an operator-supplied executable.
//!
//! The program is invoked as `<program> [leading args...] <target_key>
//! <unit_key> <channel_address>`. Channel credentials, when present, are
//! passed in the `SWEEP_CHANNEL_CREDENTIALS` environment variable rather
//! than on the command line.
//!
//! Exit status 0 means success, 1 means negative. Anything else, including
//! a spawn failure or timeout, is indeterminate.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;

use crate::config::SweepConfig;
use crate::error::ProbeError;
use crate::resources::Channel;

use super::target::{ProbeResult, ProbeTarget};

const CREDENTIALS_ENV: &str = "SWEEP_CHANNEL_CREDENTIALS";
const STDERR_SNIPPET_LEN: usize = 200;

#[derive(Debug, Clone)]
pub struct CommandProbe {
    program: PathBuf,
    leading_args: Vec<String>,
    timeout: Duration,
}

impl CommandProbe {
    pub fn new(program: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            leading_args: Vec::new(),
            timeout,
        }
    }

    /// Builds a probe from `probe_command`, if one is configured.
    pub fn from_config(config: &SweepConfig) -> Option<Self> {
        config
            .probe_command
            .as_ref()
            .map(|program| Self::new(program.clone(), config.probe_timeout))
    }

    /// Arguments placed before the per-unit arguments.
    pub fn with_leading_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.leading_args = args.into_iter().map(Into::into).collect();
        self
    }
}

#[async_trait]
impl ProbeTarget for CommandProbe {
    async fn probe(
        &self,
        target_key: &str,
        unit_key: &str,
        channel: &Channel,
    ) -> Result<ProbeResult, ProbeError> {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.leading_args)
            .arg(target_key)
            .arg(unit_key)
            .arg(channel.address())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(credentials) = channel.credentials() {
            cmd.env(CREDENTIALS_ENV, credentials);
        }

        let child = cmd
            .spawn()
            .map_err(|e| ProbeError::Spawn(format!("{}: {}", self.program.display(), e)))?;

        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| ProbeError::Timeout(self.timeout))?
            .map_err(|e| ProbeError::Transport(e.to_string()))?;

        match output.status.code() {
            Some(0) => Ok(ProbeResult::Success),
            Some(1) => Ok(ProbeResult::Negative),
            code => {
                let stderr = String::from_utf8_lossy(&output.stderr);
                let snippet: String = stderr.trim().chars().take(STDERR_SNIPPET_LEN).collect();
                Err(ProbeError::UnexpectedResponse(format!(
                    "exit status {:?}: {}",
                    code, snippet
                )))
            }
        }
    }
}
