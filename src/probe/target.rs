//! The probe contract.

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ProbeError;
use crate::resources::Channel;

/// Classified result of probing one unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProbeResult {
    /// The unit satisfies the target's success condition.
    Success,
    /// The target definitively rejected the unit.
    Negative,
    /// Transport failure, unexpected response, or an ambiguous upstream state.
    Indeterminate,
}

impl ProbeResult {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProbeResult::Success => "success",
            ProbeResult::Negative => "negative",
            ProbeResult::Indeterminate => "indeterminate",
        }
    }

    /// Success and Negative end the retry loop for a unit.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ProbeResult::Indeterminate)
    }
}

impl fmt::Display for ProbeResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Something that can be asked about one unit through one channel.
///
/// Any `Err` is classified as `ProbeResult::Indeterminate` by the executor.
#[async_trait]
pub trait ProbeTarget: Send + Sync {
    async fn probe(
        &self,
        target_key: &str,
        unit_key: &str,
        channel: &Channel,
    ) -> Result<ProbeResult, ProbeError>;
}
