//! Egress channels handed out by a provisioner.

use std::fmt;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

/// What a provisioner returns for one request.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelGrant {
    pub address: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credentials: Option<String>,
}

impl ChannelGrant {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            credentials: None,
        }
    }

    pub fn with_credentials(mut self, credentials: impl Into<String>) -> Self {
        self.credentials = Some(credentials.into());
        self
    }
}

impl fmt::Debug for ChannelGrant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelGrant")
            .field("address", &self.address)
            .field("credentials", &self.credentials.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// A live egress channel for one resource.
///
/// Staleness is measured from `acquired_at`; nothing rotates a channel
/// behind the worker's back.
#[derive(Clone)]
pub struct Channel {
    resource_id: String,
    grant: ChannelGrant,
    acquired_at: Instant,
}

impl Channel {
    pub fn new(resource_id: impl Into<String>, grant: ChannelGrant) -> Self {
        Self {
            resource_id: resource_id.into(),
            grant,
            acquired_at: Instant::now(),
        }
    }

    pub fn resource_id(&self) -> &str {
        &self.resource_id
    }

    pub fn address(&self) -> &str {
        &self.grant.address
    }

    pub fn credentials(&self) -> Option<&str> {
        self.grant.credentials.as_deref()
    }

    pub fn acquired_at(&self) -> Instant {
        self.acquired_at
    }

    pub fn age(&self) -> Duration {
        self.acquired_at.elapsed()
    }

    /// True once the channel is at least `ttl` old.
    pub fn is_stale(&self, ttl: Duration) -> bool {
        self.age() >= ttl
    }
}

impl fmt::Debug for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel")
            .field("resource_id", &self.resource_id)
            .field("grant", &self.grant)
            .field("age", &self.age())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_staleness() {
        let channel = Channel::new("r1", ChannelGrant::new("10.0.0.1:8080"));
        assert!(!channel.is_stale(Duration::from_secs(150)));
        assert!(channel.is_stale(Duration::ZERO));
        assert_eq!(channel.address(), "10.0.0.1:8080");
        assert_eq!(channel.resource_id(), "r1");
    }

    #[test]
    fn test_debug_redacts_credentials() {
        let grant = ChannelGrant::new("host:1").with_credentials("user:secret");
        let rendered = format!("{:?}", Channel::new("r1", grant));
        assert!(!rendered.contains("secret"));
        assert!(rendered.contains("<redacted>"));
    }
}
