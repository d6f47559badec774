//! Notification sinks for campaign outcomes.
//!
//! Notifications are fire-and-forget: a sink logs its own failures and never
//! returns an error to the caller.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tracing::{debug, info, warn};

use crate::config::NtfyConfig;

/// Request timeout for notification delivery.
const NOTIFY_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Priority {
    Low,
    Normal,
    High,
}

impl Priority {
    /// Value of ntfy's `Priority` header.
    pub fn as_ntfy(&self) -> &'static str {
        match self {
            Priority::Low => "low",
            Priority::Normal => "default",
            Priority::High => "high",
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Priority::Low => "low",
            Priority::Normal => "normal",
            Priority::High => "high",
        })
    }
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, title: &str, body: &str, priority: Priority);
}

/// Writes notifications to the tracing log.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, title: &str, body: &str, priority: Priority) {
        info!(%priority, title, body, "Notification");
    }
}

/// Publishes to an ntfy-compatible topic over HTTP.
pub struct NtfyNotifier {
    client: Client,
    url: String,
}

impl NtfyNotifier {
    pub fn new(config: &NtfyConfig) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .timeout(Duration::from_secs(NOTIFY_TIMEOUT_SECS))
            .build()?;
        Ok(Self {
            client,
            url: format!("{}/{}", config.server.trim_end_matches('/'), config.topic),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl Notifier for NtfyNotifier {
    async fn send(&self, title: &str, body: &str, priority: Priority) {
        let result = self
            .client
            .post(&self.url)
            .header("Title", title)
            .header("Priority", priority.as_ntfy())
            .body(body.to_string())
            .send()
            .await;

        match result {
            Ok(response) if response.status().is_success() => {
                debug!(title, "Notification delivered");
            }
            Ok(response) => {
                warn!(title, status = %response.status(), "Notification rejected");
            }
            Err(e) => {
                warn!(title, error = %e, "Notification delivery failed");
            }
        }
    }
}

/// Picks the ntfy sink when configured, the log sink otherwise.
pub fn from_config(ntfy: Option<&NtfyConfig>) -> Arc<dyn Notifier> {
    match ntfy.map(NtfyNotifier::new) {
        Some(Ok(notifier)) => Arc::new(notifier),
        Some(Err(e)) => {
            warn!(error = %e, "Failed to build ntfy client, falling back to log notifications");
            Arc::new(LogNotifier)
        }
        None => Arc::new(LogNotifier),
    }
}
