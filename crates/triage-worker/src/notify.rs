//! Outbound notification boundary — best-effort, fire-and-forget.
//!
//! Delivery failures are logged and never retried: notifications must not be
//! able to stall or fail a ticket pipeline.

use async_trait::async_trait;
use serde_json::json;
use tracing::{debug, info, warn};

/// Timeout for a single webhook delivery.
const DELIVERY_TIMEOUT_SECS: u64 = 5;

/// Best-effort notification sink.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn deliver(&self, text: &str);
}

/// Webhook sink posting `{content, username}` JSON, Slack/Discord style.
pub struct WebhookSink {
    client: reqwest::Client,
    url: String,
    username: String,
}

impl WebhookSink {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
            username: "Triage Bot".to_string(),
        }
    }
}

#[async_trait]
impl NotificationSink for WebhookSink {
    async fn deliver(&self, text: &str) {
        let payload = json!({
            "content": text,
            "username": self.username,
        });
        let result = self
            .client
            .post(&self.url)
            .timeout(std::time::Duration::from_secs(DELIVERY_TIMEOUT_SECS))
            .json(&payload)
            .send()
            .await;

        match result {
            Ok(resp) => info!(status = %resp.status(), "webhook delivered"),
            Err(e) => warn!(error = %e, "webhook delivery failed"),
        }
    }
}

/// Sink used when no webhook is configured; drops notifications with a
/// debug-level trace.
pub struct NullSink;

#[async_trait]
impl NotificationSink for NullSink {
    async fn deliver(&self, text: &str) {
        debug!(preview = %text.lines().next().unwrap_or(""), "notification dropped (no sink configured)");
    }
}
