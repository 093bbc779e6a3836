//! Alert delivery.
//!
//! Delivery is best-effort. The scheduler hands each [`AlertEvent`] to an
//! [`AlertSink`] off the sweep path and only logs failures.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tracing::info;

use rpcwatch_core::Endpoint;
use rpcwatch_state::Status;

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("failed to build http client: {0}")]
    Client(String),

    #[error("webhook request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("webhook rejected alert ({status}): {body}")]
    Rejected { status: u16, body: String },
}

/// An endpoint has just failed twice in a row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlertEvent {
    pub endpoint: Endpoint,
    /// The status of the probe that triggered the alert.
    pub status: Status,
    /// Sweep timestamp (unix seconds).
    pub ts: u64,
}

impl AlertEvent {
    /// Plain-text message body: chain and node, target, then the status.
    pub fn message(&self) -> String {
        format!(
            "{} {}\n{}\n{}",
            self.endpoint.chain, self.endpoint.name, self.endpoint.target, self.status
        )
    }
}

#[async_trait]
pub trait AlertSink: Send + Sync {
    async fn notify(&self, event: &AlertEvent) -> Result<(), NotifyError>;
}

/// Used when no webhook is configured; the alert is only logged.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSink;

#[async_trait]
impl AlertSink for NoopSink {
    async fn notify(&self, event: &AlertEvent) -> Result<(), NotifyError> {
        info!(endpoint = %event.endpoint, status = %event.status, "alert raised (no webhook configured)");
        Ok(())
    }
}

/// Lark / Feishu custom bot webhook.
#[derive(Debug, Clone)]
pub struct LarkWebhook {
    client: reqwest::Client,
    url: String,
}

impl LarkWebhook {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, NotifyError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| NotifyError::Client(e.to_string()))?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }

    pub fn payload(event: &AlertEvent) -> serde_json::Value {
        serde_json::json!({
            "msg_type": "text",
            "content": { "text": event.message() },
        })
    }
}

#[async_trait]
impl AlertSink for LarkWebhook {
    async fn notify(&self, event: &AlertEvent) -> Result<(), NotifyError> {
        let response = self
            .client
            .post(&self.url)
            .json(&Self::payload(event))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(NotifyError::Rejected {
                status: status.as_u16(),
                body,
            });
        }
        info!(endpoint = %event.endpoint, "alert delivered");
        Ok(())
    }
}
