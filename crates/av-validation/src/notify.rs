//! Outcome notifications.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::aggregate::{FileFailures, PackageVerdict, Verdict};
use crate::config::SERVICE_NAME;
use crate::disposition::DispositionState;
use crate::error::ErrorKind;
use crate::package::MediaType;
use crate::retry::Transient;

/// Message published once per package run.
///
/// `message_id` is fixed when the notification is built, so redelivery after a
/// retry carries the same id.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Notification {
    pub message_id: Uuid,
    pub service: String,
    pub environment: String,
    /// Package identifier as derived from the source key (may be invalid).
    pub refid: String,
    pub media_type: MediaType,
    pub verdict: Verdict,
    /// `SUCCESS` or `FAILURE`.
    pub outcome: String,
    pub disposition: DispositionState,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub error_details: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failures: Vec<FileFailures>,
    pub timestamp: DateTime<Utc>,
}

impl Notification {
    pub fn for_package(
        environment: &str,
        refid: &str,
        media_type: MediaType,
        verdict: &PackageVerdict,
        disposition: DispositionState,
    ) -> Self {
        Self {
            message_id: Uuid::new_v4(),
            service: SERVICE_NAME.to_string(),
            environment: environment.to_string(),
            refid: refid.to_string(),
            media_type,
            verdict: verdict.verdict,
            outcome: verdict.verdict.outcome_label().to_string(),
            disposition,
            message: verdict.message.clone(),
            error_kind: verdict.error_kind(),
            error_details: verdict.error_details(),
            failures: verdict.failures(),
            timestamp: Utc::now(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("notification transport failed: {0}")]
    Transport(String),

    #[error("notification rejected with status {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("notification {operation} timed out after {timeout_ms}ms")]
    Timeout { operation: String, timeout_ms: u64 },

    #[error("failed to encode notification: {0}")]
    Encode(#[from] serde_json::Error),
}

impl Transient for NotifyError {
    fn is_transient(&self) -> bool {
        match self {
            NotifyError::Transport(_) | NotifyError::Timeout { .. } => true,
            NotifyError::Rejected { status, .. } => *status == 429 || *status >= 500,
            NotifyError::Encode(_) => false,
        }
    }

    fn timed_out(operation: &str, timeout_ms: u64) -> Self {
        NotifyError::Timeout {
            operation: operation.to_string(),
            timeout_ms,
        }
    }
}

impl From<reqwest::Error> for NotifyError {
    fn from(err: reqwest::Error) -> Self {
        NotifyError::Transport(err.to_string())
    }
}

/// Delivery of notifications. At-least-once: callers may retry.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn publish(&self, notification: &Notification) -> Result<(), NotifyError>;
}

/// POSTs the notification as JSON to a webhook endpoint.
pub struct WebhookNotifier {
    url: String,
    http_client: reqwest::Client,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, NotifyError> {
        let http_client = reqwest::Client::builder()
            .user_agent(concat!("av-validation/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()?;
        Ok(Self {
            url: url.into(),
            http_client,
        })
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn publish(&self, notification: &Notification) -> Result<(), NotifyError> {
        let response = self
            .http_client
            .post(&self.url)
            .header("X-Message-Id", notification.message_id.to_string())
            .json(notification)
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
        Ok(())
    }
}

/// Emits the notification as a structured tracing event.
#[derive(Debug, Default, Clone)]
pub struct LogNotifier {
    channel: String,
}

impl LogNotifier {
    pub fn new(channel: impl Into<String>) -> Self {
        Self {
            channel: channel.into(),
        }
    }
}

#[async_trait]
impl Notifier for LogNotifier {
    async fn publish(&self, notification: &Notification) -> Result<(), NotifyError> {
        let body = serde_json::to_string(notification)?;
        info!(
            event = "notification.published",
            channel = %self.channel,
            message_id = %notification.message_id,
            refid = %notification.refid,
            outcome = %notification.outcome,
            body = %body,
        );
        Ok(())
    }
}
