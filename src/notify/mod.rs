//! Escalation notifications.
//!
//! Fired exactly once per task when the retry sweeper exhausts a task's
//! retry budget. Delivery failures are logged and never fail the sweep.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use tracing::{error, info};

/// Structured escalation payload sent to the alerting sink.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Notification {
    pub message: String,
    pub task_type: String,
    pub file_key: String,
    pub last_retry_timestamp: String,
    pub severity: String,
}

impl Notification {
    pub fn retry_exhausted(file_key: &str, max_retries: u32, at: DateTime<Utc>) -> Self {
        Self {
            message: format!(
                "Transcript processing failed after {} attempts",
                max_retries
            ),
            task_type: "Transcript".to_string(),
            file_key: file_key.to_string(),
            last_retry_timestamp: at.to_rfc3339_opts(SecondsFormat::Millis, true),
            severity: "worker_error".to_string(),
        }
    }
}

/// Alerting sink for exhausted tasks.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn escalate(&self, notification: &Notification) -> Result<()>;
}

/// Posts the escalation payload to a configured webhook.
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.to_string(),
        }
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn escalate(&self, notification: &Notification) -> Result<()> {
        let response = self
            .client
            .post(&self.url)
            .json(notification)
            .send()
            .await
            .context("Failed to send escalation webhook")?;

        if !response.status().is_success() {
            anyhow::bail!(
                "Escalation webhook returned {} for {}",
                response.status(),
                notification.file_key
            );
        }

        info!("Escalation delivered for '{}'", notification.file_key);
        Ok(())
    }
}

/// Fallback sink for local runs without a webhook configured.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn escalate(&self, notification: &Notification) -> Result<()> {
        error!(
            "[ALERT] Max retries reached for '{}': {}",
            notification.file_key, notification.message
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_exhausted_payload() {
        let at = "2024-03-01T10:00:00Z".parse().unwrap();
        let notification = Notification::retry_exhausted("raw_combined/a.tar", 4, at);

        assert_eq!(notification.file_key, "raw_combined/a.tar");
        assert_eq!(notification.task_type, "Transcript");
        assert_eq!(notification.severity, "worker_error");
        assert!(notification.message.contains("4 attempts"));
        assert!(notification.last_retry_timestamp.starts_with("2024-03-01T10:00:00"));
    }

    #[test]
    fn test_payload_serializes_expected_fields() {
        let notification = Notification::retry_exhausted("k.tar", 4, Utc::now());
        let json = serde_json::to_value(&notification).unwrap();

        for field in [
            "message",
            "task_type",
            "file_key",
            "last_retry_timestamp",
            "severity",
        ] {
            assert!(json.get(field).is_some(), "missing field {}", field);
        }
    }

    #[tokio::test]
    async fn test_log_notifier_always_succeeds() {
        let notification = Notification::retry_exhausted("k.tar", 4, Utc::now());
        assert!(LogNotifier.escalate(&notification).await.is_ok());
    }
}
