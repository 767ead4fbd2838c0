use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::config::NotificationConfig;

pub mod discord;
pub mod slack;

pub use discord::DiscordNotifier;
pub use slack::SlackNotifier;

/// Outbound message for a chat webhook
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub text: String,
    pub user: Option<String>,
    pub image: Option<String>,
    pub image_alt: Option<String>,
}

impl Notification {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Default::default()
        }
    }

    pub fn with_image(mut self, url: impl Into<String>, alt: impl Into<String>) -> Self {
        self.image = Some(url.into());
        self.image_alt = Some(alt.into());
        self
    }
}

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("webhook request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("webhook answered with status {0}")]
    Status(reqwest::StatusCode),
}

#[async_trait]
pub trait NotificationSender: Send + Sync {
    async fn send(&self, notification: Notification) -> Result<(), NotifyError>;
}

/// Used when no webhook is configured
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopNotifier;

#[async_trait]
impl NotificationSender for NoopNotifier {
    async fn send(&self, _notification: Notification) -> Result<(), NotifyError> {
        warn!("no notifications manager found, skipping notification");
        Ok(())
    }
}

/// Discord wins over Slack when both webhooks are set
pub fn from_config(config: &NotificationConfig) -> Arc<dyn NotificationSender> {
    if let Some(url) = non_blank(config.discord_webhook.as_deref()) {
        info!("discord webhook configured");
        return Arc::new(DiscordNotifier::new(url));
    }
    info!("no discord webhook found, skipping discord integration");

    if let Some(url) = non_blank(config.slack_webhook.as_deref()) {
        info!("slack webhook configured");
        return Arc::new(SlackNotifier::new(url));
    }
    info!("no slack webhook found, skipping slack integration");

    Arc::new(NoopNotifier)
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

pub(crate) fn check_status(response: reqwest::Response) -> Result<(), NotifyError> {
    let status = response.status();
    if status.is_success() {
        Ok(())
    } else {
        Err(NotifyError::Status(status))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn noop_sender_accepts_everything() {
        assert!(NoopNotifier.send(Notification::text("hi")).await.is_ok());
    }

    #[test]
    fn blank_webhooks_are_ignored() {
        assert_eq!(non_blank(Some("  ")), None);
        assert_eq!(non_blank(Some(" https://x ")), Some("https://x"));
        assert_eq!(non_blank(None), None);
    }
}
