use async_trait::async_trait;
use once_cell::sync::OnceCell;
use serde_json::json;
use tracing::error;

use super::{check_status, Notification, NotificationSender, NotifyError};

/// Posts `{content}` to a Discord webhook
pub struct DiscordNotifier {
    webhook_url: String,
    client: OnceCell<reqwest::Client>,
}

impl DiscordNotifier {
    pub fn new(webhook_url: impl Into<String>) -> Self {
        Self {
            webhook_url: webhook_url.into(),
            client: OnceCell::new(),
        }
    }
}

#[async_trait]
impl NotificationSender for DiscordNotifier {
    async fn send(&self, notification: Notification) -> Result<(), NotifyError> {
        let client = self.client.get_or_init(reqwest::Client::new);
        let result = client
            .post(&self.webhook_url)
            .json(&json!({ "content": notification.text }))
            .send()
            .await
            .map_err(NotifyError::from)
            .and_then(check_status);

        if let Err(e) = &result {
            error!("failed to send discord message -- {}", e);
        }
        result
    }
}
