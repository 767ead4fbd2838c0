use async_trait::async_trait;
use once_cell::sync::OnceCell;
use serde::Serialize;
use tracing::error;

use super::{check_status, Notification, NotificationSender, NotifyError};

#[derive(Debug, Serialize)]
struct Message<'a> {
    blocks: Vec<Block<'a>>,
}

#[derive(Debug, Serialize)]
struct Block<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    text: Text<'a>,
    #[serde(skip_serializing_if = "Option::is_none")]
    accessory: Option<Accessory<'a>>,
}

#[derive(Debug, Serialize)]
struct Text<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    text: &'a str,
}

#[derive(Debug, Serialize)]
struct Accessory<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    image_url: &'a str,
    alt_text: &'a str,
}

/// Posts a single `mrkdwn` section block to a Slack incoming webhook
pub struct SlackNotifier {
    webhook_url: String,
    client: OnceCell<reqwest::Client>,
}

impl SlackNotifier {
    pub fn new(webhook_url: impl Into<String>) -> Self {
        Self {
            webhook_url: webhook_url.into(),
            client: OnceCell::new(),
        }
    }
}

fn message(notification: &Notification) -> Message<'_> {
    let accessory = notification.image.as_deref().filter(|i| !i.is_empty()).map(|image| Accessory {
        kind: "image",
        image_url: image,
        alt_text: notification.image_alt.as_deref().unwrap_or_default(),
    });
    Message {
        blocks: vec![Block {
            kind: "section",
            text: Text {
                kind: "mrkdwn",
                text: &notification.text,
            },
            accessory,
        }],
    }
}

#[async_trait]
impl NotificationSender for SlackNotifier {
    async fn send(&self, notification: Notification) -> Result<(), NotifyError> {
        let client = self.client.get_or_init(reqwest::Client::new);
        let result = client
            .post(&self.webhook_url)
            .json(&message(&notification))
            .send()
            .await
            .map_err(NotifyError::from)
            .and_then(check_status);

        if let Err(e) = &result {
            error!("failed to send slack message -- {}", e);
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;
    use serde_json::json;

    #[test]
    fn image_becomes_accessory() {
        let n = Notification::text("*deployed*").with_image("https://img/x.png", "x");
        let body = serde_json::to_value(message(&n)).unwrap();
        assert_eq!(
            body,
            json!({
                "blocks": [{
                    "type": "section",
                    "text": { "type": "mrkdwn", "text": "*deployed*" },
                    "accessory": { "type": "image", "image_url": "https://img/x.png", "alt_text": "x" }
                }]
            })
        );
    }

    #[tokio::test]
    async fn posts_blocks_to_webhook() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/hook")
            .match_body(Matcher::PartialJson(json!({
                "blocks": [{ "type": "section", "text": { "text": "hello" } }]
            })))
            .with_status(200)
            .create_async()
            .await;

        let sender = SlackNotifier::new(format!("{}/hook", server.url()));
        sender.send(Notification::text("hello")).await.unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn non_success_status_is_an_error() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server.mock("POST", "/hook").with_status(500).create_async().await;

        let sender = SlackNotifier::new(format!("{}/hook", server.url()));
        let err = sender.send(Notification::text("hello")).await.unwrap_err();
        assert!(matches!(err, NotifyError::Status(s) if s.as_u16() == 500));
    }
}
