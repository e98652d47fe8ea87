//! Operator alerting over a chat webhook.

use async_trait::async_trait;
use gridline_broker::Notifier;
use reqwest::Client;
use serde_json::json;
use tracing::{error, warn};

/// Fire-and-forget webhook sender. Delivery failures are logged and
/// swallowed; alerting never blocks the trading loop.
#[derive(Clone)]
pub struct AlertDispatcher {
    client: Client,
    webhook: Option<String>,
}

impl AlertDispatcher {
    pub fn new(webhook: Option<String>) -> Self {
        Self {
            client: Client::builder().build().expect("reqwest client"),
            webhook: sanitize_webhook(webhook),
        }
    }

    pub async fn send(&self, message: &str) {
        warn!(%message, "alert raised");
        let Some(url) = self.webhook.as_ref() else {
            return;
        };
        let payload = json!({ "message": message });
        if let Err(err) = self.client.post(url).json(&payload).send().await {
            error!(error = %err, "failed to send alert webhook");
        }
    }
}

#[async_trait]
impl Notifier for AlertDispatcher {
    async fn notify(&self, message: &str) {
        self.send(message).await;
    }
}

pub fn sanitize_webhook(input: Option<String>) -> Option<String> {
    input.and_then(|value| {
        let trimmed = value.trim().to_string();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed)
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_webhooks_are_treated_as_absent() {
        assert_eq!(sanitize_webhook(None), None);
        assert_eq!(sanitize_webhook(Some("   ".into())), None);
        assert_eq!(
            sanitize_webhook(Some(" https://hooks.example/x ".into())),
            Some("https://hooks.example/x".into())
        );
    }

    #[tokio::test]
    async fn unconfigured_dispatcher_is_a_no_op() {
        let dispatcher = AlertDispatcher::new(None);
        dispatcher.send("nothing listens").await;
    }
}
