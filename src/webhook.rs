use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use tracing::{debug, warn};
use url::Url;

/// Destination for rendered report messages.
#[async_trait]
pub trait Publish: Send + Sync {
    /// Deliver one message. Returns `true` on success; failures are logged
    /// by the implementation and never retried.
    async fn publish(&self, content: &str) -> bool;
}

/// Discord-style webhook: POST `{"content": ...}`, 200 or 204 means delivered.
pub struct WebhookPublisher {
    client: Client,
    url: Url,
}

impl WebhookPublisher {
    pub fn new(url: Url) -> Self {
        Self {
            client: Client::new(),
            url,
        }
    }
}

/// Statuses the webhook answers with on successful delivery.
pub fn is_delivered(status: StatusCode) -> bool {
    status == StatusCode::OK || status == StatusCode::NO_CONTENT
}

#[async_trait]
impl Publish for WebhookPublisher {
    async fn publish(&self, content: &str) -> bool {
        let payload = serde_json::json!({ "content": content });
        match self.client.post(self.url.clone()).json(&payload).send().await {
            Ok(resp) => {
                let status = resp.status();
                if is_delivered(status) {
                    debug!("Webhook accepted message ({status})");
                    true
                } else {
                    warn!("Webhook error: status {status}");
                    if let Ok(text) = resp.text().await {
                        debug!("Webhook response: {text}");
                    }
                    false
                }
            }
            Err(e) => {
                warn!("Failed to send webhook message: {e}");
                false
            }
        }
    }
}

/// Publishes every message in order, returning how many were delivered.
pub async fn publish_all(publisher: &dyn Publish, messages: &[String]) -> usize {
    let mut delivered = 0;
    for msg in messages {
        if publisher.publish(msg).await {
            delivered += 1;
        }
    }
    delivered
}
