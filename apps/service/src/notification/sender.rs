use async_trait::async_trait;
use reqwest::Client;
use reqwest::header::CONTENT_TYPE;
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;

use crate::database::models::Webhook;

/// Longest response body quoted back in a rejection error
const MAX_ERROR_BODY: usize = 200;

#[derive(Error, Debug)]
pub enum SenderError {
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("Webhook returned non-success status: {status}. Body: {body}")]
    Rejected { status: u16, body: String },
    #[error("Failed to serialize payload: {0}")]
    Payload(#[from] serde_json::Error),
}

/// Delivers a webhook payload. `Ok` means the endpoint confirmed receipt.
#[async_trait]
pub trait WebhookSender: Send + Sync {
    async fn send(&self, webhook: &Webhook, payload: &Value) -> Result<(), SenderError>;
}

/// POSTs JSON payloads over HTTP
pub struct HttpWebhookSender {
    client: Client,
}

impl HttpWebhookSender {
    pub fn new(timeout: Duration) -> Result<Self, SenderError> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("upwatch/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl WebhookSender for HttpWebhookSender {
    async fn send(&self, webhook: &Webhook, payload: &Value) -> Result<(), SenderError> {
        let body = serde_json::to_vec(payload)?;
        let response = self
            .client
            .post(&webhook.url)
            .header(CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await?;
        let status = response.status();

        if !status.is_success() {
            let body: String = response
                .text()
                .await
                .unwrap_or_else(|_| "Failed to read error body".to_string())
                .chars()
                .take(MAX_ERROR_BODY)
                .collect();
            return Err(SenderError::Rejected { status: status.as_u16(), body });
        }

        Ok(())
    }
}
