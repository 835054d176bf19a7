use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("Missing Slack webhook URL")]
    MissingWebhook,
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("Slack responded {status}: {body}")]
    Rejected { status: u16, body: String },
}

/// Payload posted to a Slack incoming webhook
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SlackMessage {
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
}

/// Outbound notification transport
#[async_trait]
pub trait Transport: Send + Sync {
    async fn deliver(&self, webhook_url: &str, message: &SlackMessage) -> Result<(), DeliveryError>;
}

/// Posts messages to Slack incoming webhooks
pub struct SlackWebhookTransport {
    client: Client,
}

impl SlackWebhookTransport {
    pub fn new(timeout: Duration) -> anyhow::Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Transport for SlackWebhookTransport {
    async fn deliver(&self, webhook_url: &str, message: &SlackMessage) -> Result<(), DeliveryError> {
        if webhook_url.trim().is_empty() {
            return Err(DeliveryError::MissingWebhook);
        }

        let response = self.client.post(webhook_url).json(message).send().await?;
        let status = response.status();

        if !status.is_success() {
            let body = response.text().await.unwrap_or_else(|_| "Failed to read error body".to_string());
            return Err(DeliveryError::Rejected { status: status.as_u16(), body });
        }

        Ok(())
    }
}
