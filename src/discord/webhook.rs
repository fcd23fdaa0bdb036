use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Serialize;
use tracing::debug;

use crate::relay::{DeliveryError, OutboundSink, OutboundUnit};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug, Serialize)]
struct WebhookPayload<'a> {
    username: &'a str,
    content: &'a str,
    allowed_mentions: AllowedMentions,
}

/// Only user mentions ping; `@everyone` and role mentions relayed from IRC
/// stay inert.
#[derive(Debug, Serialize)]
struct AllowedMentions {
    parse: [&'static str; 1],
}

/// Posts relayed messages through the per-channel webhooks, so each one
/// shows up under the IRC sender's nick.
pub struct WebhookSink {
    http: reqwest::Client,
}

impl WebhookSink {
    pub fn new() -> reqwest::Result<Self> {
        let http = reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self { http })
    }
}

#[async_trait]
impl OutboundSink for WebhookSink {
    async fn deliver(&self, unit: &OutboundUnit) -> Result<(), DeliveryError> {
        let OutboundUnit::DiscordWebhook {
            webhook_url,
            username,
            content,
        } = unit
        else {
            return Err(DeliveryError::Rejected(format!(
                "discord cannot deliver a unit for {}",
                unit.destination()
            )));
        };

        let payload = WebhookPayload {
            username,
            content,
            allowed_mentions: AllowedMentions { parse: ["users"] },
        };
        let response = self
            .http
            .post(webhook_url.as_str())
            .json(&payload)
            .send()
            .await
            .map_err(|err| DeliveryError::Transient(err.without_url().to_string()))?;

        let status = response.status();
        if status.is_success() {
            debug!(%status, "webhook accepted message");
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        Err(classify_failure(status, &body))
    }
}

fn classify_failure(status: StatusCode, body: &str) -> DeliveryError {
    let detail = format!("webhook returned {status}: {}", body.trim());
    if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        DeliveryError::Transient(detail)
    } else {
        DeliveryError::Rejected(detail)
    }
}
