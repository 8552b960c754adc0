use std::time::Duration;

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;
use tracing::debug;

use super::{Notifier, body, subject};
use crate::modules::tracks::events::TrackNotice;

#[derive(Debug, Clone)]
pub struct WebhookConfig {
    pub url: String,
    pub timeout: Duration,
}

/// Posts notices as JSON to a mail relay or chat webhook.
pub struct WebhookNotifier {
    config: WebhookConfig,
    client: Client,
}

impl WebhookNotifier {
    pub fn new(config: WebhookConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| anyhow!("Failed to build webhook client: {}", e))?;

        Ok(Self { config, client })
    }

    fn build_payload(notice: &TrackNotice) -> serde_json::Value {
        json!({
            "user_id": notice.owner.user_id,
            "username": notice.owner.username,
            "email": notice.owner.email,
            "track_id": notice.track_id,
            "status": notice.status.to_string(),
            "subject": subject(notice),
            "body": body(notice),
        })
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(&self, notice: &TrackNotice) -> Result<()> {
        let response = self
            .client
            .post(&self.config.url)
            .json(&Self::build_payload(notice))
            .send()
            .await
            .map_err(|e| anyhow!("Webhook request failed: {}", e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(anyhow!("Webhook responded with {}", status));
        }

        debug!("Webhook accepted notice for track {}", notice.track_id);
        Ok(())
    }
}
