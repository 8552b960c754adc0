//! Notification gateway.
//!
//! Notices are best-effort: callers log failures and move on.

use std::sync::Arc;

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use tracing::{info, warn};

use crate::modules::tracks::events::TrackNotice;
use crate::modules::tracks::model::TrackStatus;

pub mod email;
pub mod webhook;

pub use email::{EmailConfig, EmailNotifier};
pub use webhook::{WebhookConfig, WebhookNotifier};

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, notice: &TrackNotice) -> Result<()>;
}

/// Subject line for a notice.
pub fn subject(notice: &TrackNotice) -> String {
    match notice.status {
        TrackStatus::Done => format!("Your track #{} is ready", notice.track_id),
        TrackStatus::Failed => format!("Processing of your track #{} failed", notice.track_id),
        other => format!("Your track #{} is {}", notice.track_id, other),
    }
}

/// Plain-text body for a notice.
pub fn body(notice: &TrackNotice) -> String {
    let detail = match notice.status {
        TrackStatus::Done => "It has been processed and is now available to listeners.",
        TrackStatus::Failed => {
            "We could not process the uploaded file. Please check the file and upload it again."
        }
        _ => "Its processing status changed.",
    };
    format!(
        "Hello {},\n\n{}\n\nTrack: #{}\nStatus: {}\n",
        notice.owner.username, detail, notice.track_id, notice.status
    )
}

/// Writes notices to the log. Used when no delivery channel is configured.
#[derive(Debug, Default, Clone)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, notice: &TrackNotice) -> Result<()> {
        info!(
            user_id = notice.owner.user_id,
            track_id = notice.track_id,
            status = %notice.status,
            "📨 {}",
            subject(notice)
        );
        Ok(())
    }
}

/// Sends every notice through each channel in turn.
/// Fails only when no channel delivered.
pub struct FanOutNotifier {
    channels: Vec<(&'static str, Arc<dyn Notifier>)>,
}

impl FanOutNotifier {
    pub fn new(channels: Vec<(&'static str, Arc<dyn Notifier>)>) -> Self {
        Self { channels }
    }
}

#[async_trait]
impl Notifier for FanOutNotifier {
    async fn notify(&self, notice: &TrackNotice) -> Result<()> {
        let mut delivered = 0;
        for (name, channel) in &self.channels {
            match channel.notify(notice).await {
                Ok(()) => delivered += 1,
                Err(e) => warn!("⚠️ {} channel failed for track {}: {:#}", name, notice.track_id, e),
            }
        }

        if delivered == 0 && !self.channels.is_empty() {
            return Err(anyhow!("No notification channel delivered the notice"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub struct NotifyConfig {
    pub webhook: Option<WebhookConfig>,
    pub email: Option<EmailConfig>,
}

/// Builds the configured channels; notices are only logged when none is set.
pub fn from_config(config: NotifyConfig) -> Result<Arc<dyn Notifier>> {
    let mut channels: Vec<(&'static str, Arc<dyn Notifier>)> = Vec::new();

    if let Some(webhook) = config.webhook {
        let url = webhook.url.clone();
        channels.push(("webhook", Arc::new(WebhookNotifier::new(webhook)?)));
        info!("✅ Notifications go to webhook {}", url);
    }

    if let Some(email) = config.email {
        let relay = format!("{}:{}", email.smtp_host, email.smtp_port);
        channels.push(("email", Arc::new(EmailNotifier::new(email)?)));
        info!("✅ Notifications go out by email via {}", relay);
    }

    match channels.len() {
        0 => {
            info!("No notification channel configured, notices are logged only");
            Ok(Arc::new(LogNotifier))
        }
        1 => Ok(channels.remove(0).1),
        _ => Ok(Arc::new(FanOutNotifier::new(channels))),
    }
}
