use std::time::Duration;

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use lettre::message::{Mailbox, header::ContentType};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Address, AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use tracing::debug;

use super::{Notifier, body, subject};
use crate::modules::tracks::events::TrackNotice;

/// SMTP relay settings.
#[derive(Debug, Clone)]
pub struct EmailConfig {
    pub smtp_host: String,
    pub smtp_port: u16,
    pub smtp_username: Option<String>,
    pub smtp_password: Option<String>,
    /// STARTTLS; plain SMTP when off.
    pub use_tls: bool,
    pub from_address: String,
    pub timeout: Duration,
}

/// Mails notices to the track owner's address.
pub struct EmailNotifier {
    from: Mailbox,
    transport: AsyncSmtpTransport<Tokio1Executor>,
}

impl EmailNotifier {
    pub fn new(config: EmailConfig) -> Result<Self> {
        let from: Mailbox = config
            .from_address
            .parse()
            .map_err(|e| anyhow!("Invalid sender address '{}': {}", config.from_address, e))?;

        let mut builder = if config.use_tls {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.smtp_host)
                .map_err(|e| anyhow!("Failed to set up SMTP relay {}: {}", config.smtp_host, e))?
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&config.smtp_host)
        };
        builder = builder
            .port(config.smtp_port)
            .timeout(Some(config.timeout));

        if let (Some(username), Some(password)) = (&config.smtp_username, &config.smtp_password) {
            builder = builder.credentials(Credentials::new(username.clone(), password.clone()));
        }

        Ok(Self {
            from,
            transport: builder.build(),
        })
    }

    fn build_message(&self, notice: &TrackNotice) -> Result<Message> {
        let email = notice
            .owner
            .email
            .as_deref()
            .ok_or_else(|| anyhow!("User {} has no email address", notice.owner.username))?;
        let address: Address = email
            .parse()
            .map_err(|e| anyhow!("Invalid address '{}' for user {}: {}", email, notice.owner.username, e))?;

        Message::builder()
            .from(self.from.clone())
            .to(Mailbox::new(Some(notice.owner.username.clone()), address))
            .subject(subject(notice))
            .header(ContentType::TEXT_PLAIN)
            .body(body(notice))
            .map_err(|e| anyhow!("Failed to build email: {}", e))
    }
}

#[async_trait]
impl Notifier for EmailNotifier {
    async fn notify(&self, notice: &TrackNotice) -> Result<()> {
        let message = self.build_message(notice)?;

        self.transport
            .send(message)
            .await
            .map_err(|e| anyhow!("SMTP delivery failed: {}", e))?;

        debug!("Mailed notice for track {} to user {}", notice.track_id, notice.owner.user_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::tracks::model::{TrackOwner, TrackStatus};

    fn notifier() -> EmailNotifier {
        EmailNotifier::new(EmailConfig {
            smtp_host: "localhost".to_string(),
            smtp_port: 2525,
            smtp_username: None,
            smtp_password: None,
            use_tls: false,
            from_address: "Tracks <noreply@example.org>".to_string(),
            timeout: Duration::from_secs(1),
        })
        .unwrap()
    }

    fn notice(email: Option<&str>) -> TrackNotice {
        TrackNotice {
            owner: TrackOwner {
                user_id: 3,
                username: "dashie".to_string(),
                email: email.map(str::to_string),
            },
            track_id: 42,
            status: TrackStatus::Done,
        }
    }

    #[test]
    fn message_goes_to_the_owner() {
        let message = notifier()
            .build_message(&notice(Some("dashie@example.org")))
            .unwrap();
        let raw = String::from_utf8(message.formatted()).unwrap();

        assert!(raw.contains("dashie@example.org"));
        assert!(raw.contains("noreply@example.org"));
        assert!(raw.contains("Subject: Your track #42 is ready"));
        assert!(raw.contains("Hello dashie"));
    }

    #[test]
    fn owner_without_email_is_an_error() {
        assert!(notifier().build_message(&notice(None)).is_err());
    }

    #[test]
    fn rejects_invalid_sender() {
        let result = EmailNotifier::new(EmailConfig {
            smtp_host: "localhost".to_string(),
            smtp_port: 25,
            smtp_username: None,
            smtp_password: None,
            use_tls: false,
            from_address: "not an address".to_string(),
            timeout: Duration::from_secs(1),
        });
        assert!(result.is_err());
    }
}
