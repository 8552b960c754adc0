use std::time::Duration;

use thiserror::Error;
use tracing::{info, warn};

use crate::config::env::{self, EnvKey};
use crate::infrastructure::notify::{EmailConfig, NotifyConfig, WebhookConfig};
use crate::workers::WorkerConfig;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required config key {0}")]
    Missing(&'static str),

    #[error("failed to load config file: {0}")]
    File(#[from] dotenvy::Error),
}

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database_url: String,
    pub database_max_connections: u32,
    pub broker_url: String,
    pub worker_name: String,
    pub worker_max_attempts: u32,
    pub worker_poll_timeout_secs: u64,
    pub worker_concurrency: usize,
    pub worker_retry_backoff_ms: u64,
    pub notify_webhook_url: Option<String>,
    pub notify_timeout_secs: u64,
    pub notify_smtp_host: Option<String>,
    pub notify_smtp_port: u16,
    pub notify_smtp_username: Option<String>,
    pub notify_smtp_password: Option<String>,
    pub notify_smtp_tls: bool,
    pub notify_smtp_from: Option<String>,
    pub health_port: Option<u16>,
}

impl AppConfig {
    pub fn new() -> Result<Self, ConfigError> {
        let defaults = WorkerConfig::default();

        Ok(Self {
            database_url: required(EnvKey::DatabaseUrl)?,
            database_max_connections: env::get_parsed(EnvKey::DatabaseMaxConnections, 10),
            broker_url: required(EnvKey::BrokerUrl)?,
            worker_name: env::get_or(
                EnvKey::WorkerName,
                &format!("worker-{}", std::process::id()),
            ),
            worker_max_attempts: env::get_parsed(EnvKey::WorkerMaxAttempts, defaults.max_attempts),
            worker_poll_timeout_secs: env::get_parsed(
                EnvKey::WorkerPollTimeoutSecs,
                defaults.poll_timeout.as_secs(),
            ),
            worker_concurrency: env::get_parsed(EnvKey::WorkerConcurrency, defaults.concurrency),
            worker_retry_backoff_ms: env::get_parsed(
                EnvKey::WorkerRetryBackoffMs,
                u64::try_from(defaults.retry_backoff.as_millis()).unwrap_or(u64::MAX),
            ),
            notify_webhook_url: env::get_opt(EnvKey::NotifyWebhookUrl),
            notify_timeout_secs: env::get_parsed(EnvKey::NotifyTimeoutSecs, 10),
            notify_smtp_host: env::get_opt(EnvKey::NotifySmtpHost),
            notify_smtp_port: env::get_parsed(EnvKey::NotifySmtpPort, 587),
            notify_smtp_username: env::get_opt(EnvKey::NotifySmtpUsername),
            notify_smtp_password: env::get_opt(EnvKey::NotifySmtpPassword),
            notify_smtp_tls: env::get_parsed(EnvKey::NotifySmtpTls, true),
            notify_smtp_from: env::get_opt(EnvKey::NotifySmtpFrom),
            health_port: env::get_opt(EnvKey::HealthPort).and_then(|p| p.trim().parse().ok()),
        })
    }

    /// Loads `path` into the environment, then reads the configuration.
    /// A missing file is not an error; the environment alone may be enough.
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        match env::load_file(path) {
            Ok(()) => info!("Loaded config from {}", path.display()),
            Err(dotenvy::Error::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!("Config file {} not found, using the environment", path.display());
            }
            Err(e) => return Err(e.into()),
        }
        Self::new()
    }

    /// Email is enabled once both an SMTP host and a sender are set.
    pub fn notify_config(&self) -> NotifyConfig {
        let timeout = Duration::from_secs(self.notify_timeout_secs.max(1));

        let webhook = self.notify_webhook_url.as_ref().map(|url| WebhookConfig {
            url: url.clone(),
            timeout,
        });

        let email = match (&self.notify_smtp_host, &self.notify_smtp_from) {
            (Some(host), Some(from)) => Some(EmailConfig {
                smtp_host: host.clone(),
                smtp_port: self.notify_smtp_port,
                smtp_username: self.notify_smtp_username.clone(),
                smtp_password: self.notify_smtp_password.clone(),
                use_tls: self.notify_smtp_tls,
                from_address: from.clone(),
                timeout,
            }),
            (Some(host), None) => {
                warn!(
                    "{} is set to {} but {} is missing, email notices are off",
                    EnvKey::NotifySmtpHost.as_str(),
                    host,
                    EnvKey::NotifySmtpFrom.as_str()
                );
                None
            }
            _ => None,
        };

        NotifyConfig { webhook, email }
    }

    pub fn worker_config(&self) -> WorkerConfig {
        WorkerConfig {
            max_attempts: self.worker_max_attempts.max(1),
            poll_timeout: Duration::from_secs(self.worker_poll_timeout_secs.max(1)),
            concurrency: self.worker_concurrency.max(1),
            retry_backoff: Duration::from_millis(self.worker_retry_backoff_ms),
            ..WorkerConfig::default()
        }
    }
}

fn required(key: EnvKey) -> Result<String, ConfigError> {
    let name = key.as_str();
    env::get_opt(key).ok_or(ConfigError::Missing(name))
}
