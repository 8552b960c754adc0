use std::env;
use std::path::Path;
use std::str::FromStr;

pub enum EnvKey {
    DatabaseUrl,
    DatabaseMaxConnections,
    BrokerUrl,
    WorkerName,
    WorkerMaxAttempts,
    WorkerPollTimeoutSecs,
    WorkerConcurrency,
    WorkerRetryBackoffMs,
    NotifyWebhookUrl,
    NotifyTimeoutSecs,
    NotifySmtpHost,
    NotifySmtpPort,
    NotifySmtpUsername,
    NotifySmtpPassword,
    NotifySmtpTls,
    NotifySmtpFrom,
    HealthPort,
}

impl EnvKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            EnvKey::DatabaseUrl => "DATABASE_URL",
            EnvKey::DatabaseMaxConnections => "DATABASE_MAX_CONNECTIONS",
            EnvKey::BrokerUrl => "BROKER_URL",
            EnvKey::WorkerName => "WORKER_NAME",
            EnvKey::WorkerMaxAttempts => "WORKER_MAX_ATTEMPTS",
            EnvKey::WorkerPollTimeoutSecs => "WORKER_POLL_TIMEOUT_SECS",
            EnvKey::WorkerConcurrency => "WORKER_CONCURRENCY",
            EnvKey::WorkerRetryBackoffMs => "WORKER_RETRY_BACKOFF_MS",
            EnvKey::NotifyWebhookUrl => "NOTIFY_WEBHOOK_URL",
            EnvKey::NotifyTimeoutSecs => "NOTIFY_TIMEOUT_SECS",
            EnvKey::NotifySmtpHost => "NOTIFY_SMTP_HOST",
            EnvKey::NotifySmtpPort => "NOTIFY_SMTP_PORT",
            EnvKey::NotifySmtpUsername => "NOTIFY_SMTP_USERNAME",
            EnvKey::NotifySmtpPassword => "NOTIFY_SMTP_PASSWORD",
            EnvKey::NotifySmtpTls => "NOTIFY_SMTP_TLS",
            EnvKey::NotifySmtpFrom => "NOTIFY_SMTP_FROM",
            EnvKey::HealthPort => "HEALTH_PORT",
        }
    }
}

/// Loads a dotenv-style config file. Variables already present in the
/// process environment are left untouched.
pub fn load_file(path: &Path) -> Result<(), dotenvy::Error> {
    dotenvy::from_path(path)
}

pub fn get(key: EnvKey) -> Result<String, env::VarError> {
    env::var(key.as_str())
}

pub fn get_opt(key: EnvKey) -> Option<String> {
    env::var(key.as_str()).ok().filter(|v| !v.trim().is_empty())
}

pub fn get_or(key: EnvKey, default: &str) -> String {
    env::var(key.as_str()).unwrap_or_else(|_| default.to_string())
}

pub fn get_parsed<T: FromStr>(key: EnvKey, default: T) -> T {
    match get(key) {
        Ok(val) => val.trim().parse::<T>().unwrap_or(default),
        Err(_) => default,
    }
}
