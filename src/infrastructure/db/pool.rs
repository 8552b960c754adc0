use std::str::FromStr;
use std::time::Duration;

use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::{ConnectOptions, Pool, Postgres};
use tracing::info;
use tracing::log::LevelFilter;

pub type DbPool = Pool<Postgres>;

/// Opens the track database. A worker holds at most one transaction per
/// loop, so a small pool is enough.
pub async fn connect_to_db(connection_string: &str, max_connections: u32) -> Result<DbPool, sqlx::Error> {
    let options = PgConnectOptions::from_str(connection_string)?
        .log_statements(LevelFilter::Debug)
        .log_slow_statements(LevelFilter::Warn, Duration::from_secs(2));

    let pool = PgPoolOptions::new()
        .max_connections(max_connections.max(1))
        .min_connections(1)
        .acquire_timeout(Duration::from_secs(5))
        .idle_timeout(Duration::from_secs(600))
        .connect_with(options)
        .await?;

    info!("✅ Connected to PostgreSQL (max {} connections)", max_connections.max(1));
    Ok(pool)
}
