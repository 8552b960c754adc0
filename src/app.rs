use std::sync::Arc;

use anyhow::{Result, anyhow};
use axum::Router;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::config::settings::AppConfig;
use crate::infrastructure::db::pool::connect_to_db;
use crate::infrastructure::queue::{self, JobEnvelope, QueueClient};
use crate::infrastructure::notify;
use crate::modules::tracks::events::{TRANSCODING_INFOS_QUEUE, TranscodingInfo};
use crate::modules::tracks::repository::PgTrackStore;
use crate::state::AppState;
use crate::workers::{HandlerRegistry, Worker};

pub fn create_app(state: AppState) -> Router {
    crate::routes::configure_routes()
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Connects every backend named in `config`.
pub async fn build_state(config: AppConfig) -> Result<AppState> {
    let pool = connect_to_db(&config.database_url, config.database_max_connections)
        .await
        .map_err(|e| anyhow!("Failed to connect to database: {}", e))?;
    let store = Arc::new(PgTrackStore::new(pool));

    let queue = connect_broker(&config).await?;

    let notifier = notify::from_config(config.notify_config())?;

    Ok(AppState::new(config, queue, store, notifier))
}

pub async fn connect_broker(config: &AppConfig) -> Result<Arc<dyn QueueClient>> {
    queue::connect(&config.broker_url, &config.worker_name, config.worker_concurrency).await
}

/// Serves the health probe until `stop` fires.
pub async fn serve_health(state: AppState, port: u16, stop: CancellationToken) -> Result<()> {
    let listener = TcpListener::bind(("0.0.0.0", port))
        .await
        .map_err(|e| anyhow!("Failed to bind health probe on port {}: {}", port, e))?;
    info!("🩺 Health probe on http://0.0.0.0:{}", port);

    axum::serve(listener, create_app(state))
        .with_graceful_shutdown(async move { stop.cancelled().await })
        .await
        .map_err(|e| anyhow!("Health probe failed: {}", e))
}

/// Runs the `transcoding_infos` worker, plus the health probe when a port
/// is configured, until `stop` fires.
pub async fn run_worker(state: AppState, stop: CancellationToken) -> Result<()> {
    let registry = HandlerRegistry::with_defaults();
    let worker = Worker::new(state.worker_deps(), state.config.worker_config())
        .with_stats(state.stats.clone());

    let health = state
        .config
        .health_port
        .map(|port| tokio::spawn(serve_health(state.clone(), port, stop.clone())));

    info!("👷 Worker {} starting", state.config.worker_name);
    let result = worker
        .launch_registered(TRANSCODING_INFOS_QUEUE, &registry, stop.clone())
        .await;
    stop.cancel();

    if let Some(health) = health {
        match health.await {
            Ok(Err(e)) => warn!("{}", e),
            Err(e) => warn!("Health probe task ended abnormally: {}", e),
            Ok(Ok(())) => {}
        }
    }

    result
}

/// Publishes a transcoding report, as the web tier does when the backend
/// reports back.
pub async fn enqueue_report(queue: &dyn QueueClient, report: &TranscodingInfo) -> Result<JobEnvelope> {
    let payload = serde_json::to_value(report)?;
    let envelope = queue
        .enqueue(TRANSCODING_INFOS_QUEUE, payload)
        .await
        .map_err(|e| anyhow!("Failed to enqueue report for track {}: {}", report.track_id, e))?;

    info!(
        "📤 Queued job {} for track {} on '{}'",
        envelope.id, report.track_id, TRANSCODING_INFOS_QUEUE
    );
    Ok(envelope)
}
