use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use serde::Serialize;

use crate::common::response::{ApiResponse, ApiSuccess};
use crate::modules::tracks::events::TRANSCODING_INFOS_QUEUE;
use crate::state::AppState;
use crate::workers::StatsSnapshot;

#[derive(Debug, Serialize)]
pub struct WorkerHealth {
    pub worker: String,
    pub queue: &'static str,
    #[serde(flatten)]
    pub stats: StatsSnapshot,
}

pub fn configure_routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/health/worker", get(worker_health))
}

async fn worker_health(State(state): State<AppState>) -> impl IntoResponse {
    let health = WorkerHealth {
        worker: state.config.worker_name.clone(),
        queue: TRANSCODING_INFOS_QUEUE,
        stats: state.stats.snapshot(),
    };
    ApiSuccess(ApiResponse::success(health, "Worker is running"), StatusCode::OK)
}
