use std::sync::Arc;

use axum::body::{Body, to_bytes};
use axum::http::{Request, StatusCode};
use serde_json::Value;
use tower::ServiceExt;

use track_jobs::app::create_app;
use track_jobs::config::settings::AppConfig;
use track_jobs::infrastructure::notify::LogNotifier;
use track_jobs::infrastructure::queue::MemoryQueue;
use track_jobs::modules::tracks::memory::MemoryTrackStore;
use track_jobs::state::AppState;

fn state() -> AppState {
    let config = AppConfig {
        database_url: "postgres://localhost/tracks".to_string(),
        database_max_connections: 10,
        broker_url: "redis://localhost:6379".to_string(),
        worker_name: "worker-test".to_string(),
        worker_max_attempts: 3,
        worker_poll_timeout_secs: 5,
        worker_concurrency: 1,
        worker_retry_backoff_ms: 2000,
        notify_webhook_url: None,
        notify_timeout_secs: 10,
        notify_smtp_host: None,
        notify_smtp_port: 587,
        notify_smtp_username: None,
        notify_smtp_password: None,
        notify_smtp_tls: true,
        notify_smtp_from: None,
        health_port: Some(0),
    };

    AppState::new(
        config,
        Arc::new(MemoryQueue::new()),
        Arc::new(MemoryTrackStore::new()),
        Arc::new(LogNotifier),
    )
}

#[tokio::test]
async fn health_answers_ok() {
    let response = create_app(state())
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert_eq!(&body[..], b"ok");
}

#[tokio::test]
async fn worker_health_reports_queue_and_counters() {
    let response = create_app(state())
        .oneshot(
            Request::builder()
                .uri("/health/worker")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let json: Value = serde_json::from_slice(&body).unwrap();

    assert_eq!(json["status"], "success");
    assert_eq!(json["data"]["worker"], "worker-test");
    assert_eq!(json["data"]["queue"], "transcoding_infos");
    assert_eq!(json["data"]["processed"], 0);
    assert_eq!(json["data"]["failed"], 0);
}

#[tokio::test]
async fn unknown_routes_are_not_found() {
    let response = create_app(state())
        .oneshot(Request::builder().uri("/api/v1/tracks").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
