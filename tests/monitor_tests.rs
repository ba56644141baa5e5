use axum::{
    body::Body,
    http::{Request, StatusCode},
};
use http_body_util::BodyExt;
use serde_json::Value;
use std::sync::Arc;
use tower::ServiceExt;

use ffmpeg_gateway::health::{CheckState, HealthState};
use ffmpeg_gateway::metrics::WorkerMetrics;
use ffmpeg_gateway::monitor::{monitor_router, MonitorState};

fn test_state() -> MonitorState {
    MonitorState {
        health: Arc::new(HealthState::new()),
        metrics: Arc::new(WorkerMetrics::new().unwrap()),
    }
}

async fn get(state: MonitorState, uri: &str) -> (StatusCode, String) {
    let app = monitor_router(state);
    let response = app
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();

    let status = response.status();
    let body = response.into_body().collect().await.unwrap().to_bytes();
    (status, String::from_utf8_lossy(&body).into_owned())
}

#[tokio::test]
async fn test_health_reports_500_until_a_check_passes() {
    let state = test_state();

    let (status, body) = get(state.clone(), "/health").await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body, "Health check failed");

    state.health.publish(CheckState::Passed);
    let (status, body) = get(state.clone(), "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "OK");

    state.health.publish(CheckState::Failed);
    let (status, _) = get(state, "/health").await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
}

#[tokio::test]
async fn test_metrics_exposes_counters_and_gauge() {
    let state = test_state();
    state.metrics.record_invocation("ffprobe");
    let _guard = state.metrics.track_transcode();

    let (status, body) = get(state, "/metrics").await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.contains("ffmpeg_gateway_invocations_total{binary=\"ffprobe\"} 1"));
    assert!(body.contains("ffmpeg_gateway_active_transcodes 1"));
}

#[tokio::test]
async fn test_status_reports_health_and_in_flight_count() {
    let state = test_state();

    let (status, body) = get(state.clone(), "/status").await;
    assert_eq!(status, StatusCode::OK);
    let json: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(json["healthy"], false);
    assert_eq!(json["check_state"], "idle");
    assert!(json["last_check_ms"].is_null());
    assert_eq!(json["active_transcodes"], 0);

    state.health.publish(CheckState::Passed);
    let _guard = state.metrics.track_transcode();

    let (_, body) = get(state, "/status").await;
    let json: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(json["healthy"], true);
    assert_eq!(json["check_state"], "passed");
    assert!(json["last_check_ms"].is_i64());
    assert_eq!(json["active_transcodes"], 1);
}
