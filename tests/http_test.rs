//! The reference HTTP service driven through its router.

use std::sync::Arc;

use apm_probe::config::ApmConfig;
use apm_probe::metrics::Snapshot;
use apm_probe::profiling::{ProfilingConfig, UnsupportedProfiler};
use apm_probe::{server, AppState, Pipeline};
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::response::Response;
use axum::Router;
use serde_json::Value;
use tower::ServiceExt;

// ============================================================================
// Helpers
// ============================================================================

fn app_with(config: ApmConfig) -> (Router, Arc<AppState>) {
    let config = ApmConfig {
        profiling: ProfilingConfig {
            enabled: false,
            ..ProfilingConfig::default()
        },
        ..config
    };
    let pipeline = Arc::new(Pipeline::with_profiler_backend(config, Arc::new(UnsupportedProfiler)));
    let state = AppState::new(pipeline);
    (server::create_router(state.clone()), state)
}

fn app() -> (Router, Arc<AppState>) {
    app_with(ApmConfig::default())
}

async fn get(app: &Router, uri: &str) -> Response {
    let request = Request::builder().uri(uri).body(Body::empty()).unwrap();
    app.clone().oneshot(request).await.unwrap()
}

async fn json_body(response: Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn snapshot(state: &AppState) -> Snapshot {
    state.pipeline.snapshot()
}

// ============================================================================
// Instrumented routes
// ============================================================================

#[tokio::test]
async fn instrumented_response_carries_tracing_headers() {
    let (app, _) = app();
    let first = get(&app, "/db").await;
    let second = get(&app, "/db").await;
    assert_eq!(first.status(), StatusCode::OK);

    let id = |r: &Response| {
        r.headers()
            .get("x-correlation-id")
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned)
            .expect("correlation id header")
    };
    assert_eq!(id(&first).len(), 32);
    assert_ne!(id(&first), id(&second));

    let micros = first
        .headers()
        .get("x-response-time-us")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok());
    assert!(micros.is_some());

    let timing = first.headers().get("server-timing").unwrap().to_str().unwrap();
    assert!(timing.starts_with("total;dur="));
}

#[tokio::test]
async fn n_plus_one_route_reports_one_event_on_its_path() {
    let (app, state) = app();
    let threshold = state.pipeline.correlator().config().threshold;

    let response = get(&app, "/n-plus-one").await;
    assert_eq!(response.status(), StatusCode::OK);

    let snap = snapshot(&state);
    assert_eq!(snap.n_plus_one_events.len(), 1);
    let event = &snap.n_plus_one_events[0];
    assert_eq!(event.path, "/n-plus-one");
    assert_eq!(event.query, "SELECT * FROM order_items WHERE order_id = ?");
    assert_eq!(event.count, threshold);

    assert_eq!(snap.server_endpoints["/n-plus-one"].total_requests, 1);
    assert_eq!(snap.client_metrics.total_requests, threshold as u64 + 3);
}

#[tokio::test]
async fn handler_error_becomes_error_event_with_message() {
    let (app, state) = app();
    let response = get(&app, "/error").await;
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(json_body(response).await["error"], "simulated handler failure");

    let snap = snapshot(&state);
    assert_eq!(snap.server_endpoints["/error"].status_5xx, 1);
    assert_eq!(snap.errors.len(), 1);
    assert_eq!(snap.errors[0].path, "/error");
    assert_eq!(snap.errors[0].method, "GET");
    assert_eq!(snap.errors[0].error, "simulated handler failure");
}

#[tokio::test]
async fn failed_query_counts_client_call_and_server_error() {
    let (app, state) = app();
    let response = get(&app, "/db-error").await;
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

    let snap = snapshot(&state);
    assert_eq!(snap.client_metrics.total_requests, 1);
    assert_eq!(snap.errors.len(), 1);
    assert_eq!(
        snap.errors[0].error,
        "database: relation \"missing_table\" does not exist"
    );
}

// ============================================================================
// Uninstrumented routes
// ============================================================================

#[tokio::test]
async fn reporting_and_load_routes_are_not_recorded() {
    let (app, state) = app();
    get(&app, "/").await;

    let response = get(&app, "/debug/apm").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().get("x-correlation-id").is_none());
    let body = json_body(response).await;
    assert_eq!(body["server_endpoints"]["/"]["total_requests"], 1);

    let status = get(&app, "/api/load/status").await;
    assert_eq!(json_body(status).await["running"], false);

    let snap = snapshot(&state);
    let paths: Vec<&str> = snap.server_endpoints.keys().map(String::as_str).collect();
    assert_eq!(paths, ["/"]);
}

#[tokio::test]
async fn configured_debug_endpoint_is_normalized() {
    let (app, _) = app_with(ApmConfig {
        debug_endpoint: "internal/apm/".into(),
        ..ApmConfig::default()
    });

    let response = get(&app, "/internal/apm").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(json_body(response).await.get("n_plus_one_events").is_some());

    assert_eq!(get(&app, "/debug/apm").await.status(), StatusCode::NOT_FOUND);
}
