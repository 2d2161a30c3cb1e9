use axum::{
    middleware as axum_mw,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::CorsLayer;

use crate::handlers::{demo, load, report};
use crate::middleware::span_middleware;
use crate::AppState;

/// Builds the full Axum `Router`: instrumented demo routes, plus the
/// uninstrumented reporting and load-control routes.
pub fn create_router(state: Arc<AppState>) -> Router {
    let (snapshot_path, stream_path) = debug_routes(&state.pipeline.config().debug_endpoint);

    // ── Demo endpoints (each request is a traced transaction) ───
    let demo = Router::new()
        .route("/", get(demo::index))
        .route("/db", get(demo::db))
        .route("/db-error", get(demo::db_error))
        .route("/error", get(demo::error))
        .route("/slow", get(demo::slow))
        .route("/n-plus-one", get(demo::n_plus_one))
        .route_layer(axum_mw::from_fn_with_state(state.clone(), span_middleware));

    Router::new()
        .merge(demo)
        // ── Reporting ───────────────────────────────────────────
        .route(&snapshot_path, get(report::get_snapshot))
        .route(&stream_path, get(report::snapshot_stream))
        // ── Synthetic load control ──────────────────────────────
        .route("/api/load/start", post(load::start_load))
        .route("/api/load/stop", post(load::stop_load))
        .route("/api/load/status", get(load::load_status))
        .with_state(state)
        .layer(CorsLayer::permissive())
}

/// Snapshot and SSE routes mounted for the configured endpoint.
pub fn debug_routes(endpoint: &str) -> (String, String) {
    let trimmed = endpoint.trim().trim_matches('/');
    let base = if trimmed.is_empty() {
        "/debug/apm".to_owned()
    } else {
        format!("/{trimmed}")
    };
    let stream = format!("{base}/stream");
    (base, stream)
}
