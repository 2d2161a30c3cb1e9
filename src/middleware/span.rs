use axum::{
    extract::{MatchedPath, Request, State},
    http::HeaderValue,
    middleware::Next,
    response::Response,
};
use chrono::Utc;
use std::sync::Arc;
use std::time::Instant;

use crate::handlers::ErrorMessage;
use crate::instrument;
use crate::span::{attr, CorrelationId, Span, SpanStatus};
use crate::AppState;

pub const CORRELATION_ID_HEADER: &str = "x-correlation-id";

/// Wraps each instrumented request in a transaction.
///
/// Before the handler: fresh correlation id, root path bound, task-local
/// scope entered. After it: the server span is ingested and these headers
/// are added:
///
///   X-Correlation-Id    the transaction's id
///   X-Response-Time-Us  total handler wall time in microseconds
///   Server-Timing       same value in the standard Server-Timing format
pub async fn span_middleware(
    State(state): State<Arc<AppState>>,
    req: Request,
    next: Next,
) -> Response {
    let method = req.method().to_string();
    // Route template keeps `/users/:id` as one endpoint.
    let path = req
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_owned())
        .unwrap_or_else(|| req.uri().path().to_owned());

    let correlation_id = CorrelationId::generate();
    state.pipeline.begin_transaction(&correlation_id, &path);

    let started_at = Utc::now();
    let start = Instant::now();
    let mut response = instrument::scope(correlation_id.clone(), next.run(req)).await;
    let elapsed = start.elapsed();
    let finished_at = Utc::now();

    // ── Server span ─────────────────────────────────────────────
    let status = response.status().as_u16();
    let mut span = Span::server(correlation_id.clone(), path.as_str())
        .with_timing(started_at, finished_at)
        .with_status_code(status)
        .with_attribute(attr::HTTP_METHOD, method.as_str());
    if let Some(ErrorMessage(message)) = response.extensions().get::<ErrorMessage>() {
        span = span.with_attribute(attr::EXCEPTION_MESSAGE, message.as_str());
    }
    if status >= 500 {
        let message = span.error_message().unwrap_or("internal server error").to_owned();
        span = span.with_status(SpanStatus::Error(message));
    }
    state.pipeline.ingest(&span);

    tracing::debug!(
        correlation_id = %correlation_id,
        method = %method,
        path = %path,
        status,
        elapsed_us = elapsed.as_micros() as u64,
        "request completed"
    );

    // ── Inject response headers ─────────────────────────────────
    let headers = response.headers_mut();
    if let Ok(val) = HeaderValue::from_str(correlation_id.as_str()) {
        headers.insert(CORRELATION_ID_HEADER, val);
    }
    headers.insert("x-response-time-us", HeaderValue::from(elapsed.as_micros() as u64));

    let server_timing = format!("total;dur={:.3}", elapsed.as_secs_f64() * 1000.0);
    if let Ok(val) = HeaderValue::from_str(&server_timing) {
        headers.insert("server-timing", val);
    }

    response
}
