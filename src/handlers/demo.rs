//! Demo endpoints exercising each detector against a simulated database.

use axum::{extract::State, Json};
use rand::Rng;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::instrument::traced_query;
use crate::AppState;

use super::AppError;

const DB_SYSTEM: &str = "postgresql";

// ─── Simulated database ──────────────────────────────────────────

#[derive(Debug, Error)]
pub enum DbError {
    #[error("relation \"{0}\" does not exist")]
    MissingRelation(String),
}

/// Pretend round-trip: a few milliseconds of latency, then one row per
/// call. Statements against `missing_table` fail.
pub async fn simulated_query(statement: &str) -> Result<u64, DbError> {
    let latency_ms = rand::thread_rng().gen_range(1..=3);
    tokio::time::sleep(Duration::from_millis(latency_ms)).await;

    if statement.contains("missing_table") {
        return Err(DbError::MissingRelation("missing_table".into()));
    }
    Ok(1)
}

async fn query(state: &AppState, statement: &str) -> Result<u64, AppError> {
    traced_query(&state.pipeline, DB_SYSTEM, statement, simulated_query(statement))
        .await
        .map_err(|e| AppError::Database(e.to_string()))
}

// ─── Response types ──────────────────────────────────────────────

#[derive(Debug, Serialize)]
pub struct DemoResponse {
    pub message: String,
    pub queries: u64,
}

// ─── GET / ───────────────────────────────────────────────────────

pub async fn index() -> Json<DemoResponse> {
    Json(DemoResponse {
        message: "apm-probe demo service".into(),
        queries: 0,
    })
}

// ─── GET /db ─────────────────────────────────────────────────────

pub async fn db(State(state): State<Arc<AppState>>) -> Result<Json<DemoResponse>, AppError> {
    let rows = query(&state, "SELECT id, name FROM users WHERE id = 1").await?;
    Ok(Json(DemoResponse {
        message: "fetched user".into(),
        queries: rows,
    }))
}

// ─── GET /db-error ───────────────────────────────────────────────

pub async fn db_error(
    State(state): State<Arc<AppState>>,
) -> Result<Json<DemoResponse>, AppError> {
    query(&state, "SELECT * FROM missing_table").await?;
    Ok(Json(DemoResponse {
        message: "unreachable".into(),
        queries: 1,
    }))
}

// ─── GET /error ──────────────────────────────────────────────────

pub async fn error() -> Result<Json<DemoResponse>, AppError> {
    Err(AppError::Internal("simulated handler failure".into()))
}

// ─── GET /slow ───────────────────────────────────────────────────

/// Sleeps past the profiling latency threshold.
pub async fn slow(State(state): State<Arc<AppState>>) -> Json<DemoResponse> {
    let delay = state.pipeline.config().profiling.latency_threshold + Duration::from_millis(100);
    tokio::time::sleep(delay).await;
    Json(DemoResponse {
        message: format!("slept {}ms", delay.as_millis()),
        queries: 0,
    })
}

// ─── GET /n-plus-one ─────────────────────────────────────────────

/// One list query followed by a per-row lookup, enough rows to cross the
/// detection threshold.
pub async fn n_plus_one(
    State(state): State<Arc<AppState>>,
) -> Result<Json<DemoResponse>, AppError> {
    let rows = state.pipeline.correlator().config().threshold + 2;

    let mut queries = query(&state, "SELECT id FROM orders LIMIT 20").await?;
    for _ in 0..rows {
        queries += query(&state, "SELECT * FROM order_items WHERE order_id = ?").await?;
    }

    Ok(Json(DemoResponse {
        message: format!("loaded {rows} orders one by one"),
        queries,
    }))
}
