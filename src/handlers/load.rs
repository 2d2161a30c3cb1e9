use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};
use std::sync::atomic::Ordering;
use std::sync::Arc;

use crate::AppState;

use super::AppError;

// ─── Request / response types ────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct LoadConfig {
    /// Number of concurrent Tokio tasks fabricating transactions
    #[serde(default = "default_concurrency")]
    pub concurrency: u32,

    /// How long the run lasts (seconds)
    #[serde(default = "default_duration")]
    pub duration_secs: u64,

    /// Percentage of transactions that contain an N+1 pattern (0–100)
    #[serde(default = "default_n_plus_one_pct")]
    pub n_plus_one_pct: u8,
}

fn default_concurrency() -> u32 {
    10
}
fn default_duration() -> u64 {
    30
}
fn default_n_plus_one_pct() -> u8 {
    5
}

impl LoadConfig {
    pub fn validate(&self) -> Result<(), AppError> {
        if self.concurrency == 0 || self.concurrency > 500 {
            return Err(AppError::BadRequest(
                "concurrency must be between 1 and 500".into(),
            ));
        }
        if self.duration_secs == 0 || self.duration_secs > 300 {
            return Err(AppError::BadRequest(
                "duration_secs must be between 1 and 300".into(),
            ));
        }
        if self.n_plus_one_pct > 100 {
            return Err(AppError::BadRequest(
                "n_plus_one_pct must be between 0 and 100".into(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Serialize)]
pub struct LoadStatus {
    pub running: bool,
    pub message: String,
}

// ─── POST /api/load/start ────────────────────────────────────────

pub async fn start_load(
    State(state): State<Arc<AppState>>,
    Json(config): Json<LoadConfig>,
) -> Result<Json<LoadStatus>, AppError> {
    config.validate()?;

    // Held until the handle is stored so a concurrent stop cannot slip in.
    let mut guard = state.load_handle.lock().await;

    // Only one run at a time; claimed before spawning so workers see it
    if state
        .load_running
        .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
        .is_err()
    {
        return Err(AppError::AlreadyRunning);
    }

    // Start from a clean aggregate
    state.pipeline.metrics().reset();

    let msg = format!(
        "Started: {} workers × {}s, {}% N+1 transactions",
        config.concurrency, config.duration_secs, config.n_plus_one_pct,
    );
    tracing::info!(
        concurrency = config.concurrency,
        duration_secs = config.duration_secs,
        n_plus_one_pct = config.n_plus_one_pct,
        "synthetic load started"
    );

    let running = state.load_running.clone();
    let pipeline = state.pipeline.clone();

    let handle = tokio::spawn(async move {
        crate::load_generator::run(
            running,
            pipeline,
            config.concurrency,
            config.duration_secs,
            config.n_plus_one_pct,
        )
        .await;
    });

    *guard = Some(handle);

    Ok(Json(LoadStatus {
        running: true,
        message: msg,
    }))
}

// ─── POST /api/load/stop ─────────────────────────────────────────

pub async fn stop_load(State(state): State<Arc<AppState>>) -> Json<LoadStatus> {
    let mut guard = state.load_handle.lock().await;
    if !state.load_running.swap(false, Ordering::SeqCst) {
        return Json(LoadStatus {
            running: false,
            message: "No load run in progress".into(),
        });
    }

    if let Some(handle) = guard.take() {
        // The task may have already finished
        let _ = handle.await;
    }
    tracing::info!("synthetic load stopped");

    Json(LoadStatus {
        running: false,
        message: "Load stopped".into(),
    })
}

// ─── GET /api/load/status ────────────────────────────────────────

pub async fn load_status(State(state): State<Arc<AppState>>) -> Json<LoadStatus> {
    let running = state.load_running.load(Ordering::SeqCst);
    Json(LoadStatus {
        running,
        message: if running {
            "Load in progress".into()
        } else {
            "Idle".into()
        },
    })
}
