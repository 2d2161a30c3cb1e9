use std::process::ExitCode;
use std::sync::Arc;

use apm_probe::logging::init_logging;
use apm_probe::{server, ApmConfig, AppState, Pipeline};

#[tokio::main]
async fn main() -> ExitCode {
    // ── 1. Configuration & logging ──────────────────────────────
    let config = ApmConfig::from_env();
    if let Err(e) = init_logging(&config.log) {
        eprintln!("apm-probe: {e}");
        return ExitCode::FAILURE;
    }

    // ── 2. Pipeline & background loops ──────────────────────────
    let listen_addr = config.listen_addr.clone();
    let (snapshot_route, stream_route) = server::debug_routes(&config.debug_endpoint);
    let pipeline = Arc::new(Pipeline::new(config));
    let background = pipeline.start_background();

    // ── 3. Build Axum router ────────────────────────────────────
    let state = AppState::new(pipeline);
    let app = server::create_router(state);

    // ── 4. Bind & serve ─────────────────────────────────────────
    let listener = match tokio::net::TcpListener::bind(&listen_addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!(addr = %listen_addr, error = %e, "failed to bind");
            background.stop().await;
            return ExitCode::FAILURE;
        }
    };

    tracing::info!(
        addr = %listen_addr,
        snapshot = %snapshot_route,
        stream = %stream_route,
        "apm-probe listening"
    );

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await;

    // ── 5. Stop background loops ────────────────────────────────
    background.stop().await;

    match served {
        Ok(()) => {
            tracing::info!("apm-probe stopped");
            ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::error!(error = %e, "server exited with error");
            ExitCode::FAILURE
        }
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown signal received");
}
