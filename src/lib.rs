//! In-process APM probe: span ingestion, endpoint metrics, N+1 query
//! detection and adaptive CPU profiling.
//!
//! The core (`metrics`, `correlator`, `profiling`, `router`, `pipeline`,
//! `background`) only consumes [`span::Span`] values and produces
//! [`metrics::Snapshot`]s. The remaining modules are the reference HTTP
//! service built on top of it.

use std::sync::atomic::AtomicBool;
use std::sync::Arc;

pub mod background;
pub mod config;
pub mod correlator;
pub mod handlers;
pub mod instrument;
pub mod load_generator;
pub mod logging;
pub mod metrics;
pub mod middleware;
pub mod pipeline;
pub mod profiling;
pub mod router;
pub mod server;
pub mod span;

pub use config::ApmConfig;
pub use pipeline::Pipeline;
pub use span::{CorrelationId, Span, SpanKind, SpanStatus};

/// Shared application state available to every handler via `State<Arc<AppState>>`.
pub struct AppState {
    pub pipeline: Arc<Pipeline>,

    /// Flag checked by every load-generator worker on each iteration.
    pub load_running: Arc<AtomicBool>,

    /// Spawned load-generator task, awaited on stop.
    pub load_handle: tokio::sync::Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl AppState {
    pub fn new(pipeline: Arc<Pipeline>) -> Arc<Self> {
        Arc::new(Self {
            pipeline,
            load_running: Arc::new(AtomicBool::new(false)),
            load_handle: tokio::sync::Mutex::new(None),
        })
    }
}
