use std::sync::Arc;

use crate::background::BackgroundTasks;
use crate::config::ApmConfig;
use crate::correlator::TraceCorrelator;
use crate::metrics::{MetricsAggregator, Snapshot};
use crate::profiling::{default_profiler, CpuProfiler, ProfileController};
use crate::router::SpanRouter;
use crate::span::{CorrelationId, Span};

/// Composition root: one aggregator, one correlator, one profiler and the
/// router that connects them. Cheap to share behind an `Arc`.
pub struct Pipeline {
    config: ApmConfig,
    metrics: Arc<MetricsAggregator>,
    correlator: Arc<TraceCorrelator>,
    profiler: Arc<ProfileController>,
    router: SpanRouter,
}

impl Pipeline {
    /// Pipeline with the platform's CPU sampler.
    pub fn new(config: ApmConfig) -> Self {
        Self::with_profiler_backend(config, default_profiler())
    }

    pub fn with_profiler_backend(config: ApmConfig, backend: Arc<dyn CpuProfiler>) -> Self {
        let metrics = Arc::new(MetricsAggregator::with_event_capacity(config.event_capacity));
        let correlator = Arc::new(TraceCorrelator::new(config.correlator.clone(), metrics.clone()));
        let profiler = Arc::new(ProfileController::new(config.profiling.clone(), backend));
        let router = SpanRouter::new(metrics.clone(), correlator.clone(), profiler.clone());

        if !config.enabled {
            tracing::info!("APM pipeline disabled, spans will be dropped");
        }

        Self {
            config,
            metrics,
            correlator,
            profiler,
            router,
        }
    }

    pub fn config(&self) -> &ApmConfig {
        &self.config
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    pub fn ingest(&self, span: &Span) {
        if self.config.enabled {
            self.router.route(span);
        }
    }

    pub fn ingest_batch(&self, spans: &[Span]) {
        if self.config.enabled {
            self.router.route_batch(spans);
        }
    }

    /// Name a transaction as soon as its request starts.
    pub fn begin_transaction(&self, correlation_id: &CorrelationId, path: &str) {
        if self.config.enabled {
            self.correlator.bind_root_path(correlation_id, path);
        }
    }

    pub fn snapshot(&self) -> Snapshot {
        self.metrics.snapshot()
    }

    pub fn metrics(&self) -> &Arc<MetricsAggregator> {
        &self.metrics
    }

    pub fn correlator(&self) -> &Arc<TraceCorrelator> {
        &self.correlator
    }

    pub fn profiler(&self) -> &Arc<ProfileController> {
        &self.profiler
    }

    /// Spawn the endpoint scan and the transaction sweep on the current
    /// Tokio runtime. Nothing is spawned when the pipeline is disabled.
    pub fn start_background(&self) -> BackgroundTasks {
        if !self.config.enabled {
            return BackgroundTasks::idle();
        }
        BackgroundTasks::start(
            self.metrics.clone(),
            self.correlator.clone(),
            self.profiler.clone(),
            self.config.collection_interval,
        )
    }
}
