use std::sync::Arc;
use std::time::Duration;

use crate::metrics::{ErrorEvent, MetricsAggregator};
use crate::span::{Span, SpanKind};

/// Anything that wants to see every span (the N+1 correlator in production).
pub trait SpanProcessor: Send + Sync {
    fn process_span(&self, span: &Span);
}

/// Receives the duration of each completed server request.
pub trait SlowRequestTrigger: Send + Sync {
    fn trigger_if_slow(&self, path: &str, duration: Duration);
}

/// Stateless dispatcher from spans to the aggregator, correlator and
/// profiler.
#[derive(Clone)]
pub struct SpanRouter {
    metrics: Arc<MetricsAggregator>,
    correlator: Arc<dyn SpanProcessor>,
    profiler: Arc<dyn SlowRequestTrigger>,
}

impl SpanRouter {
    pub fn new(
        metrics: Arc<MetricsAggregator>,
        correlator: Arc<dyn SpanProcessor>,
        profiler: Arc<dyn SlowRequestTrigger>,
    ) -> Self {
        Self {
            metrics,
            correlator,
            profiler,
        }
    }

    pub fn route(&self, span: &Span) {
        self.correlator.process_span(span);

        match span.kind {
            SpanKind::Server => self.route_server(span),
            SpanKind::Client => self.route_client(span),
        }
    }

    pub fn route_batch(&self, spans: &[Span]) {
        for span in spans {
            self.route(span);
        }
    }

    fn route_server(&self, span: &Span) {
        let path = span.name.as_str();
        let duration = span.duration();
        // Missing code classifies as success.
        let status_code = span.status_code().unwrap_or(0);
        let has_error = status_code >= 500 || span.status.is_error();

        tracing::trace!(path, status_code, ?duration, "server span");
        self.metrics.record_server_request(path, duration, status_code);

        if has_error {
            self.metrics.record_error(ErrorEvent {
                timestamp: span.end,
                method: span.method().unwrap_or_default().to_owned(),
                path: path.to_owned(),
                error: span.error_message().unwrap_or_default().to_owned(),
            });
        }

        self.profiler.trigger_if_slow(path, duration);
    }

    fn route_client(&self, span: &Span) {
        if span.is_db_call() {
            tracing::trace!(name = %span.name, duration = ?span.duration(), "db client span");
            self.metrics.record_client_request(span.duration(), 0);
        }
        if span.status.is_error() {
            tracing::debug!(
                name = %span.name,
                error = span.error_message().unwrap_or_default(),
                "client span failed"
            );
        }
    }
}
