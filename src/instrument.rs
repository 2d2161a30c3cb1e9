//! Request-scoped instrumentation helpers.
//!
//! The span middleware runs every handler inside [`scope`]; code below it
//! reads the active correlation id with [`current_correlation_id`] and wraps
//! database calls in [`traced_query`].

use std::fmt::Display;
use std::future::Future;

use chrono::Utc;

use crate::pipeline::Pipeline;
use crate::span::{attr, CorrelationId, Span, SpanStatus};

tokio::task_local! {
    static CURRENT_TRANSACTION: CorrelationId;
}

/// Run `fut` with `correlation_id` as the current transaction.
pub async fn scope<F: Future>(correlation_id: CorrelationId, fut: F) -> F::Output {
    CURRENT_TRANSACTION.scope(correlation_id, fut).await
}

/// Correlation id of the enclosing request, if any.
pub fn current_correlation_id() -> Option<CorrelationId> {
    CURRENT_TRANSACTION.try_with(Clone::clone).ok()
}

/// Time a database call and hand the pipeline a client span for it.
///
/// Outside a request scope the call still counts toward client metrics
/// under a fresh, single-span transaction.
pub async fn traced_query<F, T, E>(
    pipeline: &Pipeline,
    system: &str,
    statement: &str,
    fut: F,
) -> Result<T, E>
where
    F: Future<Output = Result<T, E>>,
    E: Display,
{
    let correlation_id = current_correlation_id().unwrap_or_else(CorrelationId::generate);
    let start = Utc::now();
    let result = fut.await;
    let end = Utc::now();

    let mut span = Span::db_call(correlation_id, system, statement).with_timing(start, end);
    if let Err(err) = &result {
        let message = err.to_string();
        span = span
            .with_attribute(attr::EXCEPTION_MESSAGE, message.as_str())
            .with_status(SpanStatus::Error(message));
    }
    pipeline.ingest(&span);

    result
}
