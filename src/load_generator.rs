use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::Rng;
use rand::SeedableRng;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::pipeline::Pipeline;
use crate::span::{attr, CorrelationId, Span, SpanStatus};

const DB_SYSTEM: &str = "postgresql";

/// Endpoints a synthetic transaction can land on, with their usual queries.
const ROUTES: &[(&str, &str, &[&str])] = &[
    (
        "GET",
        "/api/users/:id",
        &["SELECT * FROM users WHERE id = ?"],
    ),
    (
        "GET",
        "/api/orders",
        &[
            "SELECT id FROM orders WHERE user_id = ?",
            "SELECT count(*) FROM orders WHERE user_id = ?",
        ],
    ),
    (
        "GET",
        "/api/products/:id",
        &[
            "SELECT * FROM products WHERE id = ?",
            "SELECT * FROM reviews WHERE product_id = ? LIMIT 10",
        ],
    ),
    (
        "POST",
        "/api/checkout",
        &[
            "BEGIN",
            "UPDATE inventory SET qty = qty - 1 WHERE sku = ?",
            "INSERT INTO orders (user_id, total) VALUES (?, ?)",
            "COMMIT",
        ],
    ),
];

/// Lookup repeated per row when a transaction carries an N+1 pattern.
const N_PLUS_ONE_QUERY: &str = "SELECT * FROM order_items WHERE order_id = ?";

/// Percent of transactions that run slow or fail.
const SLOW_PCT: u8 = 1;
const ERROR_PCT: u8 = 2;

// ─── Public entry point ──────────────────────────────────────────

/// Spawns `concurrency` Tokio tasks that fabricate transactions until the
/// deadline or the `running` flag is set to false.
pub async fn run(
    running: Arc<AtomicBool>,
    pipeline: Arc<Pipeline>,
    concurrency: u32,
    duration_secs: u64,
    n_plus_one_pct: u8,
) {
    let deadline = Instant::now() + Duration::from_secs(duration_secs);

    let mut handles = Vec::with_capacity(concurrency as usize);

    for worker_id in 0..concurrency {
        let running = running.clone();
        let pipeline = pipeline.clone();

        handles.push(tokio::spawn(async move {
            worker(worker_id, running, pipeline, deadline, n_plus_one_pct).await;
        }));
    }

    for h in handles {
        let _ = h.await;
    }

    running.store(false, Ordering::SeqCst);
    tracing::info!("synthetic load finished");
}

// ─── Worker loop ─────────────────────────────────────────────────

async fn worker(
    id: u32,
    running: Arc<AtomicBool>,
    pipeline: Arc<Pipeline>,
    deadline: Instant,
    n_plus_one_pct: u8,
) {
    // Each worker gets its own deterministic RNG seeded uniquely.
    let mut rng = StdRng::seed_from_u64(1000 + id as u64);
    let repeat = pipeline.correlator().config().threshold + 2;

    while running.load(Ordering::Relaxed) && Instant::now() < deadline {
        let with_n_plus_one = rng.gen_range(0u8..100) < n_plus_one_pct;
        let correlation_id = CorrelationId::generate();
        let (method, path, _) = ROUTES[rng.gen_range(0..ROUTES.len())];

        pipeline.begin_transaction(&correlation_id, path);
        let spans = transaction(
            &mut rng,
            correlation_id,
            Utc::now(),
            with_n_plus_one.then_some(repeat),
            method,
            path,
        );
        pipeline.ingest_batch(&spans);

        // Pace the worker so a run does not starve the server.
        tokio::time::sleep(Duration::from_millis(rng.gen_range(1..=5))).await;
    }
}

// ─── Transaction fabrication ─────────────────────────────────────

/// DB spans back to back from `start`, then the enclosing server span.
fn transaction(
    rng: &mut StdRng,
    correlation_id: CorrelationId,
    start: DateTime<Utc>,
    n_plus_one: Option<usize>,
    method: &str,
    path: &str,
) -> Vec<Span> {
    let queries = ROUTES
        .iter()
        .find(|(_, p, _)| *p == path)
        .map(|(_, _, q)| *q)
        .unwrap_or_default();

    let mut statements: Vec<&str> = queries.to_vec();
    if let Some(repeat) = n_plus_one {
        statements.extend(std::iter::repeat(N_PLUS_ONE_QUERY).take(repeat));
    }

    let failing = rng.gen_range(0u8..100) < ERROR_PCT;
    let slow = rng.gen_range(0u8..100) < SLOW_PCT;

    let mut spans = Vec::with_capacity(statements.len() + 1);
    let mut cursor = start;
    for (i, statement) in statements.iter().enumerate() {
        let elapsed = chrono::Duration::microseconds(rng.gen_range(200..4_000));
        let mut span = Span::db_call(correlation_id.clone(), DB_SYSTEM, statement)
            .with_timing(cursor, cursor + elapsed);
        if failing && i + 1 == statements.len() {
            span = span
                .with_status(SpanStatus::Error("deadlock detected".into()))
                .with_attribute(attr::EXCEPTION_MESSAGE, "deadlock detected");
        }
        cursor = cursor + elapsed;
        spans.push(span);
    }

    let overhead = if slow {
        chrono::Duration::milliseconds(rng.gen_range(600..1_500))
    } else {
        chrono::Duration::microseconds(rng.gen_range(100..2_000))
    };
    let status = if failing { 500 } else { 200 };

    let mut server = Span::server(correlation_id, path)
        .with_timing(start, cursor + overhead)
        .with_status_code(status)
        .with_attribute(attr::HTTP_METHOD, method);
    if failing {
        server = server.with_status(SpanStatus::Error("deadlock detected".into()));
    }
    spans.push(server);
    spans
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ApmConfig;
    use crate::profiling::{ProfilingConfig, UnsupportedProfiler};

    #[test]
    fn transaction_ends_with_its_server_span() {
        let mut rng = StdRng::seed_from_u64(7);
        let start = Utc::now();
        let spans = transaction(&mut rng, "t1".into(), start, None, "POST", "/api/checkout");

        assert_eq!(spans.len(), 5);
        let server = spans.last().unwrap();
        assert!(server.is_server());
        assert_eq!(server.name, "/api/checkout");
        assert_eq!(server.start, start);
        assert!(spans[..4].iter().all(|s| s.is_db_call() && s.end <= server.end));
    }

    #[test]
    fn n_plus_one_transaction_repeats_one_statement() {
        let mut rng = StdRng::seed_from_u64(7);
        let spans = transaction(&mut rng, "t1".into(), Utc::now(), Some(12), "GET", "/api/orders");
        let repeated = spans
            .iter()
            .filter(|s| s.statement() == Some(N_PLUS_ONE_QUERY))
            .count();
        assert_eq!(repeated, 12);
    }

    #[tokio::test]
    async fn run_feeds_the_pipeline_until_deadline() {
        let config = ApmConfig {
            profiling: ProfilingConfig {
                enabled: false,
                ..ProfilingConfig::default()
            },
            ..ApmConfig::default()
        };
        let pipeline = Arc::new(Pipeline::with_profiler_backend(config, Arc::new(UnsupportedProfiler)));
        let running = Arc::new(AtomicBool::new(true));

        run(running.clone(), pipeline.clone(), 2, 1, 100).await;

        assert!(!running.load(Ordering::SeqCst));
        let snap = pipeline.snapshot();
        assert!(!snap.server_endpoints.is_empty());
        assert!(snap.client_metrics.total_requests > 0);
        assert!(!snap.n_plus_one_events.is_empty());
    }
}
