//! N+1 query detection.
//!
//! Spans of one transaction share a correlation id. The correlator keeps a
//! small per-transaction table of database statements and reports a
//! statement once, the moment it has been issued `threshold` times.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use regex::Regex;

use crate::metrics::MetricsAggregator;
use crate::router::SpanProcessor;
use crate::span::{CorrelationId, Span};

// ─── Configuration ───────────────────────────────────────────────

/// How two statements are judged to be "the same call".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StatementNormalization {
    /// Byte-identical text only.
    #[default]
    Exact,
    /// Standalone integer literals become `?`, so `id = 1` and `id = 2` match.
    NumericLiterals,
}

impl StatementNormalization {
    pub fn normalize<'a>(&self, statement: &'a str) -> std::borrow::Cow<'a, str> {
        match self {
            Self::Exact => std::borrow::Cow::Borrowed(statement),
            Self::NumericLiterals => numeric_literal().replace_all(statement, "?"),
        }
    }
}

fn numeric_literal() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\b\d+\b").expect("valid literal pattern"))
}

#[derive(Debug, Clone)]
pub struct CorrelatorConfig {
    pub enabled: bool,
    /// Occurrences of one statement within one transaction that count as N+1.
    pub threshold: usize,
    /// Transactions without activity for longer than this are swept.
    pub idle_timeout: Duration,
    pub sweep_interval: Duration,
    pub normalization: StatementNormalization,
}

impl Default for CorrelatorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            threshold: 10,
            idle_timeout: Duration::from_secs(120),
            sweep_interval: Duration::from_secs(60),
            normalization: StatementNormalization::Exact,
        }
    }
}

// ─── Internal state ──────────────────────────────────────────────

struct TransactionState {
    root_path: Option<String>,
    statements: HashMap<String, StatementCount>,
    last_activity: Instant,
}

#[derive(Default)]
struct StatementCount {
    count: usize,
    reported: bool,
}

impl TransactionState {
    fn new(now: Instant) -> Self {
        Self {
            root_path: None,
            statements: HashMap::new(),
            last_activity: now,
        }
    }

    fn bind_root_path(&mut self, path: &str) {
        if self.root_path.is_none() {
            self.root_path = Some(path.to_owned());
        }
    }
}

// ─── TraceCorrelator ─────────────────────────────────────────────

pub struct TraceCorrelator {
    config: CorrelatorConfig,
    metrics: Arc<MetricsAggregator>,
    transactions: Mutex<HashMap<CorrelationId, TransactionState>>,
}

impl TraceCorrelator {
    pub fn new(mut config: CorrelatorConfig, metrics: Arc<MetricsAggregator>) -> Self {
        config.threshold = config.threshold.max(1);
        if config.enabled {
            tracing::info!(
                threshold = config.threshold,
                normalization = ?config.normalization,
                "n+1 detector enabled"
            );
        }
        Self {
            config,
            metrics,
            transactions: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &CorrelatorConfig {
        &self.config
    }

    /// Feed one span. Server spans name the transaction, database client
    /// spans are counted; anything else only refreshes the activity stamp.
    pub fn process_span(&self, span: &Span) {
        if !self.config.enabled {
            return;
        }

        let now = Instant::now();
        // Lock order: transactions, then metrics. Nothing takes them reversed.
        let mut transactions = self.transactions.lock();
        let tx = transactions
            .entry(span.correlation_id.clone())
            .or_insert_with(|| TransactionState::new(now));
        tx.last_activity = now;

        if span.is_server() {
            tx.bind_root_path(&span.name);
            return;
        }

        if !span.is_db_call() {
            return;
        }
        let Some(statement) = span.statement() else {
            return;
        };

        let key = self.config.normalization.normalize(statement);
        let entry = tx.statements.entry(key.clone().into_owned()).or_default();
        entry.count += 1;

        if entry.count >= self.config.threshold && !entry.reported {
            entry.reported = true;
            let path = tx.root_path.as_deref().unwrap_or_default();
            tracing::info!(
                correlation_id = %span.correlation_id,
                path,
                query = %key,
                count = entry.count,
                "n+1 query pattern detected"
            );
            self.metrics.record_n_plus_one(path, &key, entry.count);
        }
    }

    /// Register the root path before the server span completes.
    /// Database spans finish before their enclosing request does, so
    /// request instrumentation calls this at request start.
    pub fn bind_root_path(&self, correlation_id: &CorrelationId, path: &str) {
        if !self.config.enabled {
            return;
        }
        let now = Instant::now();
        let mut transactions = self.transactions.lock();
        let tx = transactions
            .entry(correlation_id.clone())
            .or_insert_with(|| TransactionState::new(now));
        tx.last_activity = now;
        tx.bind_root_path(path);
    }

    /// Drop every transaction idle for longer than the idle timeout.
    /// Returns how many were removed.
    pub fn sweep(&self) -> usize {
        let timeout = self.config.idle_timeout;
        let now = Instant::now();

        let mut transactions = self.transactions.lock();
        let before = transactions.len();
        transactions.retain(|_, tx| now.duration_since(tx.last_activity) <= timeout);
        let removed = before - transactions.len();
        drop(transactions);

        if removed > 0 {
            tracing::debug!(removed, "swept stale transactions");
        }
        removed
    }

    pub fn active_transactions(&self) -> usize {
        self.transactions.lock().len()
    }
}

impl SpanProcessor for TraceCorrelator {
    fn process_span(&self, span: &Span) {
        TraceCorrelator::process_span(self, span);
    }
}
