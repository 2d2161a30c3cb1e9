use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};

// ─── Well-known attribute keys ───────────────────────────────────

pub mod attr {
    /// Present on every database call; the value names the engine.
    pub const DB_SYSTEM: &str = "db.system";
    pub const DB_STATEMENT: &str = "db.statement";
    pub const HTTP_STATUS_CODE: &str = "http.status_code";
    pub const HTTP_METHOD: &str = "http.method";
    pub const EXCEPTION_MESSAGE: &str = "exception.message";
}

// ─── Correlation id ──────────────────────────────────────────────

/// Opaque identifier grouping every span of one logical transaction.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CorrelationId(String);

impl CorrelationId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Fresh random id for a transaction that starts in this process.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().simple().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CorrelationId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

impl From<String> for CorrelationId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

// ─── Span parts ──────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpanKind {
    /// Inbound request handled by this process.
    Server,
    /// Outbound call made while handling a request.
    Client,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SpanStatus {
    #[default]
    Ok,
    Error(String),
}

impl SpanStatus {
    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error(_))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum AttributeValue {
    Str(String),
    Int(i64),
    Float(f64),
    Bool(bool),
}

impl AttributeValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            _ => None,
        }
    }
}

impl From<&str> for AttributeValue {
    fn from(s: &str) -> Self {
        Self::Str(s.to_owned())
    }
}

impl From<String> for AttributeValue {
    fn from(s: String) -> Self {
        Self::Str(s)
    }
}

impl From<i64> for AttributeValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<u16> for AttributeValue {
    fn from(v: u16) -> Self {
        Self::Int(i64::from(v))
    }
}

impl From<f64> for AttributeValue {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<bool> for AttributeValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

// ─── Span ────────────────────────────────────────────────────────

/// One completed operation handed over by instrumentation.
///
/// Built once with the `with_*` methods and never mutated after it is
/// passed to the pipeline.
#[derive(Debug, Clone)]
pub struct Span {
    pub correlation_id: CorrelationId,
    pub kind: SpanKind,
    /// Request path for server spans, operation name for client spans.
    pub name: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub status: SpanStatus,
    pub attributes: HashMap<String, AttributeValue>,
}

impl Span {
    pub fn new(
        correlation_id: impl Into<CorrelationId>,
        kind: SpanKind,
        name: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            correlation_id: correlation_id.into(),
            kind,
            name: name.into(),
            start: now,
            end: now,
            status: SpanStatus::Ok,
            attributes: HashMap::new(),
        }
    }

    pub fn server(correlation_id: impl Into<CorrelationId>, path: impl Into<String>) -> Self {
        Self::new(correlation_id, SpanKind::Server, path)
    }

    pub fn client(correlation_id: impl Into<CorrelationId>, name: impl Into<String>) -> Self {
        Self::new(correlation_id, SpanKind::Client, name)
    }

    /// Client span for a database call carrying the engine marker and statement.
    pub fn db_call(
        correlation_id: impl Into<CorrelationId>,
        system: &str,
        statement: &str,
    ) -> Self {
        Self::client(correlation_id, format!("{system} query"))
            .with_attribute(attr::DB_SYSTEM, system)
            .with_attribute(attr::DB_STATEMENT, statement)
    }

    pub fn with_timing(mut self, start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        self.start = start;
        self.end = end;
        self
    }

    /// Shorthand for tests and generators: ends `duration` after `start`.
    pub fn with_duration(mut self, duration: Duration) -> Self {
        let elapsed = chrono::Duration::from_std(duration).unwrap_or(chrono::Duration::zero());
        self.end = self.start + elapsed;
        self
    }

    pub fn with_status(mut self, status: SpanStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_attribute(mut self, key: &str, value: impl Into<AttributeValue>) -> Self {
        self.attributes.insert(key.to_owned(), value.into());
        self
    }

    pub fn with_status_code(self, code: u16) -> Self {
        self.with_attribute(attr::HTTP_STATUS_CODE, code)
    }

    // ── Derived views ───────────────────────────────────────────

    /// Wall time between start and end; zero if the clock went backwards.
    pub fn duration(&self) -> Duration {
        (self.end - self.start).to_std().unwrap_or(Duration::ZERO)
    }

    pub fn is_server(&self) -> bool {
        self.kind == SpanKind::Server
    }

    pub fn is_db_call(&self) -> bool {
        self.attributes.contains_key(attr::DB_SYSTEM)
    }

    /// Statement text, if present and non-empty.
    pub fn statement(&self) -> Option<&str> {
        self.str_attr(attr::DB_STATEMENT).filter(|s| !s.is_empty())
    }

    /// HTTP status code, if recorded and representable.
    pub fn status_code(&self) -> Option<u16> {
        self.attributes
            .get(attr::HTTP_STATUS_CODE)
            .and_then(AttributeValue::as_i64)
            .and_then(|v| u16::try_from(v).ok())
    }

    pub fn method(&self) -> Option<&str> {
        self.str_attr(attr::HTTP_METHOD)
    }

    /// Best available error text: the status message, then `exception.message`.
    pub fn error_message(&self) -> Option<&str> {
        match &self.status {
            SpanStatus::Error(msg) if !msg.is_empty() => Some(msg),
            _ => self.str_attr(attr::EXCEPTION_MESSAGE),
        }
    }

    fn str_attr(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).and_then(AttributeValue::as_str)
    }
}
