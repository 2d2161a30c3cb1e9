use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use hdrhistogram::Histogram;
use parking_lot::RwLock;
use serde::Serialize;

use super::percentiles::{latency_histogram, PercentileSet};
use super::ring_buffer::RingBuffer;
use super::{ErrorEvent, NPlusOneEvent, RuntimeStats, DEFAULT_EVENT_CAPACITY};

// ─── Public types ────────────────────────────────────────────────

/// Thread-safe aggregate store.
/// The span router writes into it, reporters and the endpoint scan call
/// `snapshot()`.
pub struct MetricsAggregator {
    inner: RwLock<Inner>,
}

/// Read-only copy of one aggregate (an endpoint or the client total).
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RequestStatsSnapshot {
    pub total_requests: u64,
    pub avg_request_time_ns: u64,
    /// Same average, human readable (`"150ms"`).
    pub avg_request_time: String,
    pub status_2xx: u64,
    pub status_4xx: u64,
    pub status_5xx: u64,
    pub latency_us: PercentileSet,
}

/// Point-in-time copy of everything the aggregator holds.
/// Owns all of its data; callers may keep it as long as they like.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Snapshot {
    pub server_endpoints: BTreeMap<String, RequestStatsSnapshot>,
    pub client_metrics: RequestStatsSnapshot,
    pub runtime_metrics: RuntimeStats,
    pub errors: Vec<ErrorEvent>,
    pub n_plus_one_events: Vec<NPlusOneEvent>,
}

// ─── Internal state ──────────────────────────────────────────────

struct Inner {
    server_endpoints: HashMap<String, RequestStats>,
    client: RequestStats,
    runtime: RuntimeStats,
    errors: RingBuffer<ErrorEvent>,
    n_plus_one_events: RingBuffer<NPlusOneEvent>,
}

/// Running totals for one aggregate.
struct RequestStats {
    total_requests: u64,
    total_time_ns: u64,
    status_2xx: u64,
    status_4xx: u64,
    status_5xx: u64,
    latency: Histogram<u64>,
}

// ─── MetricsAggregator impl ──────────────────────────────────────

impl MetricsAggregator {
    pub fn new() -> Self {
        Self::with_event_capacity(DEFAULT_EVENT_CAPACITY)
    }

    /// `capacity` bounds both the error log and the N+1 log.
    pub fn with_event_capacity(capacity: usize) -> Self {
        Self {
            inner: RwLock::new(Inner::new(capacity)),
        }
    }

    /// Record one completed inbound request on `path`.
    pub fn record_server_request(&self, path: &str, duration: Duration, status_code: u16) {
        let mut inner = self.inner.write();
        match inner.server_endpoints.get_mut(path) {
            Some(stats) => stats.record(duration, status_code),
            None => {
                let mut stats = RequestStats::new();
                stats.record(duration, status_code);
                inner.server_endpoints.insert(path.to_owned(), stats);
            }
        }
    }

    /// Record one outbound call. All calls share a single aggregate.
    pub fn record_client_request(&self, duration: Duration, status_code: u16) {
        self.inner.write().client.record(duration, status_code);
    }

    pub fn record_error(&self, event: ErrorEvent) {
        self.inner.write().errors.push(event);
    }

    pub fn record_anomaly(&self, event: NPlusOneEvent) {
        self.inner.write().n_plus_one_events.push(event);
    }

    /// Timestamped N+1 event for `query` seen `count` times under `path`.
    pub fn record_n_plus_one(&self, path: &str, query: &str, count: usize) {
        self.record_anomaly(NPlusOneEvent::new(path, query, count));
    }

    pub fn record_runtime(&self, stats: RuntimeStats) {
        self.inner.write().runtime = stats;
    }

    /// Wipe all data, keeping the configured event capacity.
    pub fn reset(&self) {
        let mut inner = self.inner.write();
        let capacity = inner.errors.capacity();
        *inner = Inner::new(capacity);
    }

    pub fn snapshot(&self) -> Snapshot {
        self.inner.read().snapshot()
    }
}

impl Default for MetricsAggregator {
    fn default() -> Self {
        Self::new()
    }
}

// ─── Inner impl ──────────────────────────────────────────────────

impl Inner {
    fn new(capacity: usize) -> Self {
        Self {
            server_endpoints: HashMap::new(),
            client: RequestStats::new(),
            runtime: RuntimeStats::default(),
            errors: RingBuffer::new(capacity),
            n_plus_one_events: RingBuffer::new(capacity),
        }
    }

    fn snapshot(&self) -> Snapshot {
        Snapshot {
            server_endpoints: self
                .server_endpoints
                .iter()
                .map(|(path, stats)| (path.clone(), stats.snapshot()))
                .collect(),
            client_metrics: self.client.snapshot(),
            runtime_metrics: self.runtime,
            errors: self.errors.to_vec(),
            n_plus_one_events: self.n_plus_one_events.to_vec(),
        }
    }
}

// ─── RequestStats impl ───────────────────────────────────────────

impl RequestStats {
    fn new() -> Self {
        Self {
            total_requests: 0,
            total_time_ns: 0,
            status_2xx: 0,
            status_4xx: 0,
            status_5xx: 0,
            latency: latency_histogram(),
        }
    }

    fn record(&mut self, duration: Duration, status_code: u16) {
        let nanos = u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX);
        self.total_requests += 1;
        self.total_time_ns = self.total_time_ns.saturating_add(nanos);

        // Redirects and unknown codes (0) count as success.
        match status_code {
            500..=u16::MAX => self.status_5xx += 1,
            400..=499 => self.status_4xx += 1,
            _ => self.status_2xx += 1,
        }

        let micros = u64::try_from(duration.as_micros()).unwrap_or(u64::MAX);
        self.latency.saturating_record(micros.max(1));
    }

    fn average_ns(&self) -> u64 {
        if self.total_requests == 0 {
            0
        } else {
            self.total_time_ns / self.total_requests
        }
    }

    fn snapshot(&self) -> RequestStatsSnapshot {
        let avg = self.average_ns();
        RequestStatsSnapshot {
            total_requests: self.total_requests,
            avg_request_time_ns: avg,
            avg_request_time: format!("{:?}", Duration::from_nanos(avg)),
            status_2xx: self.status_2xx,
            status_4xx: self.status_4xx,
            status_5xx: self.status_5xx,
            latency_us: PercentileSet::from_histogram(&self.latency),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use chrono::Utc;

    fn ms(v: u64) -> Duration {
        Duration::from_millis(v)
    }

    #[test]
    fn counts_and_average_per_endpoint() {
        let agg = MetricsAggregator::new();
        agg.record_server_request("/users", Duration::from_nanos(100), 200);
        agg.record_server_request("/users", Duration::from_nanos(200), 404);
        agg.record_server_request("/users", Duration::from_nanos(301), 503);

        let snap = agg.snapshot();
        let users = &snap.server_endpoints["/users"];
        assert_eq!(users.total_requests, 3);
        assert_eq!(users.status_2xx + users.status_4xx + users.status_5xx, 3);
        assert_eq!((users.status_2xx, users.status_4xx, users.status_5xx), (1, 1, 1));
        // floor(601 / 3)
        assert_eq!(users.avg_request_time_ns, 200);
    }

    #[test]
    fn redirect_counts_as_success() {
        let agg = MetricsAggregator::new();
        agg.record_server_request("/login", ms(5), 302);
        let snap = agg.snapshot();
        assert_eq!(snap.server_endpoints["/login"].status_2xx, 1);
        assert_eq!(snap.server_endpoints["/login"].status_4xx, 0);
    }

    #[test]
    fn status_boundaries() {
        let agg = MetricsAggregator::new();
        for code in [0, 199, 399, 400, 499, 500, 599] {
            agg.record_client_request(ms(1), code);
        }
        let client = agg.snapshot().client_metrics;
        assert_eq!(client.status_2xx, 3);
        assert_eq!(client.status_4xx, 2);
        assert_eq!(client.status_5xx, 2);
    }

    #[test]
    fn empty_aggregate_reports_zero_average() {
        let snap = MetricsAggregator::new().snapshot();
        assert!(snap.server_endpoints.is_empty());
        assert_eq!(snap.client_metrics.total_requests, 0);
        assert_eq!(snap.client_metrics.avg_request_time_ns, 0);
        assert_eq!(snap.client_metrics.avg_request_time, "0ns");
    }

    #[test]
    fn readable_average() {
        let agg = MetricsAggregator::new();
        agg.record_server_request("/slow", ms(150), 200);
        assert_eq!(agg.snapshot().server_endpoints["/slow"].avg_request_time, "150ms");
    }

    #[test]
    fn snapshot_is_detached_from_live_state() {
        let agg = MetricsAggregator::new();
        agg.record_server_request("/a", ms(1), 200);
        agg.record_n_plus_one("/a", "SELECT 1", 10);
        let before = agg.snapshot();

        agg.record_server_request("/a", ms(1), 200);
        agg.record_n_plus_one("/a", "SELECT 2", 10);

        assert_eq!(before.server_endpoints["/a"].total_requests, 1);
        assert_eq!(before.n_plus_one_events.len(), 1);
        assert_eq!(agg.snapshot().server_endpoints["/a"].total_requests, 2);
    }

    #[test]
    fn event_logs_are_bounded() {
        let agg = MetricsAggregator::with_event_capacity(2);
        for i in 0..5 {
            agg.record_error(ErrorEvent {
                timestamp: Utc::now(),
                method: "GET".into(),
                path: format!("/e{i}"),
                error: String::new(),
            });
        }
        let paths: Vec<_> = agg.snapshot().errors.into_iter().map(|e| e.path).collect();
        assert_eq!(paths, vec!["/e3", "/e4"]);
    }

    #[test]
    fn reset_keeps_capacity() {
        let agg = MetricsAggregator::with_event_capacity(1);
        agg.record_server_request("/a", ms(1), 200);
        agg.reset();
        agg.record_n_plus_one("/a", "q1", 3);
        agg.record_n_plus_one("/a", "q2", 3);

        let snap = agg.snapshot();
        assert!(snap.server_endpoints.is_empty());
        assert_eq!(snap.n_plus_one_events.len(), 1);
        assert_eq!(snap.n_plus_one_events[0].query, "q2");
    }

    #[test]
    fn concurrent_writers_lose_nothing() {
        let agg = Arc::new(MetricsAggregator::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let agg = agg.clone();
                std::thread::spawn(move || {
                    for _ in 0..500 {
                        agg.record_server_request("/hot", Duration::from_nanos(10), 200);
                        agg.record_client_request(Duration::from_nanos(10), 0);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        let snap = agg.snapshot();
        assert_eq!(snap.server_endpoints["/hot"].total_requests, 4_000);
        assert_eq!(snap.server_endpoints["/hot"].avg_request_time_ns, 10);
        assert_eq!(snap.client_metrics.total_requests, 4_000);
    }

    #[test]
    fn snapshot_serializes_with_report_field_names() {
        let agg = MetricsAggregator::new();
        agg.record_server_request("/p", ms(2), 200);
        let json = serde_json::to_value(agg.snapshot()).unwrap();
        let endpoint = &json["server_endpoints"]["/p"];
        for key in [
            "total_requests",
            "avg_request_time_ns",
            "avg_request_time",
            "status_2xx",
            "status_4xx",
            "status_5xx",
        ] {
            assert!(endpoint.get(key).is_some(), "missing {key}");
        }
        assert!(json.get("client_metrics").is_some());
        assert!(json["errors"].is_array());
        assert!(json["n_plus_one_events"].is_array());
    }
}
