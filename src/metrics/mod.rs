pub mod aggregator;
pub mod percentiles;
pub mod ring_buffer;

pub use aggregator::{MetricsAggregator, RequestStatsSnapshot, Snapshot};
pub use percentiles::PercentileSet;
pub use ring_buffer::RingBuffer;

use chrono::{DateTime, Utc};
use serde::Serialize;
use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, System};

/// Ring-buffer capacity for error and N+1 events.
pub const DEFAULT_EVENT_CAPACITY: usize = 100;

pub const N_PLUS_ONE_DESCRIPTION: &str = "N+1 query detected";

/// A failed server request (5xx or error status).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorEvent {
    pub timestamp: DateTime<Utc>,
    pub method: String,
    pub path: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub error: String,
}

/// One detected N+1 pattern: `query` ran `count` times within a single
/// transaction rooted at `path`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NPlusOneEvent {
    pub timestamp: DateTime<Utc>,
    pub path: String,
    pub query: String,
    pub count: usize,
    pub description: String,
}

impl NPlusOneEvent {
    pub fn new(path: impl Into<String>, query: impl Into<String>, count: usize) -> Self {
        Self {
            timestamp: Utc::now(),
            path: path.into(),
            query: query.into(),
            count,
            description: N_PLUS_ONE_DESCRIPTION.to_owned(),
        }
    }
}

/// Async-runtime and process-memory gauges captured on every collection tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RuntimeStats {
    pub num_workers: usize,
    pub num_alive_tasks: usize,
    pub global_queue_depth: usize,
    /// Resident set size of this process.
    pub memory_rss_bytes: u64,
    pub memory_virtual_bytes: u64,
}

impl RuntimeStats {
    /// Reads the current Tokio runtime, or zeroes outside of one.
    /// Memory fields stay zero; [`RuntimeSampler`] fills them.
    pub fn capture() -> Self {
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let m = handle.metrics();
                Self {
                    num_workers: m.num_workers(),
                    num_alive_tasks: m.num_alive_tasks(),
                    global_queue_depth: m.global_queue_depth(),
                    ..Self::default()
                }
            }
            Err(_) => Self::default(),
        }
    }
}

/// Owns the `sysinfo` handle used to read this process's memory.
/// Kept by the endpoint scan so only one process entry is refreshed per tick.
pub struct RuntimeSampler {
    system: System,
    pid: Option<Pid>,
}

impl RuntimeSampler {
    pub fn new() -> Self {
        Self {
            system: System::new(),
            pid: sysinfo::get_current_pid().ok(),
        }
    }

    pub fn sample(&mut self) -> RuntimeStats {
        let mut stats = RuntimeStats::capture();
        let Some(pid) = self.pid else {
            return stats;
        };

        self.system.refresh_processes_specifics(
            ProcessesToUpdate::Some(&[pid]),
            true,
            ProcessRefreshKind::nothing().with_memory(),
        );
        if let Some(process) = self.system.process(pid) {
            stats.memory_rss_bytes = process.memory();
            stats.memory_virtual_bytes = process.virtual_memory();
        }
        stats
    }
}

impl Default for RuntimeSampler {
    fn default() -> Self {
        Self::new()
    }
}
