use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use super::backend::{artifact_path, CpuProfiler};
use crate::metrics::Snapshot;
use crate::router::SlowRequestTrigger;

// ─── Configuration ───────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct ProfilingConfig {
    pub enabled: bool,
    /// A single request, or an endpoint average, above this starts a session.
    pub latency_threshold: Duration,
    /// 5xx count at which the periodic scan profiles an endpoint; 0 disables.
    pub error_threshold: u64,
    pub session_duration: Duration,
    /// Minimum spacing between two sessions for the same path.
    pub cooldown: Duration,
    pub output_dir: PathBuf,
}

impl Default for ProfilingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            latency_threshold: Duration::from_millis(500),
            error_threshold: 5,
            session_duration: Duration::from_secs(30),
            cooldown: Duration::from_secs(300),
            output_dir: std::env::temp_dir(),
        }
    }
}

// ─── Outcomes ────────────────────────────────────────────────────

/// What a trigger attempt decided.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerOutcome {
    Disabled,
    BelowThreshold,
    /// The path was profiled recently; nothing changed.
    CoolingDown,
    /// Another session holds the profiler. The cooldown is still consumed.
    Busy,
    Started,
}

#[derive(Debug, Clone, Copy)]
enum TriggerReason {
    Latency(Duration),
    Errors(u64),
}

// ─── ProfileController ───────────────────────────────────────────

pub struct ProfileController {
    config: ProfilingConfig,
    backend: Arc<dyn CpuProfiler>,
    cooldowns: Mutex<HashMap<String, Instant>>,
    /// Single permit: the sampler is process-wide.
    session: Arc<Semaphore>,
    active: Arc<Mutex<Option<String>>>,
}

impl ProfileController {
    pub fn new(config: ProfilingConfig, backend: Arc<dyn CpuProfiler>) -> Self {
        if config.enabled {
            tracing::info!(
                latency_threshold_ms = config.latency_threshold.as_millis() as u64,
                error_threshold = config.error_threshold,
                cooldown_s = config.cooldown.as_secs(),
                "on-demand profiler enabled"
            );
        }
        Self {
            config,
            backend,
            cooldowns: Mutex::new(HashMap::new()),
            session: Arc::new(Semaphore::new(1)),
            active: Arc::new(Mutex::new(None)),
        }
    }

    pub fn config(&self) -> &ProfilingConfig {
        &self.config
    }

    /// Immediate path: one completed request took `observed`.
    pub fn profile_if_slow(&self, path: &str, observed: Duration) -> TriggerOutcome {
        if !self.config.enabled {
            return TriggerOutcome::Disabled;
        }
        if observed <= self.config.latency_threshold {
            return TriggerOutcome::BelowThreshold;
        }
        self.trigger(path, TriggerReason::Latency(observed))
    }

    /// Polling path: evaluate every endpoint in an aggregate snapshot.
    /// Returns the decision for each endpoint that crossed a threshold.
    pub fn check_snapshot(&self, snapshot: &Snapshot) -> Vec<(String, TriggerOutcome)> {
        if !self.config.enabled {
            return Vec::new();
        }

        let latency_ns = u64::try_from(self.config.latency_threshold.as_nanos()).unwrap_or(u64::MAX);
        let error_threshold = self.config.error_threshold;

        snapshot
            .server_endpoints
            .iter()
            .filter_map(|(path, stats)| {
                let reason = if stats.avg_request_time_ns > latency_ns {
                    TriggerReason::Latency(Duration::from_nanos(stats.avg_request_time_ns))
                } else if error_threshold > 0 && stats.status_5xx >= error_threshold {
                    TriggerReason::Errors(stats.status_5xx)
                } else {
                    return None;
                };
                Some((path.clone(), self.trigger(path, reason)))
            })
            .collect()
    }

    pub fn is_cooling_down(&self, path: &str) -> bool {
        let mut cooldowns = self.cooldowns.lock();
        Self::cooling(&mut cooldowns, path, Instant::now())
    }

    /// Path currently being profiled, if any.
    pub fn active_session(&self) -> Option<String> {
        self.active.lock().clone()
    }

    // ── Internals ───────────────────────────────────────────────

    /// Expired entries are removed as they are looked at.
    fn cooling(cooldowns: &mut HashMap<String, Instant>, path: &str, now: Instant) -> bool {
        match cooldowns.get(path) {
            Some(until) if now < *until => true,
            Some(_) => {
                cooldowns.remove(path);
                false
            }
            None => false,
        }
    }

    fn trigger(&self, path: &str, reason: TriggerReason) -> TriggerOutcome {
        // Check and arm the cooldown under one lock so concurrent triggers
        // for the same path start at most one session. Armed before the
        // attempt: a failing attempt still waits out the full cooldown.
        {
            let now = Instant::now();
            let mut cooldowns = self.cooldowns.lock();
            if Self::cooling(&mut cooldowns, path, now) {
                tracing::debug!(path, "endpoint over threshold but cooling down");
                return TriggerOutcome::CoolingDown;
            }
            cooldowns.insert(path.to_owned(), now + self.config.cooldown);
        }

        match reason {
            TriggerReason::Latency(d) => tracing::info!(
                path,
                latency_ms = d.as_secs_f64() * 1000.0,
                "endpoint exceeded latency threshold, starting CPU profile"
            ),
            TriggerReason::Errors(n) => tracing::info!(
                path,
                errors = n,
                "endpoint exceeded error threshold, starting CPU profile"
            ),
        }

        let permit = match self.session.clone().try_acquire_owned() {
            Ok(permit) => permit,
            Err(_) => {
                tracing::warn!(
                    path,
                    active = ?self.active_session(),
                    "profiler busy with another session, dropping request"
                );
                return TriggerOutcome::Busy;
            }
        };

        *self.active.lock() = Some(path.to_owned());
        self.spawn_session(path.to_owned(), permit);
        TriggerOutcome::Started
    }

    fn spawn_session(&self, path: String, permit: OwnedSemaphorePermit) {
        let session = Session {
            output: artifact_path(&self.config.output_dir, &path, chrono::Utc::now().timestamp()),
            path,
            duration: self.config.session_duration,
            backend: self.backend.clone(),
            active: self.active.clone(),
            _permit: permit,
        };

        // Sampling sleeps for the whole session; keep it off async workers.
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn_blocking(move || session.run());
            }
            Err(_) => {
                let spawned = std::thread::Builder::new()
                    .name("apm-profiler".into())
                    .spawn(move || session.run());
                if let Err(e) = spawned {
                    // The closure (and the permit inside it) is dropped here.
                    tracing::error!(error = %e, "failed to spawn profiling thread");
                    *self.active.lock() = None;
                }
            }
        }
    }
}

impl SlowRequestTrigger for ProfileController {
    fn trigger_if_slow(&self, path: &str, duration: Duration) {
        self.profile_if_slow(path, duration);
    }
}

// ─── Session ─────────────────────────────────────────────────────

/// One running profile. Dropping it frees the profiler.
struct Session {
    path: String,
    output: PathBuf,
    duration: Duration,
    backend: Arc<dyn CpuProfiler>,
    active: Arc<Mutex<Option<String>>>,
    _permit: OwnedSemaphorePermit,
}

impl Session {
    fn run(self) {
        match self.backend.profile(self.duration, &self.output) {
            Ok(()) => tracing::info!(
                path = %self.path,
                file = %self.output.display(),
                "CPU profile completed"
            ),
            Err(e) => tracing::error!(path = %self.path, error = %e, "CPU profile failed"),
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        // Clear before the permit field is released.
        *self.active.lock() = None;
    }
}
