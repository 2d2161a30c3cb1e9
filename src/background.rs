//! Periodic maintenance loops.
//!
//! - endpoint scan: refreshes runtime and memory gauges and feeds the aggregate
//!   snapshot to the profiler's polling trigger
//! - transaction sweep: evicts idle N+1 state
//!
//! Both stop when the shared cancellation token fires.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::correlator::TraceCorrelator;
use crate::metrics::{MetricsAggregator, RuntimeSampler};
use crate::profiling::ProfileController;

/// Handles to the running loops. Dropping this does not stop them; call
/// [`BackgroundTasks::stop`].
pub struct BackgroundTasks {
    shutdown: CancellationToken,
    handles: Vec<JoinHandle<()>>,
}

impl BackgroundTasks {
    /// Must be called from within a Tokio runtime.
    pub fn start(
        metrics: Arc<MetricsAggregator>,
        correlator: Arc<TraceCorrelator>,
        profiler: Arc<ProfileController>,
        scan_interval: Duration,
    ) -> Self {
        let shutdown = CancellationToken::new();
        let mut handles = Vec::with_capacity(2);

        if profiler.config().enabled {
            handles.push(spawn_endpoint_scan(
                metrics,
                profiler,
                scan_interval,
                shutdown.clone(),
            ));
        }
        if correlator.config().enabled {
            let sweep_interval = correlator.config().sweep_interval;
            handles.push(spawn_transaction_sweep(
                correlator,
                sweep_interval,
                shutdown.clone(),
            ));
        }

        tracing::debug!(tasks = handles.len(), "background tasks started");
        Self { shutdown, handles }
    }

    /// No loops; used when the pipeline is disabled.
    pub fn idle() -> Self {
        Self {
            shutdown: CancellationToken::new(),
            handles: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Signal every loop and wait for them to exit.
    pub async fn stop(self) {
        self.shutdown.cancel();
        for handle in self.handles {
            // A panicked loop has nothing left to clean up.
            let _ = handle.await;
        }
        tracing::debug!("background tasks stopped");
    }
}

fn ticker(period: Duration) -> tokio::time::Interval {
    // First tick one full period after start, not immediately.
    let period = period.max(Duration::from_millis(1));
    let mut interval = interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval
}

fn spawn_endpoint_scan(
    metrics: Arc<MetricsAggregator>,
    profiler: Arc<ProfileController>,
    period: Duration,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = ticker(period);
        let mut sampler = RuntimeSampler::new();
        loop {
            tokio::select! {
                biased;
                () = shutdown.cancelled() => break,
                _ = interval.tick() => {
                    metrics.record_runtime(sampler.sample());
                    let fired = profiler.check_snapshot(&metrics.snapshot());
                    if !fired.is_empty() {
                        tracing::debug!(endpoints = fired.len(), "endpoint scan over threshold");
                    }
                }
            }
        }
    })
}

fn spawn_transaction_sweep(
    correlator: Arc<TraceCorrelator>,
    period: Duration,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = ticker(period);
        loop {
            tokio::select! {
                biased;
                () = shutdown.cancelled() => break,
                _ = interval.tick() => {
                    correlator.sweep();
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::correlator::CorrelatorConfig;
    use crate::profiling::{ProfilingConfig, UnsupportedProfiler};
    use crate::span::Span;

    fn components(
        idle: Duration,
        sweep: Duration,
    ) -> (Arc<MetricsAggregator>, Arc<TraceCorrelator>, Arc<ProfileController>) {
        let metrics = Arc::new(MetricsAggregator::new());
        let correlator = Arc::new(TraceCorrelator::new(
            CorrelatorConfig {
                idle_timeout: idle,
                sweep_interval: sweep,
                ..CorrelatorConfig::default()
            },
            metrics.clone(),
        ));
        let profiler = Arc::new(ProfileController::new(
            ProfilingConfig {
                latency_threshold: Duration::from_millis(100),
                cooldown: Duration::from_secs(60),
                ..ProfilingConfig::default()
            },
            Arc::new(UnsupportedProfiler),
        ));
        (metrics, correlator, profiler)
    }

    #[tokio::test]
    async fn sweep_loop_evicts_idle_transactions() {
        let (metrics, correlator, profiler) =
            components(Duration::from_millis(20), Duration::from_millis(25));
        correlator.process_span(&Span::server("t1", "/users"));
        assert_eq!(correlator.active_transactions(), 1);

        let tasks = BackgroundTasks::start(metrics, correlator.clone(), profiler, Duration::from_secs(60));
        assert_eq!(tasks.len(), 2);

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(correlator.active_transactions(), 0);
        tasks.stop().await;
    }

    #[tokio::test]
    async fn scan_loop_triggers_slow_endpoints() {
        let (metrics, correlator, profiler) =
            components(Duration::from_secs(120), Duration::from_secs(60));
        metrics.record_server_request("/slow", Duration::from_millis(400), 200);

        let tasks = BackgroundTasks::start(
            metrics.clone(),
            correlator,
            profiler.clone(),
            Duration::from_millis(20),
        );
        tokio::time::sleep(Duration::from_millis(120)).await;
        tasks.stop().await;

        assert!(profiler.is_cooling_down("/slow"));
        let runtime = metrics.snapshot().runtime_metrics;
        assert!(runtime.num_workers >= 1);
        assert!(runtime.memory_rss_bytes > 0);
    }

    #[tokio::test]
    async fn stop_returns_promptly() {
        let (metrics, correlator, profiler) =
            components(Duration::from_secs(120), Duration::from_secs(3600));
        let tasks = BackgroundTasks::start(metrics, correlator, profiler, Duration::from_secs(3600));
        tokio::time::timeout(Duration::from_secs(1), tasks.stop())
            .await
            .expect("loops should observe cancellation");
    }

    #[tokio::test]
    async fn idle_has_no_tasks() {
        let tasks = BackgroundTasks::idle();
        assert!(tasks.is_empty());
        tasks.stop().await;
    }
}
