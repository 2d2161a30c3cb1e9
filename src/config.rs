//! Probe configuration.
//!
//! The core only consumes an [`ApmConfig`] value. [`ApmConfig::from_env`]
//! fills one from `APM_*` environment variables; missing or invalid values
//! fall back to the defaults below without failing.
//!
//! | Variable | Default |
//! |---|---|
//! | `APM_ENABLED` | true |
//! | `APM_DEBUG_ENDPOINT` | `/debug/apm` |
//! | `APM_LISTEN_ADDR` | `0.0.0.0:8080` |
//! | `APM_COLLECTION_INTERVAL_S` | 10 |
//! | `APM_EVENT_BUFFER_SIZE` | 100 |
//! | `APM_PROFILING_ENABLED` | true |
//! | `APM_PROFILING_LATENCY_THRESHOLD_MS` | 500 |
//! | `APM_PROFILING_DURATION_S` | 30 |
//! | `APM_PROFILING_COOLDOWN_S` | 300 |
//! | `APM_PROFILING_ERROR_THRESHOLD_COUNT` | 5 |
//! | `APM_PROFILING_OUTPUT_DIR` | OS temp dir |
//! | `APM_N_PLUS_ONE_ENABLED` | true |
//! | `APM_N_PLUS_ONE_THRESHOLD_COUNT` | 10 |
//! | `APM_N_PLUS_ONE_IDLE_TIMEOUT_S` | 120 |
//! | `APM_N_PLUS_ONE_SWEEP_INTERVAL_S` | 60 |
//! | `APM_N_PLUS_ONE_NORMALIZE` | `exact` |
//! | `APM_LOG_FORMAT` | `pretty` |
//! | `APM_LOG_LEVEL` | `info` |
//! | `APM_LOG_FILE` | unset (stderr) |

use std::path::PathBuf;
use std::time::Duration;

use crate::correlator::{CorrelatorConfig, StatementNormalization};
use crate::logging::{LogConfig, LogFormat};
use crate::metrics::DEFAULT_EVENT_CAPACITY;
use crate::profiling::ProfilingConfig;

#[derive(Debug, Clone)]
pub struct ApmConfig {
    /// Master switch; when off spans are dropped on arrival.
    pub enabled: bool,
    /// Route serving the JSON snapshot.
    pub debug_endpoint: String,
    pub listen_addr: String,
    /// Period of the endpoint scan that drives polling-triggered profiling.
    pub collection_interval: Duration,
    pub event_capacity: usize,
    pub profiling: ProfilingConfig,
    pub correlator: CorrelatorConfig,
    pub log: LogConfig,
}

impl Default for ApmConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            debug_endpoint: "/debug/apm".into(),
            listen_addr: "0.0.0.0:8080".into(),
            collection_interval: Duration::from_secs(10),
            event_capacity: DEFAULT_EVENT_CAPACITY,
            profiling: ProfilingConfig::default(),
            correlator: CorrelatorConfig::default(),
            log: LogConfig::default(),
        }
    }
}

impl ApmConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key source. `from_env` passes the process
    /// environment; tests pass a map.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let d = Self::default();
        let env = Lookup(lookup);

        let profiling = ProfilingConfig {
            enabled: env.bool("APM_PROFILING_ENABLED", d.profiling.enabled),
            latency_threshold: env.millis(
                "APM_PROFILING_LATENCY_THRESHOLD_MS",
                d.profiling.latency_threshold,
            ),
            error_threshold: env.parse("APM_PROFILING_ERROR_THRESHOLD_COUNT", d.profiling.error_threshold),
            session_duration: env.secs("APM_PROFILING_DURATION_S", d.profiling.session_duration),
            cooldown: env.secs("APM_PROFILING_COOLDOWN_S", d.profiling.cooldown),
            output_dir: env
                .string("APM_PROFILING_OUTPUT_DIR")
                .map(PathBuf::from)
                .unwrap_or(d.profiling.output_dir),
        };

        let normalization = match env.string("APM_N_PLUS_ONE_NORMALIZE").as_deref() {
            Some("numeric") => StatementNormalization::NumericLiterals,
            _ => StatementNormalization::Exact,
        };
        let correlator = CorrelatorConfig {
            enabled: env.bool("APM_N_PLUS_ONE_ENABLED", d.correlator.enabled),
            threshold: env
                .parse("APM_N_PLUS_ONE_THRESHOLD_COUNT", d.correlator.threshold)
                .max(1),
            idle_timeout: env.secs("APM_N_PLUS_ONE_IDLE_TIMEOUT_S", d.correlator.idle_timeout),
            sweep_interval: env.secs("APM_N_PLUS_ONE_SWEEP_INTERVAL_S", d.correlator.sweep_interval),
            normalization,
        };

        let log = LogConfig {
            format: match env.string("APM_LOG_FORMAT").as_deref() {
                Some("json") => LogFormat::Json,
                _ => LogFormat::Pretty,
            },
            level: env.string("APM_LOG_LEVEL").unwrap_or(d.log.level),
            file: env.string("APM_LOG_FILE").map(PathBuf::from),
        };

        Self {
            enabled: env.bool("APM_ENABLED", d.enabled),
            debug_endpoint: env.string("APM_DEBUG_ENDPOINT").unwrap_or(d.debug_endpoint),
            listen_addr: env.string("APM_LISTEN_ADDR").unwrap_or(d.listen_addr),
            collection_interval: env.secs("APM_COLLECTION_INTERVAL_S", d.collection_interval),
            event_capacity: env.parse("APM_EVENT_BUFFER_SIZE", d.event_capacity).max(1),
            profiling,
            correlator,
            log,
        }
    }
}

// ─── Parsing helpers ─────────────────────────────────────────────

struct Lookup<F>(F);

impl<F: Fn(&str) -> Option<String>> Lookup<F> {
    fn string(&self, key: &str) -> Option<String> {
        (self.0)(key).filter(|v| !v.trim().is_empty())
    }

    fn parse<T: std::str::FromStr>(&self, key: &str, default: T) -> T {
        self.string(key)
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(default)
    }

    /// Accepts the usual spellings: true/false, 1/0, yes/no, on/off.
    fn bool(&self, key: &str, default: bool) -> bool {
        match self.string(key).map(|v| v.trim().to_ascii_lowercase()).as_deref() {
            Some("1" | "true" | "yes" | "on") => true,
            Some("0" | "false" | "no" | "off") => false,
            _ => default,
        }
    }

    fn secs(&self, key: &str, default: Duration) -> Duration {
        self.string(key)
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map(Duration::from_secs)
            .unwrap_or(default)
    }

    fn millis(&self, key: &str, default: Duration) -> Duration {
        self.string(key)
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map(Duration::from_millis)
            .unwrap_or(default)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn from_pairs(pairs: &[(&str, &str)]) -> ApmConfig {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ApmConfig::from_lookup(|k| map.get(k).cloned())
    }

    #[test]
    fn defaults_when_nothing_is_set() {
        let cfg = from_pairs(&[]);
        assert!(cfg.enabled);
        assert_eq!(cfg.debug_endpoint, "/debug/apm");
        assert_eq!(cfg.collection_interval, Duration::from_secs(10));
        assert_eq!(cfg.event_capacity, 100);
        assert_eq!(cfg.profiling.latency_threshold, Duration::from_millis(500));
        assert_eq!(cfg.profiling.session_duration, Duration::from_secs(30));
        assert_eq!(cfg.profiling.cooldown, Duration::from_secs(300));
        assert_eq!(cfg.profiling.error_threshold, 5);
        assert_eq!(cfg.correlator.threshold, 10);
        assert_eq!(cfg.correlator.idle_timeout, Duration::from_secs(120));
        assert_eq!(cfg.correlator.sweep_interval, Duration::from_secs(60));
        assert_eq!(cfg.correlator.normalization, StatementNormalization::Exact);
        assert_eq!(cfg.log.format, LogFormat::Pretty);
        assert!(cfg.log.file.is_none());
    }

    #[test]
    fn values_are_read_with_their_units() {
        let cfg = from_pairs(&[
            ("APM_ENABLED", "false"),
            ("APM_PROFILING_LATENCY_THRESHOLD_MS", "250"),
            ("APM_PROFILING_COOLDOWN_S", "60"),
            ("APM_N_PLUS_ONE_THRESHOLD_COUNT", "4"),
            ("APM_N_PLUS_ONE_NORMALIZE", "numeric"),
            ("APM_PROFILING_OUTPUT_DIR", "/var/tmp/profiles"),
            ("APM_LOG_FORMAT", "json"),
            ("APM_LOG_FILE", "/var/log/apm-probe.log"),
        ]);
        assert!(!cfg.enabled);
        assert_eq!(cfg.profiling.latency_threshold, Duration::from_millis(250));
        assert_eq!(cfg.profiling.cooldown, Duration::from_secs(60));
        assert_eq!(cfg.correlator.threshold, 4);
        assert_eq!(
            cfg.correlator.normalization,
            StatementNormalization::NumericLiterals
        );
        assert_eq!(cfg.profiling.output_dir, PathBuf::from("/var/tmp/profiles"));
        assert_eq!(cfg.log.format, LogFormat::Json);
        assert_eq!(cfg.log.file, Some(PathBuf::from("/var/log/apm-probe.log")));
    }

    #[test]
    fn invalid_values_fall_back() {
        let cfg = from_pairs(&[
            ("APM_ENABLED", "maybe"),
            ("APM_COLLECTION_INTERVAL_S", "soon"),
            ("APM_N_PLUS_ONE_THRESHOLD_COUNT", "0"),
            ("APM_EVENT_BUFFER_SIZE", "-3"),
        ]);
        assert!(cfg.enabled);
        assert_eq!(cfg.collection_interval, Duration::from_secs(10));
        assert_eq!(cfg.correlator.threshold, 1);
        assert_eq!(cfg.event_capacity, 100);
    }
}
