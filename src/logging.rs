//! Tracing subscriber setup for the probe binary.
//!
//! Library code only emits `tracing` events; installing a subscriber is the
//! host's choice. The binary installs one from [`LogConfig`], which
//! `ApmConfig::from_env` fills from `APM_LOG_FORMAT`, `APM_LOG_LEVEL` and
//! `APM_LOG_FILE`.

use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use thiserror::Error;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// Multi-line, coloured when writing to a terminal stream.
    #[default]
    Pretty,
    /// One JSON object per event, for log shippers.
    Json,
}

#[derive(Debug, Clone)]
pub struct LogConfig {
    pub format: LogFormat,
    /// `EnvFilter` directive, e.g. `"info"` or `"apm_probe=debug,tower_http=warn"`.
    pub level: String,
    /// Events are appended here; stderr when unset.
    pub file: Option<PathBuf>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::Pretty,
            level: "info".into(),
            file: None,
        }
    }
}

#[derive(Debug, Error)]
pub enum LogError {
    #[error("invalid log filter {directive:?}: {reason}")]
    InvalidFilter { directive: String, reason: String },
    #[error("cannot open log file {}", path.display())]
    FileOpen {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("a global tracing subscriber is already installed")]
    AlreadyInitialized,
}

/// Install the global subscriber. Call once, before the pipeline starts.
///
/// Nothing is installed when the filter or the log file is rejected.
pub fn init_logging(config: &LogConfig) -> Result<(), LogError> {
    let filter = env_filter(&config.level)?;

    let (writer, ansi) = match &config.file {
        Some(path) => (BoxMakeWriter::new(open_append(path)?), false),
        None => (BoxMakeWriter::new(io::stderr), true),
    };

    let layer = match config.format {
        LogFormat::Pretty => fmt::layer()
            .pretty()
            .with_ansi(ansi)
            .with_writer(writer)
            .boxed(),
        LogFormat::Json => fmt::layer()
            .json()
            .with_ansi(false)
            .with_writer(writer)
            .boxed(),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(layer)
        .try_init()
        .map_err(|_| LogError::AlreadyInitialized)
}

fn env_filter(directive: &str) -> Result<EnvFilter, LogError> {
    EnvFilter::try_new(directive).map_err(|e| LogError::InvalidFilter {
        directive: directive.to_owned(),
        reason: e.to_string(),
    })
}

/// Restarts keep earlier output: the file is appended to, never truncated.
fn open_append(path: &Path) -> Result<Mutex<File>, LogError> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map(Mutex::new)
        .map_err(|source| LogError::FileOpen {
            path: path.to_path_buf(),
            source,
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn scratch_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("apm-probe-{}-{name}", uuid::Uuid::new_v4().simple()))
    }

    #[test]
    fn bad_filter_names_the_directive() {
        let err = env_filter("apm_probe=notalevel").unwrap_err();
        assert!(matches!(&err, LogError::InvalidFilter { directive, .. } if directive == "apm_probe=notalevel"));
        assert!(env_filter("apm_probe=debug,tower_http=warn").is_ok());
    }

    #[test]
    fn log_file_is_appended_across_opens() {
        let path = scratch_path("append.log");
        for line in ["first", "second"] {
            let file = open_append(&path).unwrap();
            writeln!(file.lock().unwrap(), "{line}").unwrap();
        }

        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents, "first\nsecond\n");
        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn unreachable_log_file_is_rejected_before_install() {
        let config = LogConfig {
            file: Some(scratch_path("missing-dir").join("probe.log")),
            ..LogConfig::default()
        };
        let err = init_logging(&config).unwrap_err();
        match err {
            LogError::FileOpen { path, source } => {
                assert!(path.ends_with("probe.log"));
                assert_eq!(source.kind(), io::ErrorKind::NotFound);
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
