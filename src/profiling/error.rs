use std::path::PathBuf;

use thiserror::Error;

/// Why a profiling session produced no artifact.
#[derive(Debug, Error)]
pub enum ProfileError {
    #[error("failed to create profile file {path}: {source}")]
    CreateFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to start CPU profiler: {0}")]
    Start(String),

    #[error("failed to build profile report: {0}")]
    Report(String),

    #[error("failed to encode profile: {0}")]
    Encode(String),

    #[error("failed to write profile file {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("CPU profiling is not supported on this platform")]
    Unsupported,
}
