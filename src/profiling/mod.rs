//! Adaptive CPU profiling: threshold checks, per-path cooldowns and a single
//! exclusive sampler shared by the whole process.

pub mod backend;
pub mod controller;
mod error;

pub use backend::{artifact_path, default_profiler, CpuProfiler, UnsupportedProfiler};
#[cfg(unix)]
pub use backend::PprofProfiler;
pub use controller::{ProfileController, ProfilingConfig, TriggerOutcome};
pub use error::ProfileError;
