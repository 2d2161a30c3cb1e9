use std::path::Path;
use std::time::Duration;

use super::ProfileError;

/// The process-wide CPU sampling facility.
///
/// `profile` blocks for `duration` and leaves one artifact at `output`.
/// Only one call may be in flight at a time; `ProfileController` enforces it.
pub trait CpuProfiler: Send + Sync {
    fn profile(&self, duration: Duration, output: &Path) -> Result<(), ProfileError>;
}

/// Signal-driven sampler writing a protobuf `pprof` profile.
#[cfg(unix)]
pub struct PprofProfiler {
    frequency: i32,
}

#[cfg(unix)]
impl PprofProfiler {
    /// Samples per second.
    pub const DEFAULT_FREQUENCY: i32 = 100;

    pub fn new(frequency: i32) -> Self {
        Self { frequency }
    }
}

#[cfg(unix)]
impl Default for PprofProfiler {
    fn default() -> Self {
        Self::new(Self::DEFAULT_FREQUENCY)
    }
}

#[cfg(unix)]
impl CpuProfiler for PprofProfiler {
    fn profile(&self, duration: Duration, output: &Path) -> Result<(), ProfileError> {
        use pprof::protos::Message;
        use std::io::Write;

        // Create the file first so an unwritable location fails before sampling.
        let mut file = std::fs::File::create(output).map_err(|source| ProfileError::CreateFile {
            path: output.to_path_buf(),
            source,
        })?;

        let guard = pprof::ProfilerGuardBuilder::default()
            .frequency(self.frequency)
            .build()
            .map_err(|e| ProfileError::Start(e.to_string()))?;

        std::thread::sleep(duration);

        let report = guard
            .report()
            .build()
            .map_err(|e| ProfileError::Report(e.to_string()))?;
        let profile = report
            .pprof()
            .map_err(|e| ProfileError::Report(e.to_string()))?;
        drop(guard);

        let mut content = Vec::new();
        profile
            .encode(&mut content)
            .map_err(|e| ProfileError::Encode(e.to_string()))?;

        file.write_all(&content).map_err(|source| ProfileError::Write {
            path: output.to_path_buf(),
            source,
        })
    }
}

/// Stand-in for targets without a sampler; every session fails cleanly.
pub struct UnsupportedProfiler;

impl CpuProfiler for UnsupportedProfiler {
    fn profile(&self, _duration: Duration, _output: &Path) -> Result<(), ProfileError> {
        Err(ProfileError::Unsupported)
    }
}

/// Best sampler available on this platform.
pub fn default_profiler() -> std::sync::Arc<dyn CpuProfiler> {
    #[cfg(unix)]
    {
        std::sync::Arc::new(PprofProfiler::default())
    }
    #[cfg(not(unix))]
    {
        std::sync::Arc::new(UnsupportedProfiler)
    }
}

/// `<dir>/profile_<path with '/' as '_'>_<unix seconds>.pprof`
pub fn artifact_path(dir: &Path, endpoint: &str, unix_secs: i64) -> std::path::PathBuf {
    let sanitized = endpoint.replace('/', "_");
    dir.join(format!("profile_{sanitized}_{unix_secs}.pprof"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn artifact_name_is_derived_from_path_and_time() {
        let p = artifact_path(Path::new("/tmp"), "/api/users", 1_700_000_000);
        assert_eq!(p, Path::new("/tmp/profile__api_users_1700000000.pprof"));
    }

    #[test]
    fn unsupported_profiler_reports_error() {
        let err = UnsupportedProfiler
            .profile(Duration::ZERO, Path::new("/nonexistent"))
            .unwrap_err();
        assert!(matches!(err, ProfileError::Unsupported));
    }
}
