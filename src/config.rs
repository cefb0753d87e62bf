use std::ffi::OsString;
use std::path::{Path, PathBuf};

/// Minimum number of bytes a single range is allowed to cover. Parallelism
/// is clamped so no worker is assigned a block below this size.
pub const MIN_PARALLEL_SIZE: i64 = 256 * 1024;

/// Default upper bound on concurrent range fetchers.
pub const DEFAULT_MAX_PARALLEL: usize = 8;

/// Default per-worker cache buffer size in bytes.
pub const DEFAULT_CACHE_SIZE: usize = 256 * 1024;

/// Floor applied to a configured cache size.
pub const MIN_CACHE_SIZE: usize = 1024;

/// Suffix appended to a destination path to derive its instance state path.
/// A file with this suffix next to a destination marks an incomplete run.
pub const INSTANCE_STATE_SUFFIX: &str = ".rangedl-downloading";

/// Static download policy. The values actually used for a run (worker count,
/// effective cache size) are derived at execute time from these bounds and
/// the probed content length.
#[derive(Debug, Clone)]
pub struct Config {
    /// Upper bound on concurrent range fetchers.
    pub max_parallel: usize,
    /// Per-worker in-memory buffer size before a locked flush to the sink.
    pub cache_size: usize,
    /// When true, no sink is written and no instance state is persisted;
    /// the pipeline still probes and fetches, discarding bytes after
    /// counting them.
    pub is_test: bool,
    /// Where to persist per-range progress. `None` disables checkpointing.
    pub instance_state_path: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_parallel: DEFAULT_MAX_PARALLEL,
            cache_size: DEFAULT_CACHE_SIZE,
            is_test: false,
            instance_state_path: None,
        }
    }
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    /// Derive the instance state path for a destination file.
    pub fn instance_state_path_for(destination: &Path) -> PathBuf {
        let mut os = OsString::from(destination.as_os_str());
        os.push(INSTANCE_STATE_SUFFIX);
        PathBuf::from(os)
    }

    /// Clamp out-of-range values to their floors.
    pub(crate) fn sanitize(&mut self) {
        if self.max_parallel == 0 {
            self.max_parallel = 1;
        }
        if self.cache_size < MIN_CACHE_SIZE {
            self.cache_size = MIN_CACHE_SIZE;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_instance_state_path_keeps_extension() {
        let p = Config::instance_state_path_for(Path::new("/tmp/video.mp4"));
        assert_eq!(
            p,
            PathBuf::from(format!("/tmp/video.mp4{}", INSTANCE_STATE_SUFFIX))
        );
    }

    #[test]
    fn test_sanitize_floors() {
        let mut cfg = Config {
            max_parallel: 0,
            cache_size: 10,
            ..Config::default()
        };
        cfg.sanitize();
        assert_eq!(cfg.max_parallel, 1);
        assert_eq!(cfg.cache_size, MIN_CACHE_SIZE);
    }
}
