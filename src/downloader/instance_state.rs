use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::DownloadError;
use crate::types::types::Range;

const STATE_MAGIC: &str = "rangedl-state";
const STATE_VERSION: u32 = 1;

/// On-disk layout of the checkpoint file.
#[derive(Debug, Serialize, Deserialize)]
struct StateFile {
    magic: String,
    version: u32,
    total_size: i64,
    downloaded: i64,
    ranges: Vec<Range>,
}

/// Durable checkpoint of per-range progress.
///
/// Written atomically (temp file + rename) on each monitor tick and on
/// shutdown, read once at execute time, removed after a successful run.
/// A file that fails validation on load is discarded with a warning and
/// the run starts from a fresh plan.
#[derive(Debug, Clone)]
pub struct InstanceState {
    path: PathBuf,
}

impl InstanceState {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load previously persisted ranges. `None` means "no usable prior
    /// progress": the file is absent, unreadable, or inconsistent with the
    /// probed total size.
    pub fn load(&self, expected_total: i64) -> Option<Vec<Range>> {
        let data = match fs::read(&self.path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                log::warn!("[instance_state] failed to read {}: {}", self.path.display(), e);
                return None;
            }
        };

        let file: StateFile = match serde_json::from_slice(&data) {
            Ok(file) => file,
            Err(e) => {
                log::warn!(
                    "[instance_state] discarding unreadable state {}: {}",
                    self.path.display(),
                    e
                );
                return None;
            }
        };

        if let Err(reason) = validate(&file, expected_total) {
            log::warn!(
                "[instance_state] discarding inconsistent state {}: {}",
                self.path.display(),
                reason
            );
            return None;
        }

        Some(file.ranges)
    }

    /// Atomically persist the given range snapshots. The file only becomes
    /// visible under its final name once fully flushed.
    pub fn save(&self, total_size: i64, ranges: &[Range]) -> Result<(), DownloadError> {
        let downloaded: i64 = ranges.iter().map(|r| r.downloaded).sum();
        let file = StateFile {
            magic: STATE_MAGIC.to_string(),
            version: STATE_VERSION,
            total_size,
            downloaded,
            ranges: ranges.to_vec(),
        };
        let data =
            serde_json::to_vec(&file).map_err(|e| DownloadError::Checkpoint(e.to_string()))?;

        let tmp = self.temp_path();
        let write = || -> std::io::Result<()> {
            let mut f = fs::File::create(&tmp)?;
            f.write_all(&data)?;
            f.sync_all()?;
            fs::rename(&tmp, &self.path)
        };
        write().map_err(|e| DownloadError::Checkpoint(e.to_string()))
    }

    /// Delete the checkpoint after a fully committed run.
    pub fn remove(&self) {
        if let Err(e) = fs::remove_file(&self.path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                log::warn!("[instance_state] failed to remove {}: {}", self.path.display(), e);
            }
        }
    }

    fn temp_path(&self) -> PathBuf {
        let mut os = self.path.as_os_str().to_owned();
        os.push(".tmp");
        PathBuf::from(os)
    }
}

/// A loaded state is usable only if its ranges form an exact ordered
/// partition of `[0, total-1]` and no cursor overruns its range.
fn validate(file: &StateFile, expected_total: i64) -> Result<(), String> {
    if file.magic != STATE_MAGIC {
        return Err(format!("bad magic {:?}", file.magic));
    }
    if file.version != STATE_VERSION {
        return Err(format!("unsupported version {}", file.version));
    }
    if file.total_size != expected_total {
        return Err(format!(
            "total size {} does not match probed size {}",
            file.total_size, expected_total
        ));
    }
    if file.ranges.is_empty() {
        return Err("no ranges".to_string());
    }

    let mut expected_begin = 0i64;
    for (i, range) in file.ranges.iter().enumerate() {
        if range.begin != expected_begin {
            return Err(format!(
                "range {} begins at {}, expected {}",
                i, range.begin, expected_begin
            ));
        }
        if range.end < range.begin {
            return Err(format!("range {} is empty ({}-{})", i, range.begin, range.end));
        }
        if range.downloaded < 0 || range.downloaded > range.length() {
            return Err(format!(
                "range {} cursor {} exceeds length {}",
                i,
                range.downloaded,
                range.length()
            ));
        }
        expected_begin = range.end + 1;
    }
    if expected_begin != expected_total {
        return Err(format!(
            "ranges cover [0, {}), expected [0, {})",
            expected_begin, expected_total
        ));
    }
    Ok(())
}
