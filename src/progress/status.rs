use std::fmt;
use std::time::Duration;

use serde::Serialize;

/// Aggregate transfer counters, published on the status channel roughly
/// once per second while a download runs.
#[derive(Debug, Clone, Serialize)]
pub struct DownloadStatus {
    /// Probed object size; -1 when the remote did not report a length.
    pub total_size: i64,
    /// Sum of committed bytes across all ranges.
    pub downloaded: i64,
    /// EMA-smoothed throughput in bytes per second.
    pub speed: f64,
    /// Wall-clock time since the monitor started.
    pub time_elapsed: Duration,
}

impl fmt::Display for DownloadStatus {
    /// Renders a one-line progress summary, e.g.
    /// `256.0 KB/1.00 MB 128.0 KB/s in 2.0s`.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let total = if self.total_size >= 0 {
            format_bytes(self.total_size as u64)
        } else {
            "?".to_string()
        };
        write!(
            f,
            "{}/{} {}/s in {:.1}s",
            format_bytes(self.downloaded.max(0) as u64),
            total,
            format_bytes(self.speed as u64),
            self.time_elapsed.as_secs_f64()
        )
    }
}

/// Human-readable byte formatting.
pub fn format_bytes(bytes: u64) -> String {
    const KB: f64 = 1024.0;
    const MB: f64 = 1024.0 * 1024.0;
    const GB: f64 = 1024.0 * 1024.0 * 1024.0;

    let b = bytes as f64;
    if b >= GB {
        format!("{:.2} GB", b / GB)
    } else if b >= MB {
        format!("{:.2} MB", b / MB)
    } else if b >= KB {
        format!("{:.1} KB", b / KB)
    } else {
        format!("{} B", bytes)
    }
}
