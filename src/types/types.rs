use std::sync::atomic::{AtomicI64, Ordering};

use serde::{Deserialize, Serialize};

/// A half-closed-inclusive byte interval of the remote object
/// (`Range: bytes=begin-end`), with a cursor recording how many of its
/// bytes have been committed to the sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Range {
    pub begin: i64,
    pub end: i64,
    #[serde(default)]
    pub downloaded: i64,
}

impl Range {
    pub fn new(begin: i64, end: i64) -> Self {
        Self {
            begin,
            end,
            downloaded: 0,
        }
    }

    /// Total bytes covered, `end - begin + 1`. -1 when the interval is
    /// unbounded (single-stream download of unknown size).
    pub fn length(&self) -> i64 {
        if self.end < self.begin {
            return -1;
        }
        self.end - self.begin + 1
    }

    pub fn is_done(&self) -> bool {
        let len = self.length();
        len >= 0 && self.downloaded >= len
    }
}

/// Live, shareable form of a [`Range`]. The owning worker advances
/// `downloaded` only after the bytes are committed to the sink, so a
/// concurrent snapshot never overstates progress.
#[derive(Debug)]
pub struct RangeCursor {
    begin: i64,
    end: i64,
    downloaded: AtomicI64,
}

impl RangeCursor {
    pub fn new(range: Range) -> Self {
        Self {
            begin: range.begin,
            end: range.end,
            downloaded: AtomicI64::new(range.downloaded),
        }
    }

    pub fn begin(&self) -> i64 {
        self.begin
    }

    pub fn end(&self) -> i64 {
        self.end
    }

    /// See [`Range::length`].
    pub fn length(&self) -> i64 {
        if self.end < self.begin {
            return -1;
        }
        self.end - self.begin + 1
    }

    /// Committed bytes.
    pub fn downloaded(&self) -> i64 {
        self.downloaded.load(Ordering::Acquire)
    }

    /// Next absolute offset to write at.
    pub fn position(&self) -> i64 {
        self.begin + self.downloaded()
    }

    /// Record `n` freshly committed bytes.
    pub fn advance(&self, n: i64) {
        self.downloaded.fetch_add(n, Ordering::AcqRel);
    }

    pub fn is_done(&self) -> bool {
        let len = self.length();
        len >= 0 && self.downloaded() >= len
    }

    pub fn snapshot(&self) -> Range {
        Range {
            begin: self.begin,
            end: self.end,
            downloaded: self.downloaded(),
        }
    }
}

/// Worker lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Idle,
    Running,
    Paused,
    Done,
    Failed,
    Cancelled,
}

/// Result of the HEAD probe issued before planning.
#[derive(Debug, Clone)]
pub struct ProbeResult {
    /// Advertised content length; -1 when the server did not report one.
    pub content_length: i64,
    /// URL after following redirects; workers fetch from here.
    pub final_url: String,
    /// The literal `Accept-Ranges` header, if present.
    pub accept_ranges: Option<String>,
}
