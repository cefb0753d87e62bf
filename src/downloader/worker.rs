use std::sync::{Arc, RwLock as StdRwLock};

use futures::StreamExt;
use reqwest::{header, Client, StatusCode};
use tokio_util::sync::CancellationToken;

use crate::downloader::monitor::PauseGate;
use crate::downloader::sink::SharedSink;
use crate::error::DownloadError;
use crate::types::types::{ProbeResult, RangeCursor, WorkerState};

/// Issue the planning probe: a HEAD request for the target URL.
///
/// Transport failures map to `Network`; a 4xx/5xx answer maps to `Remote`.
/// The advertised content length decides range capability downstream
/// (servers that report a length but reject ranges are only discovered by
/// the first worker fetch).
pub async fn probe_url(client: &Client, url: &str) -> Result<ProbeResult, DownloadError> {
    let resp = client.head(url).send().await?;

    let status = resp.status();
    if status.is_client_error() || status.is_server_error() {
        return Err(DownloadError::Remote(status));
    }

    let content_length = resp
        .headers()
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.parse::<i64>().ok())
        .unwrap_or(-1);
    let accept_ranges = resp
        .headers()
        .get(header::ACCEPT_RANGES)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string());

    let probe = ProbeResult {
        content_length,
        final_url: resp.url().to_string(),
        accept_ranges,
    };
    log::debug!(
        "[probe_url] content_length={}, final_url={}, accept_ranges={:?}",
        probe.content_length,
        probe.final_url,
        probe.accept_ranges
    );
    Ok(probe)
}

/// Fetches one byte range and deposits it at the correct absolute offset in
/// the shared sink.
///
/// The response body is streamed into a bounded in-memory cache; when the
/// cache fills (or the body ends) the bytes are committed under the shared
/// write lock and the range cursor advances. The cursor therefore never
/// overstates what the sink holds; an interrupted worker loses at most one
/// uncommitted cache buffer.
pub struct Worker {
    id: i32,
    url: String,
    referer: Option<String>,
    client: Client,
    cursor: Arc<RangeCursor>,
    sink: Option<SharedSink>,
    cache_size: usize,
    ranged: bool,
    pause: Arc<PauseGate>,
    cancel: CancellationToken,
    state: Arc<StdRwLock<WorkerState>>,
}

impl Worker {
    pub fn new(
        id: i32,
        url: String,
        client: Client,
        cursor: Arc<RangeCursor>,
        sink: Option<SharedSink>,
        cache_size: usize,
        ranged: bool,
    ) -> Self {
        Self {
            id,
            url,
            referer: None,
            client,
            cursor,
            sink,
            cache_size,
            ranged,
            pause: Arc::new(PauseGate::new()),
            cancel: CancellationToken::new(),
            state: Arc::new(StdRwLock::new(WorkerState::Idle)),
        }
    }

    pub fn id(&self) -> i32 {
        self.id
    }

    pub fn set_referer(&mut self, referer: String) {
        self.referer = Some(referer);
    }

    pub fn set_pause_gate(&mut self, pause: Arc<PauseGate>) {
        self.pause = pause;
    }

    pub fn set_cancel_token(&mut self, cancel: CancellationToken) {
        self.cancel = cancel;
    }

    /// Shared cursor handle, read by the monitor for status and checkpoints.
    pub fn cursor(&self) -> Arc<RangeCursor> {
        Arc::clone(&self.cursor)
    }

    /// Shared state handle for observability.
    pub fn state(&self) -> Arc<StdRwLock<WorkerState>> {
        Arc::clone(&self.state)
    }

    fn set_state(&self, state: WorkerState) {
        if let Ok(mut guard) = self.state.write() {
            *guard = state;
        }
    }

    /// Drive this worker's range to completion.
    pub async fn run(self) -> Result<(), DownloadError> {
        if self.ranged && self.cursor.is_done() {
            // Nothing left from a previous run.
            log::debug!("[worker {}] range already complete, skipping", self.id);
            self.set_state(WorkerState::Done);
            return Ok(());
        }

        self.set_state(WorkerState::Running);
        let result = self.fetch().await;
        match &result {
            Ok(()) => self.set_state(WorkerState::Done),
            Err(DownloadError::Cancelled) => self.set_state(WorkerState::Cancelled),
            Err(e) => {
                log::warn!("[worker {}] failed: {}", self.id, e);
                self.set_state(WorkerState::Failed);
            }
        }
        result
    }

    async fn fetch(&self) -> Result<(), DownloadError> {
        self.wait_if_paused().await?;

        let mut req = self.client.get(&self.url);
        if self.ranged {
            req = req.header(
                header::RANGE,
                format!("bytes={}-{}", self.cursor.position(), self.cursor.end()),
            );
        }
        if let Some(referer) = &self.referer {
            req = req.header(header::REFERER, referer);
        }

        let resp = tokio::select! {
            r = req.send() => r.map_err(DownloadError::from)?,
            _ = self.cancel.cancelled() => return Err(DownloadError::Cancelled),
        };

        let status = resp.status();
        if self.ranged {
            // A 200 answer to a ranged request means the server ignored the
            // Range header; its body would land at the wrong offsets.
            if status != StatusCode::PARTIAL_CONTENT {
                return Err(DownloadError::Remote(status));
            }
        } else if !status.is_success() {
            return Err(DownloadError::Remote(status));
        }

        let mut cache: Vec<u8> = Vec::with_capacity(self.cache_size);
        let mut stream = resp.bytes_stream();

        'stream: loop {
            let next = tokio::select! {
                n = stream.next() => n,
                _ = self.cancel.cancelled() => return Err(DownloadError::Cancelled),
            };

            let chunk = match next {
                Some(Ok(chunk)) => chunk,
                Some(Err(e)) => {
                    // The uncommitted cache is discarded; the cursor stands
                    // at the last committed byte.
                    return Err(DownloadError::Network(e.to_string()));
                }
                None => break 'stream,
            };

            let mut data: &[u8] = &chunk;
            if self.ranged {
                // Cap at the range's remaining length. A server may send
                // more than the requested window.
                let accepted = self.cursor.downloaded() + cache.len() as i64;
                let left = self.cursor.length() - accepted;
                if left <= 0 {
                    break 'stream;
                }
                let usable = (data.len() as i64).min(left) as usize;
                data = &data[..usable];
            }

            while !data.is_empty() {
                let space = self.cache_size - cache.len();
                let take = space.min(data.len());
                cache.extend_from_slice(&data[..take]);
                data = &data[take..];
                if cache.len() >= self.cache_size {
                    self.commit(&mut cache).await?;
                    self.wait_if_paused().await?;
                }
            }

            if self.ranged
                && self.cursor.downloaded() + cache.len() as i64 >= self.cursor.length()
            {
                break 'stream;
            }
        }

        self.commit(&mut cache).await?;

        if self.ranged && !self.cursor.is_done() {
            return Err(DownloadError::Network(format!(
                "short read: got {} of {} bytes",
                self.cursor.downloaded(),
                self.cursor.length()
            )));
        }
        Ok(())
    }

    /// Flush the cache to the sink at the cursor's absolute offset, under
    /// the shared write lock, then advance the cursor. Without a sink the
    /// bytes are counted and dropped.
    async fn commit(&self, cache: &mut Vec<u8>) -> Result<(), DownloadError> {
        if cache.is_empty() {
            return Ok(());
        }
        if let Some(sink) = &self.sink {
            let offset = self.cursor.position() as u64;
            let mut guard = sink.lock().await;
            guard.write_all_at(offset, cache)?;
        }
        self.cursor.advance(cache.len() as i64);
        cache.clear();
        Ok(())
    }

    /// Park at a flush boundary while the pause flag is set. Cancellation
    /// wins over a pending resume.
    async fn wait_if_paused(&self) -> Result<(), DownloadError> {
        if !self.pause.is_paused() {
            return Ok(());
        }
        self.set_state(WorkerState::Paused);
        tokio::select! {
            _ = self.pause.wait_while_paused() => {}
            _ = self.cancel.cancelled() => return Err(DownloadError::Cancelled),
        }
        self.set_state(WorkerState::Running);
        Ok(())
    }
}
