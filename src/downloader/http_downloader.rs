use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock as StdRwLock};

use reqwest::Client;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::config::{Config, MIN_PARALLEL_SIZE};
use crate::downloader::instance_state::InstanceState;
use crate::downloader::monitor::{Monitor, PauseGate};
use crate::downloader::sink::{self, SharedSink, WriterAt};
use crate::downloader::worker::{probe_url, Worker};
use crate::error::DownloadError;
use crate::progress::observer::DownloadObserver;
use crate::progress::status::DownloadStatus;
use crate::types::types::{Range, RangeCursor};

/// Bounded capacity of the status channel; ticks never block on a slow
/// consumer, stale snapshots are simply dropped.
const STATUS_CHANNEL_CAPACITY: usize = 8;

type ObserverSlot = Arc<StdRwLock<Option<Arc<dyn DownloadObserver>>>>;

/// A computed execution plan: how many workers run, the byte range each
/// one owns, and the per-worker cache size.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Plan {
    pub parallel: usize,
    pub cache_size: usize,
    pub ranges: Vec<Range>,
}

/// Decide the worker count for a fresh ranged plan: bounded by
/// `max_parallel`, and clamped so every block holds at least
/// [`MIN_PARALLEL_SIZE`] bytes.
pub fn clamp_parallel(max_parallel: usize, total_size: i64) -> usize {
    let by_size = total_size / MIN_PARALLEL_SIZE + 1;
    (max_parallel as i64).min(by_size).max(1) as usize
}

/// Split `[0, total-1]` across `parallel` workers. The first range starts
/// at 0, each subsequent range begins one past the previous end, and the
/// last range absorbs the remainder.
pub fn partition_ranges(total_size: i64, parallel: usize) -> Vec<Range> {
    let block = total_size / parallel as i64;
    let mut ranges = Vec::with_capacity(parallel);
    let mut begin = 0i64;
    for i in 0..parallel {
        let end = if i == parallel - 1 {
            total_size - 1
        } else {
            (i as i64 + 1) * block
        };
        ranges.push(Range::new(begin, end));
        begin = end + 1;
    }
    ranges
}

/// Build the full plan for a run: resumed ranges are reused as-is (their
/// count fixes the parallelism), unknown-length streams get one unbounded
/// range, and everything else is partitioned fresh. The cache is capped so
/// it never exceeds a block.
pub fn build_plan(total_size: i64, config: &Config, resumed: Option<Vec<Range>>) -> Plan {
    if total_size <= 0 {
        return Plan {
            parallel: 1,
            cache_size: config.cache_size,
            ranges: vec![Range::new(0, -1)],
        };
    }

    let (parallel, ranges) = match resumed {
        Some(ranges) if !ranges.is_empty() => (ranges.len(), ranges),
        _ => {
            let parallel = clamp_parallel(config.max_parallel, total_size);
            (parallel, partition_ranges(total_size, parallel))
        }
    };

    let block = total_size / parallel as i64;
    let cache_size = (config.cache_size as i64).min(block).max(1) as usize;

    Plan {
        parallel,
        cache_size,
        ranges,
    }
}

/// Control surface usable while `execute` is in flight.
///
/// `execute` holds the downloader's exclusive borrow, so concurrent pause,
/// resume, and cancel go through a cloned handle obtained from
/// [`HttpDownloader::control`] beforehand.
#[derive(Clone)]
pub struct DownloadControl {
    pause: Arc<PauseGate>,
    cancel: CancellationToken,
    cancel_fired: Arc<AtomicBool>,
    started: Arc<AtomicBool>,
    observer: ObserverSlot,
}

impl DownloadControl {
    fn new() -> Self {
        Self {
            pause: Arc::new(PauseGate::new()),
            cancel: CancellationToken::new(),
            cancel_fired: Arc::new(AtomicBool::new(false)),
            started: Arc::new(AtomicBool::new(false)),
            observer: Arc::new(StdRwLock::new(None)),
        }
    }

    fn observer_handle(&self) -> Option<Arc<dyn DownloadObserver>> {
        self.observer.read().ok().and_then(|guard| guard.clone())
    }

    /// Block workers at their next flush boundary. No-op before the run
    /// starts or after cancellation.
    pub async fn pause(&self) {
        if !self.started.load(Ordering::Acquire) || self.cancel.is_cancelled() {
            return;
        }
        if self.pause.pause() {
            if let Some(obs) = self.observer_handle() {
                obs.on_pause().await;
            }
        }
    }

    /// Wake paused workers. No-op unless currently paused.
    pub async fn resume(&self) {
        if !self.started.load(Ordering::Acquire) {
            return;
        }
        if self.pause.resume() {
            if let Some(obs) = self.observer_handle() {
                obs.on_resume().await;
            }
        }
    }

    /// Cooperatively cancel the run. Committed bytes and the instance
    /// state are retained for a later resume.
    pub async fn cancel(&self) {
        if !self.started.load(Ordering::Acquire) {
            return;
        }
        if !self.cancel_fired.swap(true, Ordering::AcqRel) {
            if let Some(obs) = self.observer_handle() {
                obs.on_cancel().await;
            }
            self.cancel.cancel();
        }
    }
}

/// Orchestration facade for one download.
///
/// Probes the URL, loads or synthesizes the instance state, computes the
/// partition plan, runs the workers under the [`Monitor`], removes the
/// checkpoint on success, and fires lifecycle events. Single-use: `execute`
/// may be called once per instance.
pub struct HttpDownloader {
    url: String,
    sink: Option<Box<dyn WriterAt>>,
    config: Config,
    client: Option<Client>,
    referer: Option<String>,
    control: DownloadControl,
    status_tx: Option<mpsc::Sender<DownloadStatus>>,
    status_rx: Option<mpsc::Receiver<DownloadStatus>>,
}

impl HttpDownloader {
    /// Construct without performing any I/O. The sink may only be `None`
    /// for test-mode configs.
    pub fn new(url: impl Into<String>, sink: Option<Box<dyn WriterAt>>, config: Config) -> Self {
        let (status_tx, status_rx) = mpsc::channel(STATUS_CHANNEL_CAPACITY);
        Self {
            url: url.into(),
            sink,
            config,
            client: None,
            referer: None,
            control: DownloadControl::new(),
            status_tx: Some(status_tx),
            status_rx: Some(status_rx),
        }
    }

    /// Inject the shared HTTP client. Required before `execute`.
    pub fn set_client(&mut self, client: Client) {
        self.client = Some(client);
    }

    /// Referer to send with every worker fetch.
    pub fn set_referer(&mut self, referer: impl Into<String>) {
        self.referer = Some(referer.into());
    }

    /// Attach the lifecycle observer. At most one is held; a later call
    /// replaces the earlier one.
    pub fn set_observer(&mut self, observer: Arc<dyn DownloadObserver>) {
        if let Ok(mut slot) = self.control.observer.write() {
            *slot = Some(observer);
        }
    }

    /// Handle for pausing, resuming, and cancelling while `execute` runs.
    pub fn control(&self) -> DownloadControl {
        self.control.clone()
    }

    /// Take the status receiver: one snapshot roughly every second, a final
    /// snapshot when the run ends, then the channel closes. Returns `None`
    /// after the first call.
    pub fn status_stream(&mut self) -> Option<mpsc::Receiver<DownloadStatus>> {
        self.status_rx.take()
    }

    pub async fn pause(&self) {
        self.control.pause().await;
    }

    pub async fn resume(&self) {
        self.control.resume().await;
    }

    pub async fn cancel(&self) {
        self.control.cancel().await;
    }

    /// Probe, plan, and run the download to completion.
    pub async fn execute(&mut self) -> Result<(), DownloadError> {
        // Taking the sender doubles as the single-use guard; dropping it on
        // any exit path closes the status stream.
        let status_tx = self
            .status_tx
            .take()
            .ok_or_else(|| DownloadError::Config("execute may only be called once".to_string()))?;
        let client = self
            .client
            .clone()
            .ok_or_else(|| DownloadError::Config("no HTTP client injected".to_string()))?;

        let mut config = self.config.clone();
        config.sanitize();

        let probe = probe_url(&client, &self.url).await?;
        let total = probe.content_length;
        let ranged = total > 0;
        if ranged {
            if let Some(accept) = &probe.accept_ranges {
                if accept.eq_ignore_ascii_case("none") {
                    log::debug!(
                        "[execute] server advertises Accept-Ranges: none; \
                         assuming range support from the content length"
                    );
                }
            }
        }

        // The instance state only exists for ranged, non-test runs.
        let instance_state = if ranged && !config.is_test {
            config.instance_state_path.clone().map(InstanceState::new)
        } else {
            None
        };
        let resumed = instance_state.as_ref().and_then(|s| s.load(total));
        let resuming = resumed.is_some();

        let plan = build_plan(total, &config, resumed);
        log::debug!(
            "[execute] total={}, parallel={}, cache_size={}, resuming={}",
            total,
            plan.parallel,
            plan.cache_size,
            resuming
        );

        let sink: Option<SharedSink> = if config.is_test {
            None
        } else {
            match self.sink.take() {
                Some(s) => Some(sink::shared(s)),
                None => return Err(DownloadError::Config("no sink provided".to_string())),
            }
        };

        let mut monitor = Monitor::new(total, self.control.cancel.clone(), status_tx);
        for (i, range) in plan.ranges.iter().enumerate() {
            let cursor = Arc::new(RangeCursor::new(*range));
            let mut worker = Worker::new(
                i as i32,
                probe.final_url.clone(),
                client.clone(),
                cursor,
                sink.clone(),
                plan.cache_size,
                ranged,
            );
            if let Some(referer) = &self.referer {
                worker.set_referer(referer.clone());
            }
            worker.set_pause_gate(Arc::clone(&self.control.pause));
            worker.set_cancel_token(self.control.cancel.clone());
            monitor.append(worker);
        }
        if let Some(state) = &instance_state {
            monitor.set_instance_state(state.clone());
        }

        if let Some(obs) = self.control.observer_handle() {
            obs.on_execute().await;
        }
        self.control.started.store(true, Ordering::Release);

        let result = monitor.execute().await;

        self.control.started.store(false, Ordering::Release);

        if result.is_ok() {
            if let Some(state) = &instance_state {
                state.remove();
            }
        }
        if let Some(obs) = self.control.observer_handle() {
            obs.on_finish().await;
        }
        result
    }
}
