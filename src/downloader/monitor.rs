use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::stream::{FuturesUnordered, StreamExt};
use tokio::sync::mpsc;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use crate::downloader::instance_state::InstanceState;
use crate::downloader::worker::Worker;
use crate::error::DownloadError;
use crate::progress::status::DownloadStatus;
use crate::types::types::{Range, RangeCursor};

/// Monitor tick cadence; also the status publication cadence.
const TICK: Duration = Duration::from_secs(1);

/// EMA smoothing factor for the speed estimate. 0.3 = responsive but stable.
const EMA_ALPHA: f64 = 0.3;

/// Pause flag shared between the control surface and the workers.
///
/// Workers park in [`wait_while_paused`](PauseGate::wait_while_paused) at
/// their flush boundaries; `resume` wakes all of them.
#[derive(Debug, Default)]
pub struct PauseGate {
    paused: AtomicBool,
    notify: Notify,
}

impl PauseGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the flag. Returns true when this call performed the transition.
    pub fn pause(&self) -> bool {
        !self.paused.swap(true, Ordering::AcqRel)
    }

    /// Clear the flag and wake parked workers. Returns true when this call
    /// performed the transition.
    pub fn resume(&self) -> bool {
        let was_paused = self.paused.swap(false, Ordering::AcqRel);
        if was_paused {
            self.notify.notify_waiters();
        }
        was_paused
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Acquire)
    }

    /// Resolve once the flag is clear. Returns immediately when not paused.
    pub async fn wait_while_paused(&self) {
        loop {
            if !self.is_paused() {
                return;
            }
            let notified = self.notify.notified();
            // Re-check after registering so a resume between the check and
            // the registration is not lost.
            if !self.is_paused() {
                return;
            }
            notified.await;
        }
    }
}

/// Runs the worker set to completion.
///
/// Workers are spawned as independent tasks; a 1 Hz tick loop runs
/// alongside them, refreshing the speed estimate, publishing status
/// snapshots, and persisting the instance state. The run loop exits only
/// once every worker task has finished. The first fatal worker error
/// cancels the remaining workers and is propagated to the caller; the
/// instance state survives every exit except a clean success (the facade
/// removes it).
pub struct Monitor {
    workers: Vec<Worker>,
    cursors: Vec<Arc<RangeCursor>>,
    instance_state: Option<InstanceState>,
    total_size: i64,
    cancel: CancellationToken,
    status_tx: mpsc::Sender<DownloadStatus>,
}

impl Monitor {
    pub fn new(
        total_size: i64,
        cancel: CancellationToken,
        status_tx: mpsc::Sender<DownloadStatus>,
    ) -> Self {
        Self {
            workers: Vec::new(),
            cursors: Vec::new(),
            instance_state: None,
            total_size,
            cancel,
            status_tx,
        }
    }

    pub fn append(&mut self, worker: Worker) {
        self.cursors.push(worker.cursor());
        self.workers.push(worker);
    }

    pub fn set_instance_state(&mut self, state: InstanceState) {
        self.instance_state = Some(state);
    }

    /// Sum of committed bytes across all ranges.
    fn downloaded(&self) -> i64 {
        self.cursors.iter().map(|c| c.downloaded()).sum()
    }

    fn snapshot_ranges(&self) -> Vec<Range> {
        self.cursors.iter().map(|c| c.snapshot()).collect()
    }

    fn checkpoint(&self) {
        if let Some(state) = &self.instance_state {
            if let Err(e) = state.save(self.total_size, &self.snapshot_ranges()) {
                log::warn!("[monitor] instance state save failed: {}", e);
            }
        }
    }

    pub async fn execute(mut self) -> Result<(), DownloadError> {
        let started = Instant::now();

        let mut tasks: FuturesUnordered<_> = self
            .workers
            .drain(..)
            .map(|worker| tokio::spawn(worker.run()))
            .collect();
        let mut pending = tasks.len();

        let mut interval = tokio::time::interval(TICK);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        let mut speed = 0.0f64;
        let mut last_downloaded = self.downloaded();
        let mut last_tick = Instant::now();
        let mut first_error: Option<DownloadError> = None;

        while pending > 0 {
            tokio::select! {
                Some(joined) = tasks.next() => {
                    pending -= 1;
                    let outcome = match joined {
                        Ok(outcome) => outcome,
                        Err(e) => Err(DownloadError::Network(format!("worker task aborted: {}", e))),
                    };
                    match outcome {
                        Ok(()) => {}
                        Err(DownloadError::Cancelled) => {
                            if first_error.is_none() {
                                first_error = Some(DownloadError::Cancelled);
                            }
                        }
                        Err(e) => {
                            // Abort the whole run on the first fatal worker
                            // error; the checkpoint lets a later run resume.
                            if matches!(first_error, None | Some(DownloadError::Cancelled)) {
                                first_error = Some(e);
                            }
                            self.cancel.cancel();
                        }
                    }
                }
                _ = interval.tick() => {
                    let now = Instant::now();
                    let downloaded = self.downloaded();
                    let dt = now.duration_since(last_tick).as_secs_f64();
                    if dt > 0.0 {
                        let instant_speed = (downloaded - last_downloaded).max(0) as f64 / dt;
                        speed = EMA_ALPHA * instant_speed + (1.0 - EMA_ALPHA) * speed;
                    }
                    last_downloaded = downloaded;
                    last_tick = now;

                    let _ = self.status_tx.try_send(DownloadStatus {
                        total_size: self.total_size,
                        downloaded,
                        speed,
                        time_elapsed: started.elapsed(),
                    });
                    self.checkpoint();
                }
            }
        }

        // Final snapshot before the status channel closes, then a final
        // checkpoint so the cursors on disk match the sink exactly.
        let _ = self.status_tx.try_send(DownloadStatus {
            total_size: self.total_size,
            downloaded: self.downloaded(),
            speed,
            time_elapsed: started.elapsed(),
        });
        self.checkpoint();

        match first_error {
            None => Ok(()),
            Some(e) => Err(e),
        }
    }
}
