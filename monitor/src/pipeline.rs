//! The watcher loop: notifications in, persisted events out.
//!
//! A [`WatcherLoop`] owns the [`StateTable`] by value, so it is the only
//! writer of file state. Notifications are handled one at a time in arrival
//! order: digest on a blocking thread, classify, stamp provenance and time,
//! append to the sink, then forward to the optional output channel.
//!
//! ```text
//! Idle ──subscribe/attach──▶ Watching ──shutdown──▶ Draining ──▶ Stopped
//! ```
//!
//! On shutdown the subscription is dropped and the channel closed, so no new
//! notifications are accepted; everything already buffered is still processed.

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::classifier::{classify, removed_subtree, Notification};
use crate::digest::Digester;
use crate::retry::RetryPolicy;
use crate::sink::EventSink;
use crate::state::StateTable;
use crate::types::{Change, FileEvent, Provenance};
use crate::watcher::{FileWatcher, WatcherError};

/// Lifecycle of a [`WatcherLoop`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopPhase {
    Idle,
    Watching,
    Draining,
    Stopped,
}

/// An event handed to downstream consumers, in emission order.
#[derive(Debug, Clone, PartialEq)]
pub struct EmittedEvent {
    /// Store id, or `None` if the append was dropped after exhausting retries.
    pub id: Option<i64>,
    pub event: FileEvent,
}

/// Counters collected over one run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoopReport {
    /// Notifications received.
    pub notifications: u64,
    /// Events produced. A removed directory yields one per file it held.
    pub emitted: u64,
    /// Notifications that produced no event.
    pub suppressed: u64,
    /// Events the sink accepted.
    pub persisted: u64,
    /// Events given up on after the last append attempt failed.
    pub dropped: u64,
}

/// Single-consumer change-detection loop.
pub struct WatcherLoop<S: StateTable> {
    state: S,
    digester: Arc<dyn Digester>,
    sink: Arc<dyn EventSink>,
    provenance: Provenance,
    retry: RetryPolicy,
    phase: LoopPhase,
    watcher: Option<FileWatcher>,
    receiver: Option<mpsc::Receiver<Notification>>,
    output: Option<mpsc::Sender<EmittedEvent>>,
    report: LoopReport,
}

impl<S: StateTable> WatcherLoop<S> {
    pub fn new(
        state: S,
        digester: Arc<dyn Digester>,
        sink: Arc<dyn EventSink>,
        provenance: Provenance,
    ) -> Self {
        Self {
            state,
            digester,
            sink,
            provenance,
            retry: RetryPolicy::default(),
            phase: LoopPhase::Idle,
            watcher: None,
            receiver: None,
            output: None,
            report: LoopReport::default(),
        }
    }

    /// Sets how appends are retried.
    #[must_use]
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Forwards every emitted event to `output`.
    #[must_use]
    pub fn with_output(mut self, output: mpsc::Sender<EmittedEvent>) -> Self {
        self.output = Some(output);
        self
    }

    #[must_use]
    pub fn phase(&self) -> LoopPhase {
        self.phase
    }

    #[must_use]
    pub fn state(&self) -> &S {
        &self.state
    }

    #[must_use]
    pub fn report(&self) -> LoopReport {
        self.report
    }

    /// Subscribes to `watch_dir` recursively. Idle → Watching.
    ///
    /// # Errors
    ///
    /// Returns [`WatcherError::NotIdle`] if the loop already has a source, or
    /// the subscription error if the directory cannot be watched. The loop
    /// stays idle on failure.
    pub fn subscribe(&mut self, watch_dir: PathBuf, capacity: usize) -> Result<(), WatcherError> {
        if self.phase != LoopPhase::Idle {
            return Err(WatcherError::NotIdle);
        }
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let watcher = FileWatcher::new(watch_dir, tx)?;
        self.watcher = Some(watcher);
        self.receiver = Some(rx);
        self.phase = LoopPhase::Watching;
        Ok(())
    }

    /// Uses `receiver` as the notification source. Idle → Watching.
    ///
    /// # Errors
    ///
    /// Returns [`WatcherError::NotIdle`] if the loop already has a source.
    pub fn attach(&mut self, receiver: mpsc::Receiver<Notification>) -> Result<(), WatcherError> {
        if self.phase != LoopPhase::Idle {
            return Err(WatcherError::NotIdle);
        }
        self.receiver = Some(receiver);
        self.phase = LoopPhase::Watching;
        Ok(())
    }

    /// Processes notifications until `shutdown` resolves or the source closes,
    /// then drains what is buffered and stops.
    ///
    /// # Errors
    ///
    /// Returns [`WatcherError::NotSubscribed`] if called without a source.
    pub async fn run<F>(&mut self, shutdown: F) -> Result<LoopReport, WatcherError>
    where
        F: Future<Output = ()>,
    {
        let mut receiver = self.receiver.take().ok_or(WatcherError::NotSubscribed)?;
        tokio::pin!(shutdown);

        info!(
            known_files = self.state.len(),
            endpoint = %self.provenance.endpoint,
            "Watcher loop started"
        );

        loop {
            tokio::select! {
                biased;
                () = &mut shutdown => {
                    info!("Shutdown requested, draining notifications");
                    break;
                }
                next = receiver.recv() => match next {
                    Some(notification) => self.process(notification).await,
                    None => {
                        info!("Notification source closed");
                        break;
                    }
                },
            }
        }

        self.phase = LoopPhase::Draining;
        self.watcher = None;
        receiver.close();
        while let Some(notification) = receiver.recv().await {
            self.process(notification).await;
        }
        self.phase = LoopPhase::Stopped;

        info!(
            notifications = self.report.notifications,
            emitted = self.report.emitted,
            suppressed = self.report.suppressed,
            persisted = self.report.persisted,
            dropped = self.report.dropped,
            "Watcher loop stopped"
        );

        Ok(self.report)
    }

    async fn process(&mut self, notification: Notification) {
        self.report.notifications += 1;

        let reading = if notification.needs_digest() {
            let digester = Arc::clone(&self.digester);
            let path = notification.path().to_path_buf();
            match tokio::task::spawn_blocking(move || digester.digest(&path)).await {
                Ok(result) => Some(result),
                Err(e) => {
                    error!(error = %e, "Digest task failed");
                    None
                }
            }
        } else {
            None
        };

        let changes = match classify(&mut self.state, &notification, reading) {
            Some(change) => vec![change],
            None => match &notification {
                Notification::Removed(dir) => removed_subtree(&mut self.state, dir),
                _ => Vec::new(),
            },
        };

        if changes.is_empty() {
            self.report.suppressed += 1;
            return;
        }
        for change in changes {
            self.emit(change).await;
        }
    }

    async fn emit(&mut self, change: Change) {
        let event = FileEvent::from_change(change, &self.provenance, Utc::now());
        self.report.emitted += 1;

        let id = self.append_with_retry(&event).await;
        if id.is_some() {
            self.report.persisted += 1;
        } else {
            self.report.dropped += 1;
        }

        let closed = match &self.output {
            Some(output) => output.send(EmittedEvent { id, event }).await.is_err(),
            None => false,
        };
        if closed {
            debug!("Output channel closed, no longer forwarding events");
            self.output = None;
        }
    }

    async fn append_with_retry(&self, event: &FileEvent) -> Option<i64> {
        let max_attempts = self.retry.max_attempts;

        for attempt in 1..=max_attempts {
            let sink = Arc::clone(&self.sink);
            let record = event.clone();
            let result = match tokio::task::spawn_blocking(move || sink.append(&record)).await {
                Ok(result) => result.map_err(|e| e.to_string()),
                Err(e) => Err(e.to_string()),
            };

            match result {
                Ok(id) => {
                    debug!(
                        id,
                        event_type = %event.event_type,
                        path = %event.file_path.display(),
                        "Event recorded"
                    );
                    return Some(id);
                }
                Err(e) if attempt < max_attempts => {
                    let delay = self.retry.delay_for(attempt);
                    warn!(
                        attempt,
                        max_attempts,
                        error = %e,
                        delay_ms = delay.as_millis() as u64,
                        "Append failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    warn!(
                        attempts = max_attempts,
                        error = %e,
                        event_type = %event.event_type,
                        path = %event.file_path.display(),
                        "Dropping event after exhausting append retries"
                    );
                }
            }
        }

        None
    }
}
