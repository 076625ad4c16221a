//! Single-in-flight frame dispatch.
//!
//! The dispatcher accepts live frames at camera rate but runs at most one
//! synthesis task at a time. A submission that arrives while a task is in
//! flight is dropped, never queued, so end-to-end latency is bounded by one
//! task plus the cooldown regardless of the camera frame rate.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::sync::{Semaphore, TryAcquireError};
use tokio::task::JoinHandle;
use vizcast_common::config::DispatchSettings;
use vizcast_frame::{Frame, FrameSink};

use crate::router::BackendRouter;

/// Pacing for the dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchOptions {
    /// Delay after a task completes before the slot is released.
    pub cooldown: Duration,
    /// Upper bound on one backend call; slower calls count as failures.
    pub timeout: Duration,
}

impl Default for DispatchOptions {
    fn default() -> Self {
        Self::from(&DispatchSettings::default())
    }
}

impl From<&DispatchSettings> for DispatchOptions {
    fn from(settings: &DispatchSettings) -> Self {
        Self {
            cooldown: Duration::from_millis(settings.cooldown_ms),
            timeout: Duration::from_millis(settings.timeout_ms),
        }
    }
}

/// What happened to a submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// The slot was free; processing started.
    Accepted,
    /// A task was already in flight; the frame was dropped.
    Busy,
    /// The dispatcher is closed; the frame was dropped.
    Closed,
}

/// Dispatcher counters.
#[derive(Debug, Default)]
pub struct DispatchStats {
    submitted: AtomicU64,
    accepted: AtomicU64,
    dropped_busy: AtomicU64,
    delivered: AtomicU64,
    empty: AtomicU64,
    failed: AtomicU64,
}

/// Point-in-time copy of [`DispatchStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStatsSnapshot {
    pub submitted: u64,
    pub accepted: u64,
    pub dropped_busy: u64,
    /// Results handed to the sinks.
    pub delivered: u64,
    /// Backend ran but produced nothing.
    pub empty: u64,
    /// Errors and timeouts.
    pub failed: u64,
}

impl DispatchStats {
    pub fn snapshot(&self) -> DispatchStatsSnapshot {
        DispatchStatsSnapshot {
            submitted: self.submitted.load(Ordering::Relaxed),
            accepted: self.accepted.load(Ordering::Relaxed),
            dropped_busy: self.dropped_busy.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            empty: self.empty.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}

type SinkList = Arc<RwLock<Vec<Arc<dyn FrameSink>>>>;

/// Feeds frame pairs to a [`BackendRouter`] one at a time.
pub struct FrameDispatcher {
    router: Arc<BackendRouter>,
    sinks: SinkList,
    slot: Arc<Semaphore>,
    in_flight: Mutex<Option<JoinHandle<()>>>,
    runtime: Handle,
    options: DispatchOptions,
    closed: AtomicBool,
    stats: Arc<DispatchStats>,
}

impl FrameDispatcher {
    /// Create a dispatcher that spawns its tasks on `runtime`.
    pub fn new(router: Arc<BackendRouter>, options: DispatchOptions, runtime: Handle) -> Self {
        Self {
            router,
            sinks: Arc::new(RwLock::new(Vec::new())),
            slot: Arc::new(Semaphore::new(1)),
            in_flight: Mutex::new(None),
            runtime,
            options,
            closed: AtomicBool::new(false),
            stats: Arc::new(DispatchStats::default()),
        }
    }

    /// Register a sink. Sinks are called in registration order.
    pub fn add_sink(&self, sink: Arc<dyn FrameSink>) {
        tracing::debug!(sink = sink.name(), "Registered result sink");
        self.sinks
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(sink);
    }

    pub fn router(&self) -> &Arc<BackendRouter> {
        &self.router
    }

    pub fn options(&self) -> DispatchOptions {
        self.options
    }

    /// Whether a task currently holds the slot (including its cooldown).
    pub fn is_busy(&self) -> bool {
        !self.is_closed() && self.slot.available_permits() == 0
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn stats(&self) -> DispatchStatsSnapshot {
        self.stats.snapshot()
    }

    /// Offer a frame pair. Never blocks.
    pub fn submit(&self, live: Frame, reference: Frame) -> SubmitOutcome {
        self.stats.submitted.fetch_add(1, Ordering::Relaxed);
        if self.is_closed() {
            return SubmitOutcome::Closed;
        }

        let permit = match self.slot.clone().try_acquire_owned() {
            Ok(permit) => permit,
            Err(TryAcquireError::NoPermits) => {
                self.stats.dropped_busy.fetch_add(1, Ordering::Relaxed);
                tracing::trace!("Dispatcher busy, dropping frame");
                return SubmitOutcome::Busy;
            }
            Err(TryAcquireError::Closed) => return SubmitOutcome::Closed,
        };
        self.stats.accepted.fetch_add(1, Ordering::Relaxed);

        let router = self.router.clone();
        let sinks = self.sinks.clone();
        let stats = self.stats.clone();
        let options = self.options;

        let handle = self.runtime.spawn(async move {
            let outcome = tokio::time::timeout(options.timeout, router.process(&live, &reference)).await;
            match outcome {
                Ok(Ok(Some(frame))) => {
                    deliver(&sinks, frame);
                    stats.delivered.fetch_add(1, Ordering::Relaxed);
                }
                Ok(Ok(None)) => {
                    stats.empty.fetch_add(1, Ordering::Relaxed);
                    tracing::trace!("Backend produced no frame");
                }
                Ok(Err(e)) => {
                    stats.failed.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(error = %e, "Frame synthesis failed; frame dropped");
                }
                Err(_) => {
                    stats.failed.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(
                        timeout_ms = options.timeout.as_millis() as u64,
                        "Frame synthesis timed out; frame dropped"
                    );
                }
            }

            tokio::time::sleep(options.cooldown).await;
            drop(permit);
        });

        *self
            .in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(handle);
        SubmitOutcome::Accepted
    }

    /// Cancel in-flight work and release the router. Later submissions
    /// are no-ops. Safe to call more than once.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.slot.close();

        let in_flight = self
            .in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = in_flight {
            handle.abort();
        }

        self.router.close().await;
        let stats = self.stats();
        tracing::info!(
            submitted = stats.submitted,
            delivered = stats.delivered,
            dropped_busy = stats.dropped_busy,
            failed = stats.failed,
            "Frame dispatcher closed"
        );
    }
}

fn deliver(sinks: &SinkList, frame: Frame) {
    let sinks = sinks.read().unwrap_or_else(PoisonError::into_inner);
    for sink in sinks.iter() {
        sink.on_frame(frame.clone());
    }
}
