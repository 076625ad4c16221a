//! Latest-frame slot for push-frame streaming.
//!
//! A streaming server reads whatever frame is newest when it is ready to
//! send; nothing is queued. Each result overwrites the slot.

use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::watch;
use vizcast_frame::{Frame, FrameSink};

pub struct LatestFrameSlot {
    tx: watch::Sender<Option<Frame>>,
    published: AtomicU64,
}

impl LatestFrameSlot {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self {
            tx,
            published: AtomicU64::new(0),
        }
    }

    /// The newest frame, if any has been published.
    pub fn latest(&self) -> Option<Frame> {
        self.tx.borrow().clone()
    }

    /// Receiver that wakes whenever a new frame replaces the old one.
    pub fn subscribe(&self) -> watch::Receiver<Option<Frame>> {
        self.tx.subscribe()
    }

    /// Frames written to the slot so far.
    pub fn published(&self) -> u64 {
        self.published.load(Ordering::Relaxed)
    }

    /// Drop the current frame.
    pub fn clear(&self) {
        self.tx.send_replace(None);
    }
}

impl Default for LatestFrameSlot {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameSink for LatestFrameSlot {
    fn on_frame(&self, frame: Frame) {
        self.tx.send_replace(Some(frame));
        self.published.fetch_add(1, Ordering::Relaxed);
    }

    fn name(&self) -> &str {
        "stream"
    }
}
