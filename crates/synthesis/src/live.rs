//! Entry point for the capture source.

use std::sync::{Arc, PoisonError, RwLock};

use vizcast_frame::{Frame, FrameSink};

use crate::dispatcher::{FrameDispatcher, SubmitOutcome};

/// Where a live frame went.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedOutcome {
    /// No reference frame set: shown as-is on the display sink.
    Bypassed,
    /// Handed to the dispatcher.
    Dispatched(SubmitOutcome),
}

/// Routes camera frames: to the dispatcher when a reference frame is set,
/// otherwise straight to the display.
pub struct LiveFeed {
    dispatcher: Arc<FrameDispatcher>,
    display: Arc<dyn FrameSink>,
    reference: RwLock<Option<Frame>>,
}

impl LiveFeed {
    pub fn new(dispatcher: Arc<FrameDispatcher>, display: Arc<dyn FrameSink>) -> Self {
        Self {
            dispatcher,
            display,
            reference: RwLock::new(None),
        }
    }

    /// Set or clear the reference frame used to guide synthesis.
    pub fn set_reference(&self, reference: Option<Frame>) {
        tracing::info!(set = reference.is_some(), "Reference frame updated");
        *self
            .reference
            .write()
            .unwrap_or_else(PoisonError::into_inner) = reference;
    }

    pub fn has_reference(&self) -> bool {
        self.reference
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Deliver one camera frame. Never blocks the caller.
    pub fn on_live_frame(&self, frame: Frame) -> FeedOutcome {
        let reference = self
            .reference
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        match reference {
            Some(reference) => FeedOutcome::Dispatched(self.dispatcher.submit(frame, reference)),
            None => {
                self.display.on_frame(frame);
                FeedOutcome::Bypassed
            }
        }
    }

    pub fn dispatcher(&self) -> &Arc<FrameDispatcher> {
        &self.dispatcher
    }
}
