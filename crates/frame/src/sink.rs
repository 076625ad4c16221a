//! Frame sinks: consumers of produced frames.

use crate::frame::Frame;

/// Receives frames produced by the pipeline.
///
/// Sinks are called synchronously on the producing context, so
/// implementations must return quickly and never block on I/O.
pub trait FrameSink: Send + Sync {
    /// Accept a frame.
    fn on_frame(&self, frame: Frame);

    /// Sink name for logging.
    fn name(&self) -> &str {
        "sink"
    }
}

impl<F> FrameSink for F
where
    F: Fn(Frame) + Send + Sync,
{
    fn on_frame(&self, frame: Frame) {
        self(frame)
    }

    fn name(&self) -> &str {
        "fn"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn closures_are_sinks() {
        let count = Arc::new(AtomicUsize::new(0));
        let seen = count.clone();
        let sink: Arc<dyn FrameSink> = Arc::new(move |_frame: Frame| {
            seen.fetch_add(1, Ordering::SeqCst);
        });

        let frame = Frame::solid(2, 2, [0, 0, 0, 255]).unwrap();
        sink.on_frame(frame.clone());
        sink.on_frame(frame);
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }
}
