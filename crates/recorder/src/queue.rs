//! Bounded drop-oldest hand-off between the producer and the encoder thread.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Frames held between producer and encoder.
pub const FRAME_QUEUE_CAPACITY: usize = 10;

/// Result of [`FrameQueue::push`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    Queued,
    /// Queued after evicting the oldest item.
    EvictedOldest,
    /// The queue is closed; the item was discarded.
    Closed,
}

struct Inner<T> {
    items: VecDeque<T>,
    closed: bool,
}

/// Fixed-capacity FIFO that never blocks the producer.
///
/// When full, the oldest item is evicted so the newest always fits.
/// Consumers wait with a bounded timeout.
pub struct FrameQueue<T> {
    inner: Mutex<Inner<T>>,
    available: Condvar,
    capacity: usize,
    evicted: AtomicU64,
}

impl<T> FrameQueue<T> {
    pub fn new() -> Self {
        Self::with_capacity(FRAME_QUEUE_CAPACITY)
    }

    /// Capacity is clamped to at least 1.
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            inner: Mutex::new(Inner {
                items: VecDeque::with_capacity(capacity),
                closed: false,
            }),
            available: Condvar::new(),
            capacity,
            evicted: AtomicU64::new(0),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner<T>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn push(&self, item: T) -> PushOutcome {
        let mut inner = self.lock();
        if inner.closed {
            return PushOutcome::Closed;
        }

        let outcome = if inner.items.len() >= self.capacity {
            inner.items.pop_front();
            self.evicted.fetch_add(1, Ordering::Relaxed);
            PushOutcome::EvictedOldest
        } else {
            PushOutcome::Queued
        };
        inner.items.push_back(item);
        drop(inner);

        self.available.notify_one();
        outcome
    }

    /// Pop the oldest item, waiting at most `timeout` for one to arrive.
    pub fn pop_timeout(&self, timeout: Duration) -> Option<T> {
        let inner = self.lock();
        let (mut inner, _) = self
            .available
            .wait_timeout_while(inner, timeout, |inner| {
                inner.items.is_empty() && !inner.closed
            })
            .unwrap_or_else(PoisonError::into_inner);
        inner.items.pop_front()
    }

    /// Pop without waiting.
    pub fn try_pop(&self) -> Option<T> {
        self.lock().items.pop_front()
    }

    /// Reject further pushes and wake any waiting consumer.
    /// Items already queued can still be popped.
    pub fn close(&self) {
        self.lock().closed = true;
        self.available.notify_all();
    }

    pub fn clear(&self) -> usize {
        let mut inner = self.lock();
        let n = inner.items.len();
        inner.items.clear();
        n
    }

    pub fn len(&self) -> usize {
        self.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().items.is_empty()
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Items evicted to make room since creation.
    pub fn evicted(&self) -> u64 {
        self.evicted.load(Ordering::Relaxed)
    }
}

impl<T> Default for FrameQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}
