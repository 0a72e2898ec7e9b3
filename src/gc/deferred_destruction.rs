//! Deferred destruction queue for native references.
//!
//! This module provides thread-safe deferred destruction of the V8 handles
//! behind [`NativeRef`](super::NativeRef)s released from threads that are
//! not running the engine.
//!
//! ## Problem
//!
//! A native reference wraps a V8 `Global`/`Weak` handle, which must be reset
//! on the engine thread. A `NativeRef` or the `JsReference` holding it can be
//! disposed, or simply dropped, from any host thread: a worker pool, a timer,
//! or a thread that only outlives the engine.
//!
//! ## Solution
//!
//! The dropped `NativeRef` queues its handle, then the engine drains the queue
//! whenever it opens a call-scope (`CallScope::enter`) or tears itself down.
//!
//! ## Usage
//!
//! ```ignore
//! // Per-engine queue (owned by the Env)
//! let queue = DeferredDestructionQueue::new();
//!
//! // From any thread, defer a release
//! queue.defer(handle);
//!
//! // On the engine thread, when entering a call-scope
//! queue.process_all();
//! ```

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use super::Handle;

/// Per-engine queue for deferred native reference destruction.
///
/// This queue is thread-safe and can receive handles from any thread.
/// Pending handles are reset when `process_all()` is called on the engine
/// thread.
pub struct DeferredDestructionQueue {
    /// Handles pending destruction
    queue: Mutex<VecDeque<Handle>>,

    /// Fast check for pending items (avoids lock acquisition on hot path)
    pending_count: AtomicU64,
}

impl Default for DeferredDestructionQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl DeferredDestructionQueue {
    /// Create a new empty queue.
    pub fn new() -> Self {
        Self {
            queue: Mutex::new(VecDeque::with_capacity(8)),
            pending_count: AtomicU64::new(0),
        }
    }

    /// Queue a handle for deferred destruction.
    ///
    /// Callable from any thread.
    pub(crate) fn defer(&self, handle: Handle) {
        self.queue
            .lock()
            .expect("deferred destruction queue poisoned")
            .push_back(handle);
        self.pending_count.fetch_add(1, Ordering::Release);

        tracing::trace!("Deferred native reference release (pending: {})", self.len());
    }

    /// Check if there are pending destructions.
    ///
    /// This is a fast lock-free check.
    #[inline]
    pub fn has_pending(&self) -> bool {
        self.pending_count.load(Ordering::Acquire) > 0
    }

    /// Get the number of pending destructions.
    #[inline]
    pub fn len(&self) -> u64 {
        self.pending_count.load(Ordering::Acquire)
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        !self.has_pending()
    }

    /// Destroy all pending references.
    ///
    /// Must be called on the engine thread while the isolate is alive.
    /// Returns the number of references destroyed.
    pub fn process_all(&self) -> usize {
        if !self.has_pending() {
            return 0;
        }

        let pending: VecDeque<Handle> = {
            let mut queue = self
                .queue
                .lock()
                .expect("deferred destruction queue poisoned");
            std::mem::take(&mut *queue)
        };

        let count = pending.len();

        if count == 0 {
            return 0;
        }

        // Resets every Global/Weak handle
        drop(pending);

        self.pending_count.fetch_sub(count as u64, Ordering::Release);

        tracing::trace!("Processed {} deferred native reference releases", count);
        count
    }
}

impl std::fmt::Debug for DeferredDestructionQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeferredDestructionQueue")
            .field("pending_count", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_queue_creation() {
        let queue = DeferredDestructionQueue::new();
        assert!(queue.is_empty());
        assert_eq!(queue.len(), 0);
        assert_eq!(queue.process_all(), 0);
    }

    // Tests with real handles need an isolate and live in gc/tests.rs
}
