//! Shared identity and bookkeeping of one engine instance.
//!
//! An [`Env`] is the thread-safe half of an [`Engine`](crate::Engine): the
//! engine itself never leaves its thread, while clones of its `Env` travel
//! with every reference, queue, and synchronization context created against
//! it. The `Env` owns:
//!
//! - the sender side of the engine's loop channel
//! - the keep-alive and pending-work counters that decide event-loop liveness
//! - the deferred destruction queue for native references released off-thread

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::thread::{self, ThreadId};

use tokio::sync::mpsc;

use crate::error::Status;
use crate::event_loop::LoopMessage;
use crate::gc::{CallScope, DeferredDestructionQueue, Handle};
use crate::threadsafe_function::QueuedCall;

/// Process-unique engine identifier.
pub type EnvId = u64;

static NEXT_ENV_ID: AtomicU64 = AtomicU64::new(1);

struct EnvShared {
    id: EnvId,
    engine_thread: ThreadId,
    loop_tx: mpsc::UnboundedSender<LoopMessage>,
    /// Sum of keep-alive counts of all open queues.
    keep_alive: AtomicUsize,
    /// Calls submitted but not yet picked up by the loop.
    pending: AtomicUsize,
    closing: AtomicBool,
    deferred: DeferredDestructionQueue,
}

/// Cloneable, `Send + Sync` handle to one engine instance.
#[derive(Clone)]
pub struct Env {
    shared: Arc<EnvShared>,
}

impl Env {
    /// Create the env of an engine being built on the current thread.
    pub(crate) fn new(loop_tx: mpsc::UnboundedSender<LoopMessage>) -> Self {
        Self {
            shared: Arc::new(EnvShared {
                id: NEXT_ENV_ID.fetch_add(1, Ordering::Relaxed),
                engine_thread: thread::current().id(),
                loop_tx,
                keep_alive: AtomicUsize::new(0),
                pending: AtomicUsize::new(0),
                closing: AtomicBool::new(false),
                deferred: DeferredDestructionQueue::new(),
            }),
        }
    }

    /// Look up the env of the engine that owns `scope`.
    ///
    /// Returns `None` for isolates that were not created by [`Engine`](crate::Engine).
    pub fn from_scope(scope: &v8::PinScope) -> Option<Env> {
        let isolate: &v8::Isolate = scope.as_ref();
        isolate.get_slot::<Env>().cloned()
    }

    /// The env whose call-scope is active on the current thread, if any.
    pub fn current() -> Option<Env> {
        CallScope::current_env()
    }

    pub fn id(&self) -> EnvId {
        self.shared.id
    }

    /// Whether the calling thread is the engine's own thread.
    pub fn is_engine_thread(&self) -> bool {
        thread::current().id() == self.shared.engine_thread
    }

    /// Whether the engine is shutting down. Closing engines accept no new work.
    pub fn is_closing(&self) -> bool {
        self.shared.closing.load(Ordering::Acquire)
    }

    /// Whether the event loop has a reason to keep running.
    pub fn is_alive(&self) -> bool {
        self.shared.keep_alive.load(Ordering::Acquire) > 0
            || self.shared.pending.load(Ordering::Acquire) > 0
    }

    pub fn keep_alive_count(&self) -> usize {
        self.shared.keep_alive.load(Ordering::Acquire)
    }

    pub fn pending_calls(&self) -> usize {
        self.shared.pending.load(Ordering::Acquire)
    }

    /// Native references waiting to be released on the engine thread.
    pub fn pending_releases(&self) -> u64 {
        self.shared.deferred.len()
    }

    pub(crate) fn add_keep_alive(&self, count: usize) {
        if count > 0 {
            self.shared.keep_alive.fetch_add(count, Ordering::AcqRel);
        }
    }

    pub(crate) fn release_keep_alive(&self, count: usize) {
        if count == 0 {
            return;
        }

        let previous = self.shared.keep_alive.fetch_sub(count, Ordering::AcqRel);
        debug_assert!(previous >= count, "keep-alive count underflow");

        // The loop may be parked waiting for work that will never come.
        self.wake();
    }

    /// Hand a call to the engine loop.
    pub(crate) fn submit(&self, call: QueuedCall) -> Result<(), Status> {
        if self.is_closing() {
            return Err(Status::Closing);
        }

        self.shared.pending.fetch_add(1, Ordering::AcqRel);

        if self.shared.loop_tx.send(LoopMessage::Call(call)).is_err() {
            self.shared.pending.fetch_sub(1, Ordering::AcqRel);
            return Err(Status::Closing);
        }

        Ok(())
    }

    /// Called by the loop when it picks a call off the channel.
    pub(crate) fn call_started(&self) {
        self.shared.pending.fetch_sub(1, Ordering::AcqRel);
    }

    pub(crate) fn wake(&self) {
        // A closed channel means the loop is gone; nothing to wake.
        let _ = self.shared.loop_tx.send(LoopMessage::Wake);
    }

    pub(crate) fn close(&self) {
        if !self.shared.closing.swap(true, Ordering::AcqRel) {
            log::debug!("Engine env {} closing", self.id());
        }
    }

    pub(crate) fn deferred(&self) -> &DeferredDestructionQueue {
        &self.shared.deferred
    }

    /// Queue a native reference handle for deletion on the engine thread.
    ///
    /// The handle is always queued, so it is released exactly once even when
    /// the engine is closing; the status only tells the caller the engine is
    /// going away.
    pub(crate) fn defer_release(&self, handle: Handle) -> Result<(), Status> {
        self.shared.deferred.defer(handle);

        if self.is_closing() {
            Err(Status::Closing)
        } else {
            self.wake();
            Ok(())
        }
    }
}

impl PartialEq for Env {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }
}

impl Eq for Env {}

impl fmt::Debug for Env {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Env")
            .field("id", &self.id())
            .field("keep_alive", &self.keep_alive_count())
            .field("pending", &self.pending_calls())
            .field("closing", &self.is_closing())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detached_env() -> (Env, mpsc::UnboundedReceiver<LoopMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Env::new(tx), rx)
    }

    #[test]
    fn test_env_ids_are_unique() {
        let (a, _rx_a) = detached_env();
        let (b, _rx_b) = detached_env();
        assert_ne!(a.id(), b.id());
        assert_ne!(a, b);
        assert_eq!(a, a.clone());
    }

    #[test]
    fn test_liveness_follows_keep_alive() {
        let (env, _rx) = detached_env();
        assert!(!env.is_alive());

        env.add_keep_alive(2);
        assert!(env.is_alive());

        env.release_keep_alive(1);
        assert!(env.is_alive());

        env.release_keep_alive(1);
        assert!(!env.is_alive());
    }

    #[test]
    fn test_release_wakes_loop() {
        let (env, mut rx) = detached_env();
        env.add_keep_alive(1);
        env.release_keep_alive(1);
        assert!(matches!(rx.try_recv(), Ok(LoopMessage::Wake)));
    }

    #[test]
    fn test_engine_thread_detection() {
        let (env, _rx) = detached_env();
        assert!(env.is_engine_thread());

        let remote = env.clone();
        let on_other = std::thread::spawn(move || remote.is_engine_thread())
            .join()
            .unwrap();
        assert!(!on_other);
    }

    #[test]
    fn test_close_is_sticky() {
        let (env, _rx) = detached_env();
        env.close();
        env.close();
        assert!(env.is_closing());
    }
}
