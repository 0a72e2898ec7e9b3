//! Thread-safe callback queue bound to one engine.
//!
//! A [`ThreadsafeFunction`] accepts callbacks from any thread and runs them on
//! the engine thread, in submission order, during event-loop turns. It keeps
//! the loop alive while its keep-alive count is positive, tracks how many
//! threads still use it, and can bound the number of queued callbacks.
//!
//! ```text
//! host thread ── call() ──► Env::submit ──► loop channel ──► engine turn
//!                                                           └─ QueuedCall::run
//! ```

use std::fmt;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};

use crate::env::Env;
use crate::error::Status;

/// Work item executed on the engine thread.
pub type Callback = Box<dyn FnOnce(&mut v8::PinScope) + Send + 'static>;

/// Behavior of [`ThreadsafeFunction::call`] on a full bounded queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallMode {
    /// Fail with `QueueFull`.
    NonBlocking,
    /// Wait for space.
    Blocking,
}

struct State {
    keep_alive: usize,
    thread_count: usize,
    /// Callbacks submitted and not yet run or dropped.
    queued: usize,
    closed: bool,
    aborted: bool,
}

struct Shared {
    env: Env,
    resource_name: String,
    max_queue_size: usize,
    state: Mutex<State>,
    space: Condvar,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, State> {
        // Callbacks never run under the lock, so the state stays consistent
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Close the queue and give back its share of loop liveness.
    fn close(&self, state: &mut State) {
        if state.closed {
            return;
        }

        state.closed = true;
        let keep_alive = std::mem::take(&mut state.keep_alive);
        self.env.release_keep_alive(keep_alive);
        self.space.notify_all();

        log::debug!("Threadsafe function '{}' closed", self.resource_name);
    }
}

impl Drop for Shared {
    fn drop(&mut self) {
        let state = self.state.get_mut().unwrap_or_else(PoisonError::into_inner);

        if !state.closed {
            let keep_alive = std::mem::take(&mut state.keep_alive);
            self.env.release_keep_alive(keep_alive);
        }
    }
}

/// Cross-thread callback queue of one engine.
///
/// Cloning yields another handle to the same queue; the thread count is
/// managed explicitly with [`acquire`](Self::acquire)/[`release`](Self::release).
#[derive(Clone)]
pub struct ThreadsafeFunction {
    shared: Arc<Shared>,
}

impl ThreadsafeFunction {
    /// Create a queue on `env`.
    ///
    /// `max_queue_size` of 0 means unbounded. The queue starts with a
    /// keep-alive count of 1.
    pub fn new(
        env: &Env,
        max_queue_size: usize,
        initial_thread_count: usize,
        resource_name: impl Into<String>,
    ) -> Result<Self, Status> {
        if initial_thread_count == 0 {
            return Err(Status::InvalidArg);
        }

        if env.is_closing() {
            return Err(Status::Closing);
        }

        let resource_name = resource_name.into();
        env.add_keep_alive(1);

        log::debug!(
            "Threadsafe function '{}' created on env {} (max queue: {}, threads: {})",
            resource_name,
            env.id(),
            max_queue_size,
            initial_thread_count
        );

        Ok(Self {
            shared: Arc::new(Shared {
                env: env.clone(),
                resource_name,
                max_queue_size,
                state: Mutex::new(State {
                    keep_alive: 1,
                    thread_count: initial_thread_count,
                    queued: 0,
                    closed: false,
                    aborted: false,
                }),
                space: Condvar::new(),
            }),
        })
    }

    /// Queue `callback` to run on the engine thread.
    pub fn call(&self, callback: Callback, mode: CallMode) -> Result<(), Status> {
        let shared = &self.shared;
        let mut state = shared.lock();

        loop {
            if state.closed {
                return Err(Status::Closing);
            }

            if shared.max_queue_size == 0 || state.queued < shared.max_queue_size {
                break;
            }

            match mode {
                CallMode::NonBlocking => return Err(Status::QueueFull),
                // Waiting on the engine thread would never see the queue drain.
                CallMode::Blocking if shared.env.is_engine_thread() => {
                    return Err(Status::QueueFull);
                }
                CallMode::Blocking => {
                    state = shared
                        .space
                        .wait(state)
                        .unwrap_or_else(PoisonError::into_inner);
                }
            }
        }

        state.queued += 1;
        drop(state);

        let queued = QueuedCall {
            callback: Some(callback),
            queue: Arc::clone(shared),
        };

        // A rejected call gives its slot back when it is dropped.
        shared.env.submit(queued)
    }

    /// Increment the keep-alive count.
    pub fn refer(&self) -> Result<(), Status> {
        let mut state = self.shared.lock();

        if state.closed {
            return Err(Status::Closing);
        }

        state.keep_alive += 1;
        self.shared.env.add_keep_alive(1);
        Ok(())
    }

    /// Decrement the keep-alive count. Saturates at zero.
    pub fn unref(&self) -> Result<(), Status> {
        let mut state = self.shared.lock();

        if state.closed {
            return Err(Status::Closing);
        }

        if state.keep_alive > 0 {
            state.keep_alive -= 1;
            self.shared.env.release_keep_alive(1);
        }

        Ok(())
    }

    /// Register one more thread using the queue.
    pub fn acquire(&self) -> Result<(), Status> {
        let mut state = self.shared.lock();

        if state.closed {
            return Err(Status::Closing);
        }

        state.thread_count += 1;
        Ok(())
    }

    /// Unregister a thread. The queue closes when the count reaches zero;
    /// callbacks queued before that still run.
    pub fn release(&self) -> Result<(), Status> {
        let mut state = self.shared.lock();

        if state.thread_count == 0 {
            return Err(Status::InvalidArg);
        }

        state.thread_count -= 1;

        if state.thread_count == 0 {
            self.shared.close(&mut state);
        }

        Ok(())
    }

    /// Close immediately. Queued callbacks that have not run yet are dropped.
    pub fn abort(&self) -> Result<(), Status> {
        let mut state = self.shared.lock();

        if state.closed && state.aborted {
            return Err(Status::Closing);
        }

        state.aborted = true;
        state.thread_count = 0;
        self.shared.close(&mut state);
        Ok(())
    }

    pub fn resource_name(&self) -> &str {
        &self.shared.resource_name
    }

    pub fn is_closed(&self) -> bool {
        self.shared.lock().closed
    }

    /// Number of callbacks submitted and not yet run.
    pub fn queued_len(&self) -> usize {
        self.shared.lock().queued
    }

    pub fn keep_alive_count(&self) -> usize {
        self.shared.lock().keep_alive
    }

    pub fn env(&self) -> &Env {
        &self.shared.env
    }
}

impl fmt::Debug for ThreadsafeFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.shared.lock();
        f.debug_struct("ThreadsafeFunction")
            .field("resource_name", &self.shared.resource_name)
            .field("env_id", &self.shared.env.id())
            .field("keep_alive", &state.keep_alive)
            .field("thread_count", &state.thread_count)
            .field("queued", &state.queued)
            .field("closed", &state.closed)
            .finish()
    }
}

/// A callback in flight between a queue and the engine loop.
///
/// Dropping it unrun (engine torn down, queue aborted) frees its queue slot.
pub(crate) struct QueuedCall {
    callback: Option<Callback>,
    queue: Arc<Shared>,
}

impl QueuedCall {
    /// Run the callback on the engine thread, unless its queue was aborted.
    pub(crate) fn run(mut self, scope: &mut v8::PinScope) {
        let Some(callback) = self.callback.take() else {
            return;
        };

        if self.queue.lock().aborted {
            log::trace!(
                "Dropping callback of aborted queue '{}'",
                self.queue.resource_name
            );
            return;
        }

        callback(scope);
    }

    pub(crate) fn resource_name(&self) -> &str {
        &self.queue.resource_name
    }
}

impl Drop for QueuedCall {
    fn drop(&mut self) {
        let mut state = self.queue.lock();
        state.queued = state.queued.saturating_sub(1);
        self.queue.space.notify_one();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_loop::LoopMessage;
    use tokio::sync::mpsc;

    fn detached_env() -> (Env, mpsc::UnboundedReceiver<LoopMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Env::new(tx), rx)
    }

    fn noop() -> Callback {
        Box::new(|_scope| {})
    }

    #[test]
    fn test_zero_thread_count_is_invalid() {
        let (env, _rx) = detached_env();
        let err = ThreadsafeFunction::new(&env, 0, 0, "test").unwrap_err();
        assert_eq!(err, Status::InvalidArg);
    }

    #[test]
    fn test_closing_env_rejects_creation() {
        let (env, _rx) = detached_env();
        env.close();
        let err = ThreadsafeFunction::new(&env, 0, 1, "test").unwrap_err();
        assert_eq!(err, Status::Closing);
    }

    #[test]
    fn test_keep_alive_tracks_env() {
        let (env, _rx) = detached_env();
        let tsfn = ThreadsafeFunction::new(&env, 0, 1, "test").unwrap();
        assert_eq!(env.keep_alive_count(), 1);

        tsfn.unref().unwrap();
        assert_eq!(env.keep_alive_count(), 0);

        // Saturates
        tsfn.unref().unwrap();
        assert_eq!(tsfn.keep_alive_count(), 0);

        tsfn.refer().unwrap();
        tsfn.refer().unwrap();
        assert_eq!(env.keep_alive_count(), 2);

        tsfn.release().unwrap();
        assert!(tsfn.is_closed());
        assert_eq!(env.keep_alive_count(), 0);
    }

    #[test]
    fn test_bounded_queue_reports_full() {
        let (env, mut rx) = detached_env();
        let tsfn = ThreadsafeFunction::new(&env, 2, 1, "bounded").unwrap();

        tsfn.call(noop(), CallMode::NonBlocking).unwrap();
        tsfn.call(noop(), CallMode::NonBlocking).unwrap();
        assert_eq!(
            tsfn.call(noop(), CallMode::NonBlocking).unwrap_err(),
            Status::QueueFull
        );

        // Blocking on the engine thread cannot wait for itself
        assert_eq!(
            tsfn.call(noop(), CallMode::Blocking).unwrap_err(),
            Status::QueueFull
        );

        // Dropping a queued call frees its slot
        let first = rx.try_recv().unwrap();
        drop(first);
        assert_eq!(tsfn.queued_len(), 1);
        tsfn.call(noop(), CallMode::NonBlocking).unwrap();
    }

    #[test]
    fn test_blocking_call_waits_for_space() {
        let (env, mut rx) = detached_env();
        let tsfn = ThreadsafeFunction::new(&env, 1, 1, "blocking").unwrap();
        tsfn.call(noop(), CallMode::NonBlocking).unwrap();

        let producer = {
            let tsfn = tsfn.clone();
            std::thread::spawn(move || tsfn.call(noop(), CallMode::Blocking))
        };

        std::thread::sleep(std::time::Duration::from_millis(50));
        assert!(!producer.is_finished());

        drop(rx.try_recv().unwrap());
        assert_eq!(producer.join().unwrap(), Ok(()));
        assert_eq!(tsfn.queued_len(), 1);
    }

    #[test]
    fn test_release_closes_at_zero() {
        let (env, _rx) = detached_env();
        let tsfn = ThreadsafeFunction::new(&env, 0, 1, "threads").unwrap();

        tsfn.acquire().unwrap();
        tsfn.release().unwrap();
        assert!(!tsfn.is_closed());

        tsfn.release().unwrap();
        assert!(tsfn.is_closed());
        assert_eq!(
            tsfn.call(noop(), CallMode::NonBlocking).unwrap_err(),
            Status::Closing
        );
        assert_eq!(tsfn.release().unwrap_err(), Status::InvalidArg);
        assert_eq!(tsfn.refer().unwrap_err(), Status::Closing);
    }

    #[test]
    fn test_closing_env_rejects_calls() {
        let (env, _rx) = detached_env();
        let tsfn = ThreadsafeFunction::new(&env, 0, 1, "closing").unwrap();
        env.close();

        assert_eq!(
            tsfn.call(noop(), CallMode::NonBlocking).unwrap_err(),
            Status::Closing
        );
        assert_eq!(tsfn.queued_len(), 0);
        assert_eq!(env.pending_calls(), 0);
    }

    #[test]
    fn test_drop_gives_back_keep_alive() {
        let (env, _rx) = detached_env();
        let tsfn = ThreadsafeFunction::new(&env, 0, 1, "dropped").unwrap();
        tsfn.refer().unwrap();
        assert_eq!(env.keep_alive_count(), 2);

        drop(tsfn);
        assert_eq!(env.keep_alive_count(), 0);
    }

    #[test]
    fn test_poisoned_state_still_accepts_calls() {
        let (env, _rx) = detached_env();
        let tsfn = ThreadsafeFunction::new(&env, 0, 1, "poisoned").unwrap();

        let holder = tsfn.clone();
        let _ = std::thread::spawn(move || {
            let _state = holder.shared.lock();
            panic!("panic while holding the queue state");
        })
        .join();
        assert!(tsfn.shared.state.is_poisoned());

        tsfn.call(noop(), CallMode::NonBlocking).unwrap();
        assert_eq!(tsfn.queued_len(), 1);
        tsfn.release().unwrap();
    }
}
