//! Synchronization context: run host logic on the engine thread.
//!
//! A [`JsSynchronizationContext`] wraps a [`ThreadsafeFunction`] and offers
//! the two classic scheduling primitives:
//!
//! - [`post`](JsSynchronizationContext::post): fire-and-forget, never blocks
//! - [`send`](JsSynchronizationContext::send): run and wait for completion
//!
//! Code already running on the engine thread holds a scope and uses
//! [`send_in`](JsSynchronizationContext::send_in), which runs the callback
//! inline on that scope instead of queueing it behind itself.
//!
//! Each thread has at most one ambient context. Creating a context installs
//! it as ambient on the creating thread; disposing it there restores the one
//! it replaced.

use std::cell::RefCell;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, ThreadId};
use std::time::Duration;

use crate::env::Env;
use crate::error::{Error, Result, Status};
use crate::threadsafe_function::{CallMode, ThreadsafeFunction};

/// Resource name of the queue behind every context.
pub const RESOURCE_NAME: &str = "SynchronizationContext";

thread_local! {
    static CURRENT_CONTEXT: RefCell<Option<Arc<JsSynchronizationContext>>> =
        const { RefCell::new(None) };
}

/// Schedules callbacks onto one engine's thread.
pub struct JsSynchronizationContext {
    tsfn: ThreadsafeFunction,
    previous: Mutex<Option<Arc<JsSynchronizationContext>>>,
    installed_on: ThreadId,
    disposed: AtomicBool,
}

impl JsSynchronizationContext {
    /// Create a context for the engine owning `scope` and install it as the
    /// ambient context of this thread.
    ///
    /// The context does not keep the event loop alive on its own; use
    /// [`open_async_scope`](Self::open_async_scope) for that.
    pub fn new(scope: &mut v8::PinScope) -> Result<Arc<Self>> {
        let env = Env::from_scope(scope).ok_or_else(|| {
            Error::UsageViolation("scope does not belong to a bridged engine".into())
        })?;

        let tsfn = ThreadsafeFunction::new(&env, 0, 1, RESOURCE_NAME)?;
        tsfn.unref()?;

        let context = Arc::new(Self {
            tsfn,
            previous: Mutex::new(None),
            installed_on: thread::current().id(),
            disposed: AtomicBool::new(false),
        });

        let previous = CURRENT_CONTEXT.with(|c| c.replace(Some(Arc::clone(&context))));
        *context.lock_previous() = previous;

        log::debug!("Synchronization context installed for env {}", env.id());
        Ok(context)
    }

    /// The ambient context of the calling thread.
    pub fn current() -> Option<Arc<Self>> {
        CURRENT_CONTEXT.with(|c| c.borrow().clone())
    }

    pub fn env(&self) -> &Env {
        self.tsfn.env()
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    /// Whether this context is the ambient context of the calling thread.
    pub fn is_current(&self) -> bool {
        CURRENT_CONTEXT.with(|c| {
            c.borrow()
                .as_ref()
                .is_some_and(|current| std::ptr::eq(Arc::as_ptr(current), self))
        })
    }

    /// Queue `callback` to run on the engine thread. Never blocks.
    ///
    /// Silently dropped once the context is disposed.
    pub fn post<F>(&self, callback: F)
    where
        F: FnOnce(&mut v8::PinScope) + Send + 'static,
    {
        if self.is_disposed() {
            return;
        }

        match self.tsfn.call(Box::new(callback), CallMode::NonBlocking) {
            Ok(()) => {}
            Err(Status::Closing) => {
                log::debug!("Dropping callback posted to a closing synchronization context");
            }
            Err(status) => {
                log::warn!("Failed to post to synchronization context: {}", status);
            }
        }
    }

    /// Run `callback` on the engine thread and wait for it to finish.
    ///
    /// Once disposed, returns `Ok(())` without running it. On the engine
    /// thread the wait could never end, so this fails with `UsageViolation`;
    /// use [`send_in`](Self::send_in) there.
    pub fn send<F>(&self, callback: F) -> Result<()>
    where
        F: FnOnce(&mut v8::PinScope) + Send + 'static,
    {
        self.send_inner(callback, None)
    }

    /// Like [`send`](Self::send), but gives up with [`Error::Timeout`] if the
    /// engine does not run the callback within `timeout`.
    pub fn send_timeout<F>(&self, callback: F, timeout: Duration) -> Result<()>
    where
        F: FnOnce(&mut v8::PinScope) + Send + 'static,
    {
        self.send_inner(callback, Some(timeout))
    }

    /// Like [`send`](Self::send), for callers that hold a `scope`.
    ///
    /// With a scope of this context's engine the callback runs inline on it
    /// and has finished when this returns. A scope of another engine only
    /// proves the caller is on that engine's thread, so the call blocks like
    /// [`send`](Self::send).
    pub fn send_in<F>(&self, scope: &mut v8::PinScope, callback: F) -> Result<()>
    where
        F: FnOnce(&mut v8::PinScope) + Send + 'static,
    {
        let own_engine = Env::from_scope(scope).is_some_and(|env| env == *self.env());

        if !own_engine {
            return self.send_inner(callback, None);
        }

        // Ambient contexts run even when disposed from another thread
        if self.is_disposed() && !self.is_current() {
            return Ok(());
        }

        callback(scope);
        Ok(())
    }

    fn send_inner<F>(&self, callback: F, timeout: Option<Duration>) -> Result<()>
    where
        F: FnOnce(&mut v8::PinScope) + Send + 'static,
    {
        if self.is_disposed() {
            return Ok(());
        }

        if self.env().is_engine_thread() {
            return Err(Error::UsageViolation(
                "blocking send on the engine thread would never complete; use send_in".into(),
            ));
        }

        let (done_tx, done_rx) = mpsc::sync_channel::<()>(1);

        let wrapper = move |scope: &mut v8::PinScope| {
            callback(scope);
            let _ = done_tx.send(());
        };

        match self.tsfn.call(Box::new(wrapper), CallMode::Blocking) {
            Ok(()) => {}
            Err(Status::Closing) => {
                log::debug!("Dropping callback sent to a closing synchronization context");
                return Ok(());
            }
            Err(status) => return Err(status.into()),
        }

        match timeout {
            None => done_rx.recv().map_err(|_| Error::CallbackDropped),
            Some(timeout) => match done_rx.recv_timeout(timeout) {
                Ok(()) => Ok(()),
                Err(RecvTimeoutError::Timeout) => Err(Error::Timeout),
                Err(RecvTimeoutError::Disconnected) => Err(Error::CallbackDropped),
            },
        }
    }

    /// Dispose the context. Idempotent.
    ///
    /// On the installing thread, while this context is ambient there, the
    /// context it replaced becomes ambient again.
    pub fn dispose(&self) -> Result<()> {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        if thread::current().id() == self.installed_on && self.is_current() {
            let previous = self.lock_previous().take();
            let replaced = CURRENT_CONTEXT.with(|c| c.replace(previous));
            drop(replaced);
        }

        self.tsfn.release()?;

        log::debug!("Synchronization context of env {} disposed", self.env().id());
        Ok(())
    }

    /// Keep the engine loop alive until the matching
    /// [`close_async_scope`](Self::close_async_scope).
    pub fn open_async_scope(&self) {
        if self.is_disposed() {
            log::debug!("Ignoring open_async_scope on a disposed synchronization context");
            return;
        }

        if let Err(status) = self.tsfn.refer() {
            log::debug!("open_async_scope failed: {}", status);
        }
    }

    pub fn close_async_scope(&self) {
        if self.is_disposed() {
            log::debug!("Ignoring close_async_scope on a disposed synchronization context");
            return;
        }

        if let Err(status) = self.tsfn.unref() {
            log::debug!("close_async_scope failed: {}", status);
        }
    }

    fn lock_previous(&self) -> std::sync::MutexGuard<'_, Option<Arc<JsSynchronizationContext>>> {
        self.previous.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for JsSynchronizationContext {
    fn drop(&mut self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }

        if let Err(status) = self.tsfn.release() {
            log::debug!("Releasing dropped synchronization context failed: {}", status);
        }
    }
}

impl fmt::Debug for JsSynchronizationContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JsSynchronizationContext")
            .field("env_id", &self.env().id())
            .field("is_disposed", &self.is_disposed())
            .field("queue", &self.tsfn)
            .finish()
    }
}
