//! Durable references to JS values.
//!
//! A [`JsReference`] keeps a JS value reachable (strong) or merely observable
//! (weak) beyond the call-scope it was created in. It can be moved to and
//! dropped on any thread; the underlying native reference is always released
//! on the engine thread, exactly once.
//!
//! ```ignore
//! let reference = engine.with_scope(|scope| {
//!     let value = v8::Object::new(scope);
//!     JsReference::new(scope, value.into(), false)
//! })?;
//!
//! // Later, in another call-scope of the same engine
//! engine.with_scope(|scope| {
//!     let value = reference.get_value(scope)?;
//!     assert!(value.is_some());
//!     Ok::<_, Error>(())
//! })?;
//! ```

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::env::Env;
use crate::error::{Error, Result, Status};
use crate::gc::NativeRef;

const TYPE_NAME: &str = "JsReference";

/// A strong or weak durable handle to one JS value.
pub struct JsReference {
    env: Env,
    native: Mutex<Option<NativeRef>>,
    is_weak: AtomicBool,
    disposed: AtomicBool,
}

impl JsReference {
    /// Create a reference to `value`.
    ///
    /// A strong reference keeps the value alive; a weak one lets the
    /// collector reclaim it once nothing else does.
    pub fn new(scope: &mut v8::PinScope, value: v8::Local<v8::Value>, is_weak: bool) -> Result<Self> {
        let env = Env::from_scope(scope).ok_or(Error::EngineOperationFailed(Status::InvalidArg))?;
        let native = NativeRef::new(scope, value, if is_weak { 0 } else { 1 })?;

        Ok(Self::with_native(env, native, is_weak))
    }

    /// Adopt an existing native reference.
    ///
    /// The reference is associated with the engine whose call-scope is active
    /// on this thread; `native` must belong to that engine and its count must
    /// agree with `is_weak`. On failure `native` is handed back untouched.
    pub fn from_native(
        native: NativeRef,
        is_weak: bool,
    ) -> std::result::Result<Self, (Error, NativeRef)> {
        let Some(env) = Env::current() else {
            let error = Error::UsageViolation(
                "adopting a native reference requires an active call-scope".into(),
            );
            return Err((error, native));
        };

        if *native.env() != env {
            let error = Error::UsageViolation(format!(
                "native reference belongs to env {}, active call-scope is env {}",
                native.env_id(),
                env.id()
            ));
            return Err((error, native));
        }

        if (native.ref_count() == 0) != is_weak {
            let error = Error::UsageViolation(format!(
                "native reference count {} does not match is_weak = {}",
                native.ref_count(),
                is_weak
            ));
            return Err((error, native));
        }

        Ok(Self::with_native(env, native, is_weak))
    }

    fn with_native(env: Env, native: NativeRef, is_weak: bool) -> Self {
        Self {
            env,
            native: Mutex::new(Some(native)),
            is_weak: AtomicBool::new(is_weak),
            disposed: AtomicBool::new(false),
        }
    }

    pub fn env(&self) -> &Env {
        &self.env
    }

    pub fn is_weak(&self) -> bool {
        self.is_weak.load(Ordering::Acquire)
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    /// Downgrade to a weak reference. No-op if already weak.
    pub fn make_weak(&self, scope: &mut v8::PinScope) -> Result<()> {
        let mut guard = self.lock_native();
        let native = guard.as_mut().ok_or(Error::Disposed(TYPE_NAME))?;

        if self.is_weak() {
            return Ok(());
        }

        self.check_scope(scope)?;
        native.unref(scope)?;
        self.is_weak.store(true, Ordering::Release);
        Ok(())
    }

    /// Upgrade to a strong reference. No-op if already strong.
    ///
    /// If a weak referent was already collected the reference stays empty.
    pub fn make_strong(&self, scope: &mut v8::PinScope) -> Result<()> {
        let mut guard = self.lock_native();
        let native = guard.as_mut().ok_or(Error::Disposed(TYPE_NAME))?;

        if !self.is_weak() {
            return Ok(());
        }

        self.check_scope(scope)?;
        native.refer(scope)?;
        self.is_weak.store(false, Ordering::Release);
        Ok(())
    }

    /// The referenced value as a handle of `scope`.
    ///
    /// Returns `None` if the reference is weak and the value was collected.
    pub fn get_value<'s>(
        &self,
        scope: &mut v8::PinScope<'s, '_>,
    ) -> Result<Option<v8::Local<'s, v8::Value>>> {
        let guard = self.lock_native();
        let native = guard.as_ref().ok_or(Error::Disposed(TYPE_NAME))?;

        self.check_scope(scope)?;
        Ok(native.get(scope)?)
    }

    /// Release the native reference. Idempotent.
    ///
    /// Called off the engine thread, or outside a call-scope, the release is
    /// queued and happens at the start of the engine's next turn. If the
    /// engine is shutting down the reference is still released and
    /// `EngineOperationFailed(Closing)` is returned.
    pub fn dispose(&self) -> Result<()> {
        self.release(true)
    }

    /// Take the native reference back out, leaving this reference disposed.
    ///
    /// The returned reference may be dropped on any thread; its handle is
    /// still released on the engine thread.
    pub fn into_native(self) -> Result<NativeRef> {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return Err(Error::Disposed(TYPE_NAME));
        }

        self.lock_native().take().ok_or(Error::Disposed(TYPE_NAME))
    }

    fn release(&self, disposing: bool) -> Result<()> {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        let Some(native) = self.lock_native().take() else {
            return Ok(());
        };

        // Immediate inside a call-scope of our engine, queued otherwise
        match native.release() {
            Ok(()) => Ok(()),
            Err(status) if disposing => Err(status.into()),
            Err(status) => {
                log::debug!(
                    "Reference of env {} released during shutdown: {}",
                    self.env.id(),
                    status
                );
                Ok(())
            }
        }
    }

    fn check_scope(&self, scope: &v8::PinScope) -> Result<()> {
        match Env::from_scope(scope) {
            Some(env) if env == self.env => Ok(()),
            Some(env) => Err(Error::UsageViolation(format!(
                "reference of env {} used with a scope of env {}",
                self.env.id(),
                env.id()
            ))),
            None => Err(Error::UsageViolation(format!(
                "reference of env {} used with a scope of a foreign isolate",
                self.env.id()
            ))),
        }
    }

    fn lock_native(&self) -> MutexGuard<'_, Option<NativeRef>> {
        self.native.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for JsReference {
    fn drop(&mut self) {
        // Errors are already logged by release(false)
        let _ = self.release(false);
    }
}

impl fmt::Debug for JsReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JsReference")
            .field("env_id", &self.env.id())
            .field("is_weak", &self.is_weak())
            .field("is_disposed", &self.is_disposed())
            .finish()
    }
}
