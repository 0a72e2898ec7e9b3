//! Native references: engine-GC-tracked handles with a reference count.
//!
//! A [`NativeRef`] follows Node-API reference semantics. While its count is
//! positive it holds a `v8::Global`, which the V8 collector treats as a root.
//! At count zero it holds a `v8::Weak`, which observes the value only while
//! something else keeps it reachable. Dropping a `NativeRef` deletes it on
//! the engine thread, wherever the drop happens.

use std::fmt;

use super::CallScope;
use crate::env::{Env, EnvId};
use crate::error::Status;

/// The V8 handle behind a native reference.
pub(crate) enum Handle {
    Strong(v8::Global<v8::Value>),
    Weak(v8::Weak<v8::Value>),
}

// SAFETY: a Handle is only reset on its engine's thread. NativeRef releases
// it there directly while a call-scope of that engine is active, and queues
// it on the engine's DeferredDestructionQueue otherwise, which is drained
// only by the engine thread. Handles still queued when the isolate is gone
// skip their reset.
unsafe impl Send for Handle {}

/// An owned native reference to one JS value.
///
/// Dropping it deletes the reference. Off the engine thread, or outside a
/// call-scope, the handle is queued and reset on the engine's next turn.
pub struct NativeRef {
    /// `None` only once released.
    handle: Option<Handle>,
    count: u32,
    env: Env,
}

impl NativeRef {
    /// Create a native reference to `value` with the given initial count.
    ///
    /// Fails with `InvalidArg` if `scope` does not belong to a bridged engine
    /// and with `Closing` if that engine is shutting down.
    pub fn new(
        scope: &mut v8::PinScope,
        value: v8::Local<v8::Value>,
        initial_count: u32,
    ) -> Result<Self, Status> {
        let env = Env::from_scope(scope).ok_or(Status::InvalidArg)?;

        if env.is_closing() {
            return Err(Status::Closing);
        }

        let global = v8::Global::new(scope, value);
        let handle = if initial_count > 0 {
            Handle::Strong(global)
        } else {
            Handle::Weak(v8::Weak::new(scope, &global))
        };

        Ok(Self {
            handle: Some(handle),
            count: initial_count,
            env,
        })
    }

    pub fn ref_count(&self) -> u32 {
        self.count
    }

    /// The engine this reference was created in.
    pub fn env(&self) -> &Env {
        &self.env
    }

    pub fn env_id(&self) -> EnvId {
        self.env.id()
    }

    /// Increment the count, upgrading to a strong handle on 0 → 1.
    ///
    /// If the weak referent was already collected the count still moves, but
    /// the reference keeps reporting no value.
    pub fn refer(&mut self, scope: &mut v8::PinScope) -> Result<u32, Status> {
        self.check_owner(scope)?;

        if self.count == 0
            && let Some(Handle::Weak(weak)) = &self.handle
            && let Some(global) = weak.to_global(scope)
        {
            self.handle = Some(Handle::Strong(global));
        }

        self.count += 1;
        Ok(self.count)
    }

    /// Decrement the count, downgrading to a weak handle on 1 → 0.
    pub fn unref(&mut self, scope: &mut v8::PinScope) -> Result<u32, Status> {
        self.check_owner(scope)?;

        if self.count == 0 {
            return Err(Status::GenericFailure);
        }

        if self.count == 1
            && let Some(Handle::Strong(global)) = &self.handle
        {
            let weak = v8::Weak::new(scope, global);
            self.handle = Some(Handle::Weak(weak));
        }

        self.count -= 1;
        Ok(self.count)
    }

    /// The referenced value as a handle of `scope`, or `None` once a weak
    /// referent has been collected.
    pub fn get<'s>(
        &self,
        scope: &mut v8::PinScope<'s, '_>,
    ) -> Result<Option<v8::Local<'s, v8::Value>>, Status> {
        self.check_owner(scope)?;

        Ok(match &self.handle {
            Some(Handle::Strong(global)) => Some(v8::Local::new(scope, global)),
            Some(Handle::Weak(weak)) => weak.to_local(scope),
            None => None,
        })
    }

    /// Delete the reference, reporting `Closing` if the engine is going away.
    ///
    /// The handle is released exactly once either way.
    pub(crate) fn release(mut self) -> Result<(), Status> {
        self.release_handle()
    }

    fn release_handle(&mut self) -> Result<(), Status> {
        let Some(handle) = self.handle.take() else {
            return Ok(());
        };

        if CallScope::is_active_for(&self.env) {
            drop(handle);
            return Ok(());
        }

        self.env.defer_release(handle)
    }

    fn check_owner(&self, scope: &v8::PinScope) -> Result<(), Status> {
        match Env::from_scope(scope) {
            Some(env) if env == self.env => Ok(()),
            _ => Err(Status::InvalidArg),
        }
    }
}

impl Drop for NativeRef {
    fn drop(&mut self) {
        if let Err(status) = self.release_handle() {
            log::debug!(
                "Native reference of env {} released during shutdown: {}",
                self.env.id(),
                status
            );
        }
    }
}

impl fmt::Debug for NativeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.handle {
            Some(Handle::Strong(_)) => "strong",
            Some(Handle::Weak(_)) => "weak",
            None => "released",
        };

        f.debug_struct("NativeRef")
            .field("env_id", &self.env.id())
            .field("count", &self.count)
            .field("handle", &kind)
            .finish()
    }
}
