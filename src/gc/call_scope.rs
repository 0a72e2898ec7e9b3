//! CallScope - RAII tracking of the engine call-scope active on a thread.
//!
//! Engine code runs inside a call-scope: a context-entered handle scope of
//! one engine, opened by the engine itself for every turn. While a call-scope
//! is active, native references of that engine are released immediately.
//! Outside of one, they are queued on the engine's
//! [`DeferredDestructionQueue`](super::DeferredDestructionQueue).

use std::cell::RefCell;

use crate::env::Env;

thread_local! {
    /// Env of the innermost active call-scope of this thread.
    static CURRENT_ENV: RefCell<Option<Env>> = const { RefCell::new(None) };
}

/// RAII guard marking an engine call-scope as active on this thread.
///
/// Nested guards form a stack: dropping one restores whatever was active
/// when it was created.
///
/// # Example
///
/// ```ignore
/// let scope = pin!(v8::HandleScope::new(&mut isolate));
/// let mut scope = scope.init();
/// let context = v8::Local::new(&scope, &context);
/// let scope = &mut v8::ContextScope::new(&mut scope, context);
///
/// // Releases queued references, then registers the env
/// let _call_scope = CallScope::enter(&env);
/// ```
pub struct CallScope {
    previous: Option<Env>,
}

impl CallScope {
    /// Enter a call-scope of `env`.
    ///
    /// Must be called on the engine thread with a handle scope of `env` open.
    /// References released from other threads since the last turn are
    /// destroyed first.
    pub(crate) fn enter(env: &Env) -> Self {
        let processed = env.deferred().process_all();

        if processed > 0 {
            log::trace!("Released {} deferred references on call-scope entry", processed);
        }

        let previous = CURRENT_ENV.with(|c| c.replace(Some(env.clone())));

        Self { previous }
    }

    /// Env of the innermost active call-scope on this thread.
    pub fn current_env() -> Option<Env> {
        CURRENT_ENV.with(|c| c.borrow().clone())
    }

    /// Whether a call-scope of `env` is the innermost active one here.
    pub fn is_active_for(env: &Env) -> bool {
        CURRENT_ENV.with(|c| c.borrow().as_ref().is_some_and(|active| active == env))
    }
}

impl Drop for CallScope {
    fn drop(&mut self) {
        let previous = self.previous.take();
        CURRENT_ENV.with(|c| *c.borrow_mut() = previous);
    }
}
