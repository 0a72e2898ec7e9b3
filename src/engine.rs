//! Engine - one V8 isolate with one context and its event loop.
//!
//! The engine lives on the thread that created it. Everything other threads
//! need goes through its [`Env`].
//!
//! ```ignore
//! let mut engine = Engine::new(EngineConfig::default())?;
//!
//! let context = engine.with_scope(|scope| JsSynchronizationContext::new(scope))?;
//!
//! std::thread::spawn(move || {
//!     context.post(|scope| { /* runs on the engine thread */ });
//! });
//!
//! engine.run_event_loop();
//! ```

use std::panic::{self, AssertUnwindSafe};
use std::pin::pin;
use std::rc::Rc;
use std::task::{Context, Waker};
use std::time::Duration;

use tokio::sync::mpsc;

use crate::config::EngineConfig;
use crate::env::Env;
use crate::error::{Error, Result};
use crate::event_loop::{EventLoopFuture, EventLoopRuntime, LoopMessage, drain_and_process};
use crate::gc::CallScope;
use crate::platform::get_platform;
use crate::threadsafe_function::QueuedCall;

/// A V8 engine instance.
///
/// `Engine` is `!Send`: it must be driven from the thread that created it.
pub struct Engine {
    // Dropped before the isolate
    context: v8::Global<v8::Context>,
    isolate: v8::OwnedIsolate,
    env: Env,
    loop_rx: mpsc::UnboundedReceiver<LoopMessage>,
    runtime: Rc<tokio::runtime::Runtime>,
    config: EngineConfig,
}

impl Engine {
    /// Create an engine on the current thread.
    pub fn new(config: EngineConfig) -> Result<Self> {
        // Process-wide, initialized once
        get_platform();

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .map_err(|e| Error::Startup(format!("failed to build loop driver: {}", e)))?;

        let params = v8::CreateParams::default()
            .heap_limits(config.heap_initial_bytes(), config.heap_max_bytes());
        let mut isolate = v8::Isolate::new(params);

        let (loop_tx, loop_rx) = mpsc::unbounded_channel();
        let env = Env::new(loop_tx);
        isolate.set_slot(env.clone());

        let context = {
            let scope = pin!(v8::HandleScope::new(&mut isolate));
            let mut scope = scope.init();
            let context = v8::Context::new(&scope, Default::default());
            let scope = &mut v8::ContextScope::new(&mut scope, context);
            v8::Global::new(scope.as_ref(), context)
        };

        log::debug!(
            "Engine created (env {}, heap {}-{} MB)",
            env.id(),
            config.heap_initial_mb,
            config.heap_max_mb
        );

        Ok(Self {
            context,
            isolate,
            env,
            loop_rx,
            runtime: Rc::new(runtime),
            config,
        })
    }

    pub fn env(&self) -> &Env {
        &self.env
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Run `f` inside a call-scope of this engine.
    ///
    /// References released from other threads are destroyed first; pending
    /// microtasks run after `f` returns.
    pub fn with_scope<F, R>(&mut self, f: F) -> R
    where
        F: FnOnce(&mut v8::PinScope) -> R,
    {
        let result = {
            let scope = pin!(v8::HandleScope::new(&mut self.isolate));
            let mut scope = scope.init();
            let context = v8::Local::new(&scope, &self.context);
            let scope = &mut v8::ContextScope::new(&mut scope, context);

            let _call_scope = CallScope::enter(&self.env);
            f(scope)
        };

        self.isolate.perform_microtask_checkpoint();
        result
    }

    /// Run turns until the loop is idle.
    pub fn run_event_loop(&mut self) {
        let runtime = Rc::clone(&self.runtime);
        runtime.block_on(EventLoopFuture::new(self));
    }

    /// Run turns until the loop is idle or `timeout` elapses.
    pub fn run_event_loop_for(&mut self, timeout: Duration) -> Result<()> {
        let runtime = Rc::clone(&self.runtime);
        runtime
            .block_on(async move { tokio::time::timeout(timeout, EventLoopFuture::new(self)).await })
            .map_err(|_| Error::Timeout)
    }

    /// Run one turn with whatever is queued right now, without waiting.
    pub fn run_pending(&mut self) {
        let mut cx = Context::from_waker(Waker::noop());
        let mut pending = Vec::new();

        if let Err(e) = drain_and_process(&mut cx, self, &mut pending) {
            log::debug!("Event loop stopped: {}", e);
        }
    }

    /// Force a full garbage collection.
    ///
    /// Weak referents with no other path from a root are collected.
    pub fn collect_garbage(&mut self) {
        self.isolate
            .request_garbage_collection_for_testing(v8::GarbageCollectionType::Full);
    }

    fn run_call(&mut self, call: QueuedCall) {
        self.env.call_started();

        let resource_name = call.resource_name().to_string();

        let scope = pin!(v8::HandleScope::new(&mut self.isolate));
        let mut scope = scope.init();
        let context = v8::Local::new(&scope, &self.context);
        let scope = &mut v8::ContextScope::new(&mut scope, context);

        let _call_scope = CallScope::enter(&self.env);

        let result = panic::catch_unwind(AssertUnwindSafe(|| call.run(scope)));

        if result.is_err() {
            log::error!("Callback queued on '{}' panicked", resource_name);
        }
    }
}

impl EventLoopRuntime for Engine {
    fn env(&self) -> &Env {
        &self.env
    }

    fn loop_rx_mut(&mut self) -> &mut mpsc::UnboundedReceiver<LoopMessage> {
        &mut self.loop_rx
    }

    fn process_calls(&mut self, calls: &mut Vec<QueuedCall>) {
        for call in calls.drain(..) {
            self.run_call(call);
        }
    }

    fn pump_and_checkpoint(&mut self) {
        while v8::Platform::pump_message_loop(get_platform(), &self.isolate, false) {}
        self.isolate.perform_microtask_checkpoint();
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.env.close();
        self.loop_rx.close();

        let mut dropped = 0;

        while let Ok(message) = self.loop_rx.try_recv() {
            if let LoopMessage::Call(call) = message {
                self.env.call_started();
                drop(call);
                dropped += 1;
            }
        }

        // Dropped callbacks may have released references of their own
        let released = self.env.deferred().process_all();

        log::debug!(
            "Engine env {} dropped ({} pending callbacks discarded, {} references released)",
            self.env.id(),
            dropped,
            released
        );
    }
}
