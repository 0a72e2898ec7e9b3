//! Event loop of an engine.
//!
//! One loop iteration (a "turn") is:
//!
//! 1. Poll the loop channel (with waker registration)
//! 2. Run all received callbacks in batch
//! 3. Pump V8 platform + microtask checkpoint
//!
//! The loop stops once its env is no longer alive: no queue holds a
//! keep-alive reference and no submitted callback is waiting to run.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::sync::mpsc;

use crate::env::Env;
use crate::threadsafe_function::QueuedCall;

/// Messages delivered to the engine thread.
pub(crate) enum LoopMessage {
    /// A callback submitted through a threadsafe function.
    Call(QueuedCall),
    /// Liveness changed; re-evaluate whether to keep running.
    Wake,
}

/// Types that can run a turn of the engine loop.
pub(crate) trait EventLoopRuntime {
    fn env(&self) -> &Env;

    /// Get mutable access to the loop receiver.
    fn loop_rx_mut(&mut self) -> &mut mpsc::UnboundedReceiver<LoopMessage>;

    /// Run a batch of callbacks on the engine thread.
    fn process_calls(&mut self, calls: &mut Vec<QueuedCall>);

    /// Pump V8 platform messages and run microtask checkpoint.
    fn pump_and_checkpoint(&mut self);
}

/// Drain and process all pending callbacks.
///
/// # Returns
/// * `Ok(())` - Callbacks processed, continue event loop
/// * `Err(msg)` - Channel closed, event loop should exit
pub(crate) fn drain_and_process<R: EventLoopRuntime>(
    cx: &mut Context<'_>,
    runtime: &mut R,
    pending_calls: &mut Vec<QueuedCall>,
) -> Result<(), String> {
    // 1. Poll loop channel until Pending (registers waker)
    loop {
        match Pin::new(runtime.loop_rx_mut()).poll_recv(cx) {
            Poll::Ready(Some(LoopMessage::Call(call))) => {
                pending_calls.push(call);
            }
            Poll::Ready(Some(LoopMessage::Wake)) => {}
            Poll::Ready(None) => {
                return Err("Event loop channel closed".to_string());
            }
            Poll::Pending => break,
        }
    }

    // 2. Run all received callbacks in batch
    if !pending_calls.is_empty() {
        runtime.process_calls(pending_calls);
    }

    // 3. V8 platform messages + microtask checkpoint
    runtime.pump_and_checkpoint();

    Ok(())
}

/// Future that drives turns until the env goes idle.
pub(crate) struct EventLoopFuture<'a, R: EventLoopRuntime> {
    runtime: &'a mut R,
    pending_calls: Vec<QueuedCall>,
}

impl<'a, R: EventLoopRuntime> EventLoopFuture<'a, R> {
    pub(crate) fn new(runtime: &'a mut R) -> Self {
        Self {
            runtime,
            pending_calls: Vec::new(),
        }
    }
}

impl<R: EventLoopRuntime> Future for EventLoopFuture<'_, R> {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        let this = self.get_mut();

        if let Err(e) = drain_and_process(cx, this.runtime, &mut this.pending_calls) {
            log::debug!("Event loop stopped: {}", e);
            return Poll::Ready(());
        }

        if !this.runtime.env().is_alive() {
            return Poll::Ready(());
        }

        // The channel registered our waker; any submission or liveness
        // change after this point wakes the next turn.
        Poll::Pending
    }
}
