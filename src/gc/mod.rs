//! Native reference lifetime across the engine's garbage collector.
//!
//! This module provides the engine-facing half of reference management:
//! GC-tracked native references, the call-scope registration that tells
//! code which engine is active on a thread, and deferred destruction for
//! references released elsewhere.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │  CallScope (RAII)                                           │
//! │  ├── Registered per engine turn, thread-local stack         │
//! │  ├── Exposes the active Env to drop paths                   │
//! │  └── Processes deferred reference releases on entry         │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │  DeferredDestructionQueue                                   │
//! │  ├── Thread-safe queue of V8 handles                        │
//! │  ├── Fed when a NativeRef is dropped off-scope              │
//! │  └── Drained on next call-scope entry or engine drop        │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │  NativeRef                                                  │
//! │  ├── count > 0 → v8::Global (root)                          │
//! │  └── count = 0 → v8::Weak (observer)                        │
//! └─────────────────────────────────────────────────────────────┘
//! ```

mod call_scope;
mod deferred_destruction;
mod native_ref;

pub use call_scope::CallScope;
pub use deferred_destruction::DeferredDestructionQueue;
pub use native_ref::NativeRef;
pub(crate) use native_ref::Handle;

#[cfg(test)]
mod tests;
