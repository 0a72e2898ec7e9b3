pub mod config;
pub mod engine;
pub mod engine_thread;
pub mod env;
pub mod error;
pub mod gc;
pub mod platform;
pub mod reference;
pub mod sync_context;
pub mod threadsafe_function;
pub mod value;

mod event_loop;

// Core API
pub use engine::Engine;
pub use engine_thread::EngineThread;
pub use env::{Env, EnvId};
pub use reference::JsReference;
pub use sync_context::JsSynchronizationContext;

pub use config::EngineConfig;
pub use error::{Error, Result, Status};
pub use gc::{CallScope, NativeRef};
pub use threadsafe_function::{CallMode, Callback, ThreadsafeFunction};
pub use value::{AsJsValue, JsValueType};

// Re-export the engine binding so embedders use the same version
pub use v8;
