#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use jsbridge_v8::{EngineConfig, EngineThread, JsSynchronizationContext};

/// Install a test logger once. Output shows up with `RUST_LOG=debug`.
pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Engine config with a loop bound, so a broken test fails instead of hanging.
pub fn test_config() -> EngineConfig {
    EngineConfig::new()
        .thread_name("jsbridge-test-engine")
        .loop_timeout(Duration::from_secs(10))
}

/// Spawn an engine thread with a synchronization context kept alive by an
/// open async scope. Close the scope to let the engine thread finish.
pub fn spawn_engine_with_context() -> (EngineThread, Arc<JsSynchronizationContext>) {
    init_logger();

    EngineThread::spawn(test_config(), |scope| {
        let context = JsSynchronizationContext::new(scope)?;
        context.open_async_scope();
        Ok(context)
    })
    .unwrap()
}
