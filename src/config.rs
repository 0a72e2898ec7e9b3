//! Engine configuration.

use std::time::Duration;

/// Settings for one [`Engine`](crate::Engine).
///
/// Heap limits are given in megabytes, like the limits of the worker
/// runtimes this crate grew out of.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    pub heap_initial_mb: usize,
    pub heap_max_mb: usize,
    /// Name of the OS thread created by [`EngineThread`](crate::EngineThread).
    pub thread_name: String,
    /// Upper bound for [`EngineThread`](crate::EngineThread)'s event loop.
    /// `None` runs until the loop is idle.
    pub loop_timeout: Option<Duration>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            heap_initial_mb: 1,
            heap_max_mb: 128,
            thread_name: "jsbridge-engine".to_string(),
            loop_timeout: None,
        }
    }
}

impl EngineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn heap_limits(mut self, initial_mb: usize, max_mb: usize) -> Self {
        self.heap_initial_mb = initial_mb;
        self.heap_max_mb = max_mb.max(initial_mb);
        self
    }

    pub fn thread_name(mut self, name: impl Into<String>) -> Self {
        self.thread_name = name.into();
        self
    }

    pub fn loop_timeout(mut self, timeout: Duration) -> Self {
        self.loop_timeout = Some(timeout);
        self
    }

    pub(crate) fn heap_initial_bytes(&self) -> usize {
        self.heap_initial_mb * 1024 * 1024
    }

    pub(crate) fn heap_max_bytes(&self) -> usize {
        self.heap_max_mb * 1024 * 1024
    }
}
