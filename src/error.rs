//! Error and status types for the bridge.
//!
//! The embedding layer (native references, threadsafe functions) reports
//! failures as a napi-style [`Status`]. Everything host callers see is an
//! [`Error`], which wraps a `Status` when the failure came from the engine.

use std::fmt;

/// Status codes reported by the embedding layer.
///
/// Discriminants follow the Node-API numbering so logs stay comparable
/// with other embedders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum Status {
    /// An argument did not belong to this engine or was out of range.
    InvalidArg = 1,
    /// The operation is not valid in the handle's current state.
    GenericFailure = 9,
    /// A bounded queue was full and the call was non-blocking.
    QueueFull = 15,
    /// The queue or engine is shutting down and accepts no more work.
    Closing = 16,
}

impl Status {
    /// Numeric status code.
    pub fn code(self) -> i32 {
        self as i32
    }

    fn as_str(self) -> &'static str {
        match self {
            Status::InvalidArg => "invalid argument",
            Status::GenericFailure => "generic failure",
            Status::QueueFull => "queue full",
            Status::Closing => "closing",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (status {})", self.as_str(), self.code())
    }
}

/// Errors surfaced to callers of the bridge.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The object was already disposed.
    #[error("{0} has been disposed")]
    Disposed(&'static str),

    /// The embedding layer rejected the operation.
    #[error("engine operation failed: {0}")]
    EngineOperationFailed(Status),

    /// The caller broke a threading or scoping rule.
    #[error("usage violation: {0}")]
    UsageViolation(String),

    /// A blocking call was dropped on the engine side before it ran.
    #[error("callback was dropped before it ran on the engine thread")]
    CallbackDropped,

    /// A bounded wait elapsed.
    #[error("timed out waiting for the engine thread")]
    Timeout,

    /// The engine or its thread could not be created.
    #[error("failed to start engine: {0}")]
    Startup(String),

    /// The engine thread panicked.
    #[error("engine thread panicked")]
    EngineThreadPanicked,
}

impl From<Status> for Error {
    fn from(status: Status) -> Self {
        Error::EngineOperationFailed(status)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
