//! Error types for stela-core

use thiserror::Error;

/// Result type alias using our Error
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type
#[derive(Error, Debug)]
pub enum Error {
    /// The shared memory budget for intermediate results was exceeded.
    /// This aborts the current query but never the process.
    #[error("memory budget exceeded: requested {requested} bytes, {available} available")]
    MemoryBudgetExceeded { requested: usize, available: usize },

    /// A long-running operation was cancelled.
    #[error("operation was cancelled")]
    Cancelled,

    /// A value could not be encoded as a `ValueId`.
    #[error("invalid value: {0}")]
    InvalidValue(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(String),

    /// Generic error with message
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create an invalid value error
    pub fn invalid_value(msg: impl Into<String>) -> Self {
        Error::InvalidValue(msg.into())
    }

    /// Create an I/O error
    pub fn io(msg: impl Into<String>) -> Self {
        Error::Io(msg.into())
    }

    /// Create a generic error
    pub fn other(msg: impl Into<String>) -> Self {
        Error::Other(msg.into())
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e.to_string())
    }
}
