//! Error types for index construction and access.

use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum IndexError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("corrupt index: {0}")]
    Corrupt(String),

    /// A versioned file was written by an incompatible build. The message
    /// names the required version and instructs the user to rebuild.
    #[error("{0}")]
    VersionMismatch(String),

    #[error(transparent)]
    Core(#[from] stela_core::Error),
}

impl IndexError {
    pub fn corrupt(msg: impl Into<String>) -> Self {
        IndexError::Corrupt(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, IndexError>;
