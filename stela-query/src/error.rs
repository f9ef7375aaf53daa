//! Error types for query planning and execution.

use stela_index::IndexError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum QueryError {
    /// The query text could not be parsed. Reported to the client with the
    /// byte position of the offending token.
    #[error("query parse error at byte {position}: {message}")]
    Parse { position: usize, message: String },

    /// A fixed entity referenced by a text scan is not part of the
    /// knowledge graph. Raised at operator construction time.
    #[error("{0}")]
    UnknownEntity(String),

    #[error(transparent)]
    Index(#[from] IndexError),

    #[error(transparent)]
    Core(#[from] stela_core::Error),

    #[error("{0}")]
    Other(String),
}

impl QueryError {
    pub fn parse(position: usize, message: impl Into<String>) -> Self {
        QueryError::Parse {
            position,
            message: message.into(),
        }
    }

    pub fn other(msg: impl Into<String>) -> Self {
        QueryError::Other(msg.into())
    }

    /// Check whether this error is a cancellation marker.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, QueryError::Core(stela_core::Error::Cancelled))
    }
}

pub type Result<T> = std::result::Result<T, QueryError>;
