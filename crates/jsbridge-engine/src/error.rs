//! Engine error types
//!
//! Script failures keep the location information reported by the compiler
//! or the interpreter so the bridge can render them for the managed side.

use thiserror::Error;

use crate::value::Value;

/// Result type alias for engine operations
pub type EngineResult<T> = Result<T, EngineError>;

/// Errors produced by the reference engine
#[derive(Debug, Clone, Error)]
pub enum EngineError {
    /// Source text could not be compiled
    #[error("{message}")]
    Syntax {
        message: String,
        line: u32,
        column: u32,
    },

    /// A script (or a native callback it called) threw a value that was not caught
    #[error("{message}")]
    Exception {
        message: String,
        line: Option<u32>,
        column: Option<u32>,
        stack: Option<String>,
        /// The thrown value itself. Only valid while the object is reachable.
        value: Value,
    },

    /// Execution was terminated through a [`crate::TerminationHandle`]
    #[error("Script execution was terminated")]
    Terminated,

    /// An [`crate::ObjectRef`] points to a collected object
    #[error("Object reference is no longer valid")]
    InvalidObject,

    /// A [`crate::Persistent`] was reset or never existed
    #[error("Persistent handle is no longer valid")]
    InvalidPersistent,

    /// Call target is not callable
    #[error("Value is not a function")]
    NotAFunction,

    /// Internal/unexpected error
    #[error("Internal engine error: {0}")]
    Internal(String),
}

impl EngineError {
    /// Create an exception error without location information
    pub fn exception(message: impl Into<String>, value: Value) -> Self {
        EngineError::Exception {
            message: message.into(),
            line: None,
            column: None,
            stack: None,
            value,
        }
    }

    /// Line and column if the error carries a location
    pub fn location(&self) -> Option<(u32, u32)> {
        match self {
            EngineError::Syntax { line, column, .. } => Some((*line, *column)),
            EngineError::Exception {
                line: Some(line),
                column: Some(column),
                ..
            } => Some((*line, *column)),
            _ => None,
        }
    }

    pub fn is_terminated(&self) -> bool {
        matches!(self, EngineError::Terminated)
    }
}
