//! Error types for jsbridge-core
//!
//! Only API misuse surfaces as a [`BridgeError`]. Script failures are turned
//! into error-typed handle proxies instead, and disposal is idempotent, so
//! neither shows up here.

use thiserror::Error;

pub use jsbridge_engine::{EngineError, EngineResult};

use crate::proxy::HandleId;
use crate::registry::SessionId;

/// Result type alias for bridge operations
pub type BridgeResult<T> = Result<T, BridgeError>;

/// Errors that can occur when driving an [`crate::EngineSession`]
#[derive(Error, Debug, Clone)]
pub enum BridgeError {
    /// Handle id is out of range or refers to a recycled slot
    #[error("Invalid handle: {0}")]
    InvalidHandle(HandleId),

    /// Operation requires an object handle
    #[error("Handle {0} is not an object")]
    NotAnObject(HandleId),

    /// Operation requires an array handle
    #[error("Handle {0} is not an array")]
    NotAnArray(HandleId),

    /// Operation requires a callable handle
    #[error("Handle {0} is not a function")]
    NotAFunction(HandleId),

    /// The owning session was disposed
    #[error("Engine session {0} has been disposed")]
    SessionDisposed(SessionId),

    /// Template handle does not belong to this session (or was deleted)
    #[error("Unknown template")]
    UnknownTemplate,

    /// Error reported by the engine outside of script execution
    #[error(transparent)]
    Engine(#[from] EngineError),
}

impl BridgeError {
    /// `true` for errors caused by a stale or foreign handle id
    pub fn is_invalid_handle(&self) -> bool {
        matches!(self, BridgeError::InvalidHandle(_))
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Engine(EngineError::Internal(message.into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        assert_eq!(BridgeError::InvalidHandle(7).to_string(), "Invalid handle: 7");
        assert_eq!(
            BridgeError::NotAnArray(3).to_string(),
            "Handle 3 is not an array"
        );
        assert_eq!(
            BridgeError::SessionDisposed(2).to_string(),
            "Engine session 2 has been disposed"
        );
    }

    #[test]
    fn test_engine_error_is_transparent() {
        let err: BridgeError = EngineError::NotAFunction.into();
        assert_eq!(err.to_string(), "Value is not a function");
        assert!(!err.is_invalid_handle());
        assert!(BridgeError::InvalidHandle(1).is_invalid_handle());
    }
}
