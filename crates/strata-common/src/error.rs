//! Error types for strata.

use crate::handle::ObjId;
use thiserror::Error;

/// Result type alias using StrataError.
pub type Result<T> = std::result::Result<T, StrataError>;

/// Errors that can occur in strata operations.
#[derive(Debug, Error)]
pub enum StrataError {
    /// The store has signalled that the enclosing transaction must be
    /// re-run. Consumed by the transaction driver; never visible through
    /// the public collection API.
    #[error("transaction restart needed")]
    RestartNeeded,

    // Encoding errors
    #[error("decode error: {0}")]
    Decode(String),

    // Structural self-check failures; these always indicate a bug
    #[error("invariant violated: {0}")]
    InvariantViolation(String),

    // Store errors
    #[error("object not found: {obj}")]
    ObjectNotFound { obj: ObjId },

    #[error("transaction conflict: {0}")]
    Conflict(String),

    #[error("store error: {0}")]
    Store(String),

    // Configuration errors
    #[error("invalid parameter: {name} = {value}")]
    InvalidParameter { name: String, value: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_restart_display() {
        let err = StrataError::RestartNeeded;
        assert_eq!(err.to_string(), "transaction restart needed");
    }

    #[test]
    fn test_decode_display() {
        let err = StrataError::Decode("trailing bytes".to_string());
        assert_eq!(err.to_string(), "decode error: trailing bytes");
    }

    #[test]
    fn test_object_not_found_display() {
        let err = StrataError::ObjectNotFound { obj: ObjId(42) };
        assert_eq!(err.to_string(), "object not found: obj:42");
    }

    #[test]
    fn test_invalid_parameter_display() {
        let err = StrataError::InvalidParameter {
            name: "order".to_string(),
            value: "2".to_string(),
        };
        assert_eq!(err.to_string(), "invalid parameter: order = 2");
    }

    #[test]
    fn test_result_type_alias() {
        fn returns_ok() -> Result<i32> {
            Ok(42)
        }

        fn returns_err() -> Result<i32> {
            Err(StrataError::Store("test".to_string()))
        }

        assert!(returns_ok().is_ok());
        assert!(returns_err().is_err());
    }

    #[test]
    fn test_error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<StrataError>();
    }
}
