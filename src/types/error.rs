//! Unified error types for the crate
//!
//! This module defines error types that:
//! - Are serializable for transport to a schema/service layer
//! - Distinguish fatal invariant violations from lookup failures
//! - Map backing-store failures to a single fatal variant

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error type for all query, read, and subscription operations
///
/// Expected partial-result conditions (an unresolvable named property, an
/// out-of-window change notification, an unknown physical property type) are
/// represented as absences in the results, never as one of these variants.
#[derive(Debug, Clone, Error, Serialize, Deserialize)]
#[serde(tag = "type", content = "message")]
pub enum GraphMailError {
    /// A programmer-invariant was violated; the operation is aborted and
    /// never retried. Cached state is untouched.
    #[error("Invariant violation: {0}")]
    Invariant(String),

    #[error("Store not found: {0}")]
    StoreNotFound(String),

    #[error("Folder not found: {0}")]
    FolderNotFound(String),

    #[error("Item not found: {0}")]
    ItemNotFound(String),

    /// A backing-store I/O failure. Fatal to the operation that triggered
    /// it; the core performs no automatic retry.
    #[error("Backing store error: {0}")]
    Backend(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Operation not supported: {0}")]
    NotSupported(String),
}

/// Result type alias using GraphMailError
pub type Result<T> = std::result::Result<T, GraphMailError>;

/// Fail fast with `Invariant` when a precondition does not hold.
pub(crate) fn check(condition: bool, what: &str) -> Result<()> {
    if condition {
        Ok(())
    } else {
        Err(GraphMailError::Invariant(what.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_passes_and_fails() {
        assert!(check(true, "fine").is_ok());

        let err = check(false, "resolved property count mismatch").unwrap_err();
        match err {
            GraphMailError::Invariant(msg) => {
                assert_eq!(msg, "resolved property count mismatch");
            }
            other => panic!("Expected Invariant, got {:?}", other),
        }
    }

    #[test]
    fn test_error_serializes_with_tag() {
        let err = GraphMailError::StoreNotFound("abc".to_string());
        let json = serde_json::to_string(&err).unwrap();
        assert!(json.contains("\"type\":\"StoreNotFound\""));
        assert!(json.contains("\"message\":\"abc\""));
    }
}
