//! Error types for twinsync core.

use std::io;
use thiserror::Error;

use crate::entity::EntityKind;
use crate::id::Id64;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors raised by a repository.
#[derive(Debug, Error)]
pub enum CoreError {
    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// JSON snapshot could not be read or written.
    #[error("snapshot error: {0}")]
    Snapshot(#[from] serde_json::Error),

    /// Entity not found.
    #[error("{kind} not found: {id}")]
    NotFound {
        /// Kind of entity that was looked up.
        kind: EntityKind,
        /// The id that was not found.
        id: Id64,
    },

    /// An entity with the same id already exists.
    #[error("{kind} already exists: {id}")]
    AlreadyExists {
        /// Kind of entity.
        kind: EntityKind,
        /// The duplicate id.
        id: Id64,
    },

    /// A uniqueness constraint was violated.
    #[error("constraint violation: {message}")]
    ConstraintViolation {
        /// Description of the violated constraint.
        message: String,
    },

    /// A class name is not defined by any loaded schema.
    #[error("class not found: {name}")]
    ClassNotFound {
        /// Fully-qualified class name.
        name: String,
    },

    /// A schema could not be imported.
    #[error("schema import failed: {message}")]
    SchemaImport {
        /// Description of the failure.
        message: String,
    },

    /// An id string could not be parsed.
    #[error("invalid id: {text}")]
    InvalidId {
        /// The offending text.
        text: String,
    },

    /// Fingerprint encoding failed.
    #[error("encoding failed: {message}")]
    Encoding {
        /// Description of the failure.
        message: String,
    },

    /// Operation not permitted in current state.
    #[error("invalid operation: {message}")]
    InvalidOperation {
        /// Description of why operation is invalid.
        message: String,
    },
}

impl CoreError {
    /// Creates a not found error.
    pub fn not_found(kind: EntityKind, id: Id64) -> Self {
        Self::NotFound { kind, id }
    }

    /// Creates an already exists error.
    pub fn already_exists(kind: EntityKind, id: Id64) -> Self {
        Self::AlreadyExists { kind, id }
    }

    /// Creates a constraint violation error.
    pub fn constraint(message: impl Into<String>) -> Self {
        Self::ConstraintViolation {
            message: message.into(),
        }
    }

    /// Creates a class not found error.
    pub fn class_not_found(name: impl Into<String>) -> Self {
        Self::ClassNotFound { name: name.into() }
    }

    /// Creates a schema import error.
    pub fn schema_import(message: impl Into<String>) -> Self {
        Self::SchemaImport {
            message: message.into(),
        }
    }

    /// Creates an invalid id error.
    pub fn invalid_id(text: impl Into<String>) -> Self {
        Self::InvalidId { text: text.into() }
    }

    /// Creates an encoding error.
    pub fn encoding(message: impl Into<String>) -> Self {
        Self::Encoding {
            message: message.into(),
        }
    }

    /// Creates an invalid operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }

    /// Returns true if this error reports a missing entity.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = CoreError::not_found(EntityKind::Element, Id64::new(0x21));
        assert_eq!(err.to_string(), "element not found: 0x21");
        assert!(err.is_not_found());

        let err = CoreError::class_not_found("Test:Widget");
        assert_eq!(err.to_string(), "class not found: Test:Widget");
        assert!(!err.is_not_found());
    }
}
