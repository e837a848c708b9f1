//! Error types for the transformer.

use thiserror::Error;
use twinsync_core::{CoreError, EntityKind, Id64, RepositoryId};

/// Result type for transformation operations.
pub type TransformResult<T> = Result<T, TransformError>;

/// Errors that reject a transformation call.
#[derive(Error, Debug)]
pub enum TransformError {
    /// A predecessor is absent from the source and the dangling policy is
    /// [`DanglingBehavior::Reject`](crate::DanglingBehavior::Reject).
    #[error("unresolved reference: {entity} refers to {missing}, which does not exist in the source")]
    UnresolvedReference {
        /// Source id of the referencing entity.
        entity: Id64,
        /// Source id of the missing predecessor.
        missing: Id64,
    },

    /// Deferred entities wait on each other and none can be written first.
    #[error("predecessor cycle among {entities:?}")]
    PredecessorCycle {
        /// Source ids of the stuck entities.
        entities: Vec<Id64>,
    },

    /// The scope already carries provenance from a different source.
    #[error("provenance scope {scope} belongs to repository {existing}, refusing {incoming}")]
    ProvenanceScopeConflict {
        /// The scope element.
        scope: Id64,
        /// Repository already registered under the scope.
        existing: RepositoryId,
        /// Repository this session synchronizes from.
        incoming: RepositoryId,
    },

    /// The target rejected the exported schemas.
    #[error("schema import failed: {0}")]
    SchemaImportFailure(String),

    /// The target rejected an insert, update or delete.
    #[error("failed to write {kind} {id}: {source}")]
    EntityWriteFailure {
        /// Kind of entity being written.
        kind: EntityKind,
        /// Id of the entity (source id for inserts, target id otherwise).
        id: Id64,
        /// The repository error.
        #[source]
        source: CoreError,
    },

    /// A repository read failed.
    #[error("repository error: {0}")]
    Repository(#[from] CoreError),

    /// A code spec could not be resolved by name or id.
    #[error("code spec not found: {0}")]
    CodeSpecNotFound(String),

    /// The call is not allowed in the current state.
    #[error("invalid state transition from {from:?} to {to:?}")]
    InvalidState {
        /// Current state.
        from: String,
        /// Attempted state.
        to: String,
    },

    /// The transformer was disposed.
    #[error("transformer has been disposed")]
    Disposed,
}

impl TransformError {
    /// Wraps a repository error raised while writing an entity.
    pub fn write_failure(kind: EntityKind, id: Id64, source: CoreError) -> Self {
        Self::EntityWriteFailure { kind, id, source }
    }

    /// Returns true for errors that came from the target rejecting a write.
    pub fn is_write_failure(&self) -> bool {
        matches!(self, TransformError::EntityWriteFailure { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unresolved_reference_names_missing_id() {
        let err = TransformError::UnresolvedReference {
            entity: Id64::new(0x21),
            missing: Id64::new(0x22),
        };
        let message = err.to_string();
        assert!(message.contains("0x21"));
        assert!(message.contains("0x22"));
    }

    #[test]
    fn write_failure_keeps_source() {
        let err = TransformError::write_failure(
            EntityKind::Element,
            Id64::new(0x30),
            CoreError::constraint("duplicate code"),
        );
        assert!(err.is_write_failure());
        assert_eq!(
            err.to_string(),
            "failed to write element 0x30: constraint violation: duplicate code"
        );
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn repository_errors_surface_verbatim() {
        let err: TransformError = CoreError::not_found(EntityKind::Model, Id64::new(0x40)).into();
        assert_eq!(err.to_string(), "repository error: model not found: 0x40");
        assert!(!err.is_write_failure());
    }
}
