//! Provenance records.

use serde::{Deserialize, Serialize};

use crate::id::{Id64, RepositoryId};

/// What a provenance record describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProvenanceKind {
    /// Registers which source repository owns a scope element.
    Scope,
    /// Links a target element to its source element.
    Element,
    /// Links a target relationship to its source relationship.
    Relationship,
}

/// Bookkeeping attached to a target entity recording which source entity
/// produced it.
///
/// Invariant: under one scope element, all records name the same
/// `source_repository`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvenanceRecord {
    /// Record id. Assigned by the repository.
    pub id: Id64,
    /// Scope element anchoring this record.
    pub scope: Id64,
    /// What the record describes.
    pub kind: ProvenanceKind,
    /// The local entity the record is attached to (element or relationship id).
    pub entity: Id64,
    /// Identifier of the originating entity in the source repository.
    ///
    /// For [`ProvenanceKind::Scope`] records this is the source repository id.
    pub identifier: String,
    /// The repository the identifier belongs to.
    pub source_repository: RepositoryId,
    /// Modification marker of the source entity when it was last synchronized.
    #[serde(default)]
    pub version: Option<u64>,
}

impl ProvenanceRecord {
    /// Creates an element provenance record.
    pub fn element(
        scope: Id64,
        entity: Id64,
        source_id: Id64,
        source_repository: RepositoryId,
        version: u64,
    ) -> Self {
        Self {
            id: Id64::INVALID,
            scope,
            kind: ProvenanceKind::Element,
            entity,
            identifier: source_id.to_string(),
            source_repository,
            version: Some(version),
        }
    }

    /// Creates a relationship provenance record.
    pub fn relationship(
        scope: Id64,
        entity: Id64,
        source_id: Id64,
        source_repository: RepositoryId,
        version: u64,
    ) -> Self {
        Self {
            kind: ProvenanceKind::Relationship,
            ..Self::element(scope, entity, source_id, source_repository, version)
        }
    }

    /// Creates the scope registration record.
    pub fn scope(scope: Id64, source_repository: RepositoryId) -> Self {
        Self {
            id: Id64::INVALID,
            scope,
            kind: ProvenanceKind::Scope,
            entity: scope,
            identifier: source_repository.to_string(),
            source_repository,
            version: None,
        }
    }

    /// Parses the identifier as a source entity id.
    ///
    /// Returns `None` for scope records or malformed identifiers.
    pub fn source_id(&self) -> Option<Id64> {
        match self.kind {
            ProvenanceKind::Scope => None,
            _ => self.identifier.parse().ok(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn element_record_identifier() {
        let repo = RepositoryId::new();
        let record = ProvenanceRecord::element(Id64::ROOT_SUBJECT, Id64::new(0x40), Id64::new(0x21), repo, 3);
        assert_eq!(record.kind, ProvenanceKind::Element);
        assert_eq!(record.source_id(), Some(Id64::new(0x21)));
        assert_eq!(record.version, Some(3));
    }

    #[test]
    fn scope_record_has_no_source_id() {
        let repo = RepositoryId::new();
        let record = ProvenanceRecord::scope(Id64::ROOT_SUBJECT, repo);
        assert_eq!(record.source_id(), None);
        assert_eq!(record.identifier, repo.to_string());
    }
}
