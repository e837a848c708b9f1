//! Entity records.
//!
//! Every record kind carries a stable id, a fully-qualified class name and a
//! modification marker. References to other entities are plain [`Id64`]
//! values; which of them are predecessors is decided by schema metadata.

mod aspect;
mod code;
mod element;
mod fingerprint;
mod model;
mod provenance;
mod relationship;

pub use aspect::{AspectKind, AspectProps};
pub use code::{Code, CodeSpec};
pub use element::ElementProps;
pub use fingerprint::{fingerprint, Fingerprint};
pub use model::ModelProps;
pub use provenance::{ProvenanceKind, ProvenanceRecord};
pub use relationship::RelationshipProps;

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::CoreResult;
use crate::id::Id64;

/// Kind of an entity record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum EntityKind {
    /// Schema definition.
    Schema,
    /// Code specification.
    CodeSpec,
    /// Model (container of elements).
    Model,
    /// Element.
    Element,
    /// Aspect owned by an element.
    Aspect,
    /// Relationship between two elements.
    Relationship,
    /// Provenance record.
    Provenance,
}

impl EntityKind {
    /// Returns the lowercase display name.
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Schema => "schema",
            EntityKind::CodeSpec => "code spec",
            EntityKind::Model => "model",
            EntityKind::Element => "element",
            EntityKind::Aspect => "aspect",
            EntityKind::Relationship => "relationship",
            EntityKind::Provenance => "provenance",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Common accessors over entity records.
pub trait EntityProps {
    /// The kind of record.
    const KIND: EntityKind;

    /// The record id.
    fn id(&self) -> Id64;

    /// Fully-qualified class name.
    fn class_name(&self) -> &str;

    /// Change sequence at which the record was last written.
    fn last_mod(&self) -> u64;

    /// Fingerprint of the record's content, excluding id and modification marker.
    fn fingerprint(&self) -> CoreResult<Fingerprint>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_display() {
        assert_eq!(EntityKind::CodeSpec.to_string(), "code spec");
        assert_eq!(EntityKind::Relationship.to_string(), "relationship");
    }
}
