//! Relationship records.

use serde::{Deserialize, Serialize};

use super::{fingerprint, EntityKind, EntityProps, Fingerprint};
use crate::error::CoreResult;
use crate::id::Id64;
use crate::value::{PropertyMap, PropertyValue};

/// A link-table relationship between two elements.
///
/// Within one repository a relationship is unique per
/// (class, source element, target element).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationshipProps {
    /// Relationship id.
    pub id: Id64,
    /// Fully-qualified class name.
    pub class_name: String,
    /// Source endpoint element.
    pub source_id: Id64,
    /// Target endpoint element.
    pub target_id: Id64,
    /// Class-defined properties.
    #[serde(default)]
    pub properties: PropertyMap,
    /// Change sequence of the last write.
    #[serde(default)]
    pub last_mod: u64,
}

#[derive(Serialize)]
struct RelationshipShape<'a> {
    class_name: &'a str,
    source_id: Id64,
    target_id: Id64,
    properties: &'a PropertyMap,
}

impl RelationshipProps {
    /// Creates a relationship between two elements.
    pub fn new(class_name: impl Into<String>, source_id: Id64, target_id: Id64) -> Self {
        Self {
            id: Id64::INVALID,
            class_name: class_name.into(),
            source_id,
            target_id,
            properties: PropertyMap::new(),
            last_mod: 0,
        }
    }

    /// Sets a property.
    pub fn with_property(mut self, name: impl Into<String>, value: impl Into<PropertyValue>) -> Self {
        self.properties.insert(name.into(), value.into());
        self
    }
}

impl EntityProps for RelationshipProps {
    const KIND: EntityKind = EntityKind::Relationship;

    fn id(&self) -> Id64 {
        self.id
    }

    fn class_name(&self) -> &str {
        &self.class_name
    }

    fn last_mod(&self) -> u64 {
        self.last_mod
    }

    fn fingerprint(&self) -> CoreResult<Fingerprint> {
        fingerprint(&RelationshipShape {
            class_name: &self.class_name,
            source_id: self.source_id,
            target_id: self.target_id,
            properties: &self.properties,
        })
    }
}
