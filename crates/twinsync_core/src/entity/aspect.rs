//! Aspect records.

use serde::{Deserialize, Serialize};

use super::{fingerprint, EntityKind, EntityProps, Fingerprint};
use crate::error::CoreResult;
use crate::id::Id64;
use crate::value::{PropertyMap, PropertyValue};

/// Multiplicity of an aspect class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AspectKind {
    /// At most one aspect of the class per element.
    Unique,
    /// Any number of aspects of the class per element.
    Multi,
}

/// An aspect: a record owned by exactly one element.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AspectProps {
    /// Aspect id.
    pub id: Id64,
    /// Fully-qualified class name.
    pub class_name: String,
    /// Owning element.
    pub element: Id64,
    /// Multiplicity.
    pub kind: AspectKind,
    /// Class-defined properties.
    #[serde(default)]
    pub properties: PropertyMap,
    /// Change sequence of the last write.
    #[serde(default)]
    pub last_mod: u64,
}

#[derive(Serialize)]
struct AspectShape<'a> {
    class_name: &'a str,
    element: Id64,
    kind: AspectKind,
    properties: &'a PropertyMap,
}

impl AspectProps {
    /// Creates an aspect owned by `element`.
    pub fn new(class_name: impl Into<String>, element: Id64, kind: AspectKind) -> Self {
        Self {
            id: Id64::INVALID,
            class_name: class_name.into(),
            element,
            kind,
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

impl EntityProps for AspectProps {
    const KIND: EntityKind = EntityKind::Aspect;

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
        fingerprint(&AspectShape {
            class_name: &self.class_name,
            element: self.element,
            kind: self.kind,
            properties: &self.properties,
        })
    }
}
