//! Element records.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{fingerprint, Code, EntityKind, EntityProps, Fingerprint};
use crate::error::CoreResult;
use crate::id::Id64;
use crate::value::{PropertyMap, PropertyValue};

/// An element: the primary record of a repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElementProps {
    /// Element id. [`Id64::INVALID`] until inserted.
    pub id: Id64,
    /// Fully-qualified class name (`Schema:Class`).
    pub class_name: String,
    /// Containing model.
    pub model: Id64,
    /// Parent element, if any.
    #[serde(default)]
    pub parent: Option<Id64>,
    /// Uniqueness triple.
    #[serde(default)]
    pub code: Code,
    /// Globally unique identity shared across repositories.
    #[serde(default)]
    pub federation_guid: Option<Uuid>,
    /// Optional display label.
    #[serde(default)]
    pub user_label: Option<String>,
    /// Class-defined properties, including navigation properties.
    #[serde(default)]
    pub properties: PropertyMap,
    /// Change sequence of the last write.
    #[serde(default)]
    pub last_mod: u64,
}

#[derive(Serialize)]
struct ElementShape<'a> {
    class_name: &'a str,
    model: Id64,
    parent: Option<Id64>,
    code: &'a Code,
    federation_guid: Option<Uuid>,
    user_label: Option<&'a str>,
    properties: &'a PropertyMap,
}

impl ElementProps {
    /// Creates an element of the given class in the given model.
    pub fn new(class_name: impl Into<String>, model: Id64) -> Self {
        Self {
            id: Id64::INVALID,
            class_name: class_name.into(),
            model,
            parent: None,
            code: Code::empty(),
            federation_guid: None,
            user_label: None,
            properties: PropertyMap::new(),
            last_mod: 0,
        }
    }

    /// Sets the parent element.
    pub fn with_parent(mut self, parent: Id64) -> Self {
        self.parent = Some(parent);
        self
    }

    /// Sets the code.
    pub fn with_code(mut self, code: Code) -> Self {
        self.code = code;
        self
    }

    /// Sets the federation guid.
    pub fn with_federation_guid(mut self, guid: Uuid) -> Self {
        self.federation_guid = Some(guid);
        self
    }

    /// Sets the user label.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.user_label = Some(label.into());
        self
    }

    /// Sets a property.
    pub fn with_property(mut self, name: impl Into<String>, value: impl Into<PropertyValue>) -> Self {
        self.properties.insert(name.into(), value.into());
        self
    }

    /// Returns a property value by name.
    pub fn property(&self, name: &str) -> Option<&PropertyValue> {
        self.properties.get(name)
    }
}

impl EntityProps for ElementProps {
    const KIND: EntityKind = EntityKind::Element;

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
        fingerprint(&ElementShape {
            class_name: &self.class_name,
            model: self.model,
            parent: self.parent,
            code: &self.code,
            federation_guid: self.federation_guid,
            user_label: self.user_label.as_deref(),
            properties: &self.properties,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fingerprint_ignores_id_and_last_mod() {
        let mut a = ElementProps::new("Test:Widget", Id64::new(0x20)).with_property("size", 3i64);
        let mut b = a.clone();
        a.id = Id64::new(0x30);
        a.last_mod = 5;
        b.id = Id64::new(0x99);
        b.last_mod = 12;
        assert_eq!(a.fingerprint().unwrap(), b.fingerprint().unwrap());
    }

    #[test]
    fn fingerprint_sees_property_changes() {
        let a = ElementProps::new("Test:Widget", Id64::new(0x20)).with_property("size", 3i64);
        let b = a.clone().with_property("size", 4i64);
        assert_ne!(a.fingerprint().unwrap(), b.fingerprint().unwrap());
    }
}
