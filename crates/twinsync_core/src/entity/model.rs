//! Model records.

use serde::{Deserialize, Serialize};

use super::{fingerprint, EntityKind, EntityProps, Fingerprint};
use crate::error::CoreResult;
use crate::id::Id64;
use crate::value::PropertyMap;

/// A model: a container of elements.
///
/// A model shares its id with the element it models (its "modeled element"),
/// which lives in the parent model. The repository model is the only model
/// that models the root subject.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelProps {
    /// Model id, equal to the modeled element id.
    pub id: Id64,
    /// Fully-qualified class name.
    pub class_name: String,
    /// Whether the model is hidden from normal browsing.
    #[serde(default)]
    pub is_private: bool,
    /// Whether the model is a template.
    #[serde(default)]
    pub is_template: bool,
    /// Class-defined properties.
    #[serde(default)]
    pub properties: PropertyMap,
    /// Change sequence of the last write.
    #[serde(default)]
    pub last_mod: u64,
}

#[derive(Serialize)]
struct ModelShape<'a> {
    class_name: &'a str,
    is_private: bool,
    is_template: bool,
    properties: &'a PropertyMap,
}

impl ModelProps {
    /// Creates a model of the given class for a modeled element.
    pub fn new(class_name: impl Into<String>, modeled_element: Id64) -> Self {
        Self {
            id: modeled_element,
            class_name: class_name.into(),
            is_private: false,
            is_template: false,
            properties: PropertyMap::new(),
            last_mod: 0,
        }
    }

    /// Returns the modeled element id.
    pub fn modeled_element(&self) -> Id64 {
        self.id
    }
}

impl EntityProps for ModelProps {
    const KIND: EntityKind = EntityKind::Model;

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
        fingerprint(&ModelShape {
            class_name: &self.class_name,
            is_private: self.is_private,
            is_template: self.is_template,
            properties: &self.properties,
        })
    }
}
