//! Dynamic property values.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::id::Id64;

/// An ordered property bag.
///
/// Keys are kept sorted so that two bags with the same contents always encode
/// to the same bytes.
pub type PropertyMap = BTreeMap<String, PropertyValue>;

/// A dynamic property value.
///
/// Floats are intentionally not supported so that entity fingerprints stay
/// deterministic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PropertyValue {
    /// Null value.
    Null,
    /// Boolean value.
    Bool(bool),
    /// Signed integer.
    Integer(i64),
    /// Text string.
    Text(String),
    /// Byte string.
    Bytes(Vec<u8>),
    /// Reference to another entity in the same repository.
    Id(Id64),
    /// Array of values.
    Array(Vec<PropertyValue>),
    /// Nested map of values.
    Map(PropertyMap),
}

impl PropertyValue {
    /// Returns the referenced id, if this is a reference value.
    pub fn as_id(&self) -> Option<Id64> {
        match self {
            PropertyValue::Id(id) => Some(*id),
            _ => None,
        }
    }

    /// Returns the text, if this is a text value.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            PropertyValue::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the integer, if this is an integer value.
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            PropertyValue::Integer(n) => Some(*n),
            _ => None,
        }
    }

    /// Returns the boolean, if this is a boolean value.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            PropertyValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Returns true for [`PropertyValue::Null`].
    pub fn is_null(&self) -> bool {
        matches!(self, PropertyValue::Null)
    }
}

impl From<bool> for PropertyValue {
    fn from(value: bool) -> Self {
        PropertyValue::Bool(value)
    }
}

impl From<i64> for PropertyValue {
    fn from(value: i64) -> Self {
        PropertyValue::Integer(value)
    }
}

impl From<&str> for PropertyValue {
    fn from(value: &str) -> Self {
        PropertyValue::Text(value.to_string())
    }
}

impl From<String> for PropertyValue {
    fn from(value: String) -> Self {
        PropertyValue::Text(value)
    }
}

impl From<Id64> for PropertyValue {
    fn from(value: Id64) -> Self {
        PropertyValue::Id(value)
    }
}

impl From<Vec<PropertyValue>> for PropertyValue {
    fn from(value: Vec<PropertyValue>) -> Self {
        PropertyValue::Array(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accessors() {
        assert_eq!(PropertyValue::from(Id64::new(5)).as_id(), Some(Id64::new(5)));
        assert_eq!(PropertyValue::from("x").as_text(), Some("x"));
        assert_eq!(PropertyValue::from(3i64).as_integer(), Some(3));
        assert_eq!(PropertyValue::from(true).as_bool(), Some(true));
        assert!(PropertyValue::Null.is_null());
        assert_eq!(PropertyValue::Null.as_id(), None);
    }

    #[test]
    fn property_map_is_ordered() {
        let mut map = PropertyMap::new();
        map.insert("b".into(), PropertyValue::Integer(2));
        map.insert("a".into(), PropertyValue::Integer(1));
        let keys: Vec<_> = map.keys().cloned().collect();
        assert_eq!(keys, vec!["a", "b"]);
    }
}
