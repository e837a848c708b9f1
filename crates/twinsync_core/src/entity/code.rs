//! Codes and code specifications.

use serde::{Deserialize, Serialize};

use crate::id::Id64;
use crate::value::PropertyMap;

/// The uniqueness triple of an element.
///
/// Within one repository, no two elements share a non-empty code. The scope
/// is itself an element id and therefore a predecessor of the coded element.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Code {
    /// Code specification id.
    pub spec: Id64,
    /// Scope element id.
    pub scope: Id64,
    /// Code value. Empty for elements without a code.
    pub value: String,
}

impl Code {
    /// Creates a code.
    pub fn new(spec: Id64, scope: Id64, value: impl Into<String>) -> Self {
        Self {
            spec,
            scope,
            value: value.into(),
        }
    }

    /// Creates the empty code.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Returns true if the code carries no value.
    ///
    /// Empty codes are exempt from uniqueness.
    pub fn is_empty(&self) -> bool {
        self.value.is_empty()
    }
}

/// A named code specification.
///
/// Code specs are matched between repositories by name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeSpec {
    /// Code spec id.
    pub id: Id64,
    /// Unique name.
    pub name: String,
    /// Additional properties.
    #[serde(default)]
    pub properties: PropertyMap,
}

impl CodeSpec {
    /// Creates a code spec with an unassigned id.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: Id64::INVALID,
            name: name.into(),
            properties: PropertyMap::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_code() {
        assert!(Code::empty().is_empty());
        assert!(!Code::new(Id64::new(1), Id64::new(1), "A").is_empty());
    }
}
