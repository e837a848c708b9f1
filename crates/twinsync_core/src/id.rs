//! Entity and repository identifiers.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::CoreError;

/// Identifier of an entity, scoped to the repository that owns it.
///
/// Ids are 64-bit values that are:
/// - Unique within one repository
/// - Immutable once assigned
/// - Meaningless outside their repository (two repositories have independent id spaces)
///
/// The value `0` is reserved as the invalid id. It doubles as the
/// "unresolved" marker for reference fields that could not be remapped.
#[derive(Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Id64(u64);

impl Id64 {
    /// The invalid id.
    pub const INVALID: Id64 = Id64(0);

    /// The repository model, the root of the model hierarchy.
    pub const REPOSITORY_MODEL: Id64 = Id64(0x1);

    /// The root subject element. It shares its id with the repository model.
    pub const ROOT_SUBJECT: Id64 = Id64(0x1);

    /// The dictionary model and its partition element.
    pub const DICTIONARY_MODEL: Id64 = Id64(0x10);

    /// First id handed out for user entities.
    pub const FIRST_USER_ID: u64 = 0x20;

    /// Creates an id from its raw value.
    #[inline]
    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// Returns the raw value.
    #[inline]
    #[must_use]
    pub const fn value(&self) -> u64 {
        self.0
    }

    /// Returns true unless this is [`Id64::INVALID`].
    #[inline]
    #[must_use]
    pub const fn is_valid(&self) -> bool {
        self.0 != 0
    }

    /// Returns `Some(self)` for a valid id and `None` for the invalid id.
    #[must_use]
    pub const fn valid(self) -> Option<Self> {
        if self.is_valid() {
            Some(self)
        } else {
            None
        }
    }
}

impl fmt::Debug for Id64 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Id64({:#x})", self.0)
    }
}

impl fmt::Display for Id64 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

impl FromStr for Id64 {
    type Err = CoreError;

    /// Parses `0x`-prefixed hex or plain decimal.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let parsed = match trimmed
            .strip_prefix("0x")
            .or_else(|| trimmed.strip_prefix("0X"))
        {
            Some(hex) => u64::from_str_radix(hex, 16),
            None => trimmed.parse::<u64>(),
        };
        parsed
            .map(Id64)
            .map_err(|_| CoreError::invalid_id(s))
    }
}

impl From<u64> for Id64 {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl From<Id64> for u64 {
    fn from(id: Id64) -> Self {
        id.0
    }
}

/// Identifier of a repository.
///
/// Provenance records name the repository they were produced from so that a
/// target can tell two independent sources apart.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RepositoryId(Uuid);

impl RepositoryId {
    /// Creates a new random repository id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Creates a repository id from a UUID.
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Converts to a UUID.
    #[must_use]
    pub const fn to_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for RepositoryId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for RepositoryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RepositoryId({})", self.0)
    }
}

impl fmt::Display for RepositoryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for RepositoryId {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s.trim())
            .map(Self)
            .map_err(|_| CoreError::invalid_id(s))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_id() {
        assert!(!Id64::INVALID.is_valid());
        assert!(Id64::new(1).is_valid());
        assert_eq!(Id64::INVALID.valid(), None);
        assert_eq!(Id64::new(7).valid(), Some(Id64::new(7)));
    }

    #[test]
    fn display_is_hex() {
        assert_eq!(Id64::new(0x2a).to_string(), "0x2a");
        assert_eq!(format!("{:?}", Id64::new(16)), "Id64(0x10)");
    }

    #[test]
    fn parse_hex_and_decimal() {
        assert_eq!("0x2a".parse::<Id64>().unwrap(), Id64::new(42));
        assert_eq!("42".parse::<Id64>().unwrap(), Id64::new(42));
        assert!("0xzz".parse::<Id64>().is_err());
        assert!("".parse::<Id64>().is_err());
    }

    #[test]
    fn root_shares_repository_model_id() {
        assert_eq!(Id64::ROOT_SUBJECT, Id64::REPOSITORY_MODEL);
    }

    #[test]
    fn repository_ids_are_unique() {
        assert_ne!(RepositoryId::new(), RepositoryId::new());
    }

    #[test]
    fn repository_id_parse() {
        let id = RepositoryId::new();
        let parsed: RepositoryId = id.to_string().parse().unwrap();
        assert_eq!(parsed, id);
        assert!("not-a-uuid".parse::<RepositoryId>().is_err());
    }

    proptest::proptest! {
        #[test]
        fn displayed_ids_parse_back(raw in proptest::prelude::any::<u64>()) {
            let id = Id64::new(raw);
            proptest::prop_assert_eq!(id.to_string().parse::<Id64>().unwrap(), id);
            proptest::prop_assert_eq!(raw.to_string().parse::<Id64>().unwrap(), id);
        }
    }
}
