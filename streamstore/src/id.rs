//! Opaque identifiers for streams and entities.
//!
//! An [`Id`] holds exactly one of a text, 64-bit integer or GUID identity.
//! Equality and hashing consider both the kind and the value, so the text
//! `"42"` and the integer `42` are different identities. Conversions back to
//! a concrete kind are explicit and fail with [`IdError::KindMismatch`]
//! instead of coercing.

use crate::errors::IdError;
use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use uuid::Uuid;

/// Identity of a stream, a parent entity or a dispatch sub-key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Id {
    /// A free-form text identity.
    Text(String),
    /// A 64-bit integer identity.
    Integer(i64),
    /// A 128-bit GUID identity.
    Guid(Uuid),
}

/// The runtime kind held by an [`Id`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IdKind {
    /// [`Id::Text`]
    Text,
    /// [`Id::Integer`]
    Integer,
    /// [`Id::Guid`]
    Guid,
}

impl fmt::Display for IdKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text => write!(f, "text"),
            Self::Integer => write!(f, "integer"),
            Self::Guid => write!(f, "guid"),
        }
    }
}

impl Id {
    /// Returns the kind of identity held.
    pub const fn kind(&self) -> IdKind {
        match self {
            Self::Text(_) => IdKind::Text,
            Self::Integer(_) => IdKind::Integer,
            Self::Guid(_) => IdKind::Guid,
        }
    }

    /// Returns the text identity, or a kind mismatch.
    pub fn as_text(&self) -> Result<&str, IdError> {
        match self {
            Self::Text(value) => Ok(value),
            other => Err(other.mismatch(IdKind::Text)),
        }
    }

    /// Returns the integer identity, or a kind mismatch.
    pub fn as_integer(&self) -> Result<i64, IdError> {
        match self {
            Self::Integer(value) => Ok(*value),
            other => Err(other.mismatch(IdKind::Integer)),
        }
    }

    /// Returns the GUID identity, or a kind mismatch.
    pub fn as_guid(&self) -> Result<Uuid, IdError> {
        match self {
            Self::Guid(value) => Ok(*value),
            other => Err(other.mismatch(IdKind::Guid)),
        }
    }

    const fn mismatch(&self, expected: IdKind) -> IdError {
        IdError::KindMismatch {
            expected,
            actual: self.kind(),
        }
    }
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(value) => f.write_str(value),
            Self::Integer(value) => write!(f, "{value}"),
            Self::Guid(value) => write!(f, "{value}"),
        }
    }
}

impl From<String> for Id {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<&str> for Id {
    fn from(value: &str) -> Self {
        Self::Text(value.to_owned())
    }
}

impl From<i64> for Id {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<Uuid> for Id {
    fn from(value: Uuid) -> Self {
        Self::Guid(value)
    }
}

impl TryFrom<&Id> for String {
    type Error = IdError;

    fn try_from(id: &Id) -> Result<Self, Self::Error> {
        id.as_text().map(ToOwned::to_owned)
    }
}

impl TryFrom<&Id> for i64 {
    type Error = IdError;

    fn try_from(id: &Id) -> Result<Self, Self::Error> {
        id.as_integer()
    }
}

impl TryFrom<&Id> for Uuid {
    type Error = IdError;

    fn try_from(id: &Id) -> Result<Self, Self::Error> {
        id.as_guid()
    }
}

impl Serialize for Id {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Text(value) => serializer.serialize_str(value),
            Self::Integer(value) => serializer.serialize_i64(*value),
            Self::Guid(value) => value.serialize(serializer),
        }
    }
}

struct IdVisitor;

impl Visitor<'_> for IdVisitor {
    type Value = Id;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a string, integer or GUID identity")
    }

    fn visit_i64<E: de::Error>(self, value: i64) -> Result<Id, E> {
        Ok(Id::Integer(value))
    }

    fn visit_u64<E: de::Error>(self, value: u64) -> Result<Id, E> {
        i64::try_from(value)
            .map(Id::Integer)
            .map_err(|_| E::custom(format!("integer identity {value} exceeds i64")))
    }

    // GUID-shaped strings come back as GUIDs; anything else stays text.
    fn visit_str<E: de::Error>(self, value: &str) -> Result<Id, E> {
        Ok(Uuid::parse_str(value).map_or_else(|_| Id::Text(value.to_owned()), Id::Guid))
    }
}

impl<'de> Deserialize<'de> for Id {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(IdVisitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::HashSet;

    proptest! {
        #[test]
        fn integer_ids_compare_by_value(value in any::<i64>()) {
            prop_assert_eq!(Id::from(value), Id::Integer(value));
            prop_assert_eq!(Id::from(value).as_integer().unwrap(), value);
        }

        #[test]
        fn text_ids_survive_json(value in "[a-z][a-z0-9_-]{0,40}") {
            let id = Id::from(value.as_str());
            let json = serde_json::to_string(&id).unwrap();
            let back: Id = serde_json::from_str(&json).unwrap();
            prop_assert_eq!(back, id);
        }

        #[test]
        fn integer_ids_survive_json(value in any::<i64>()) {
            let id = Id::from(value);
            let back: Id = serde_json::from_str(&serde_json::to_string(&id).unwrap()).unwrap();
            prop_assert_eq!(back, id);
        }
    }

    #[test]
    fn kinds_are_part_of_identity() {
        let text = Id::from("42");
        let integer = Id::from(42_i64);

        assert_ne!(text, integer);
        assert_eq!(text.to_string(), integer.to_string());

        let set: HashSet<Id> = [text, integer].into_iter().collect();
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn guid_ids_round_trip_through_json_as_guids() {
        let guid = Uuid::new_v4();
        let id = Id::from(guid);

        let json = serde_json::to_string(&id).unwrap();
        let back: Id = serde_json::from_str(&json).unwrap();

        assert_eq!(back, Id::Guid(guid));
    }

    #[test]
    fn mismatched_conversions_fail_instead_of_coercing() {
        let id = Id::from("account-7");

        let err = id.as_integer().unwrap_err();
        assert!(matches!(
            err,
            IdError::KindMismatch {
                expected: IdKind::Integer,
                actual: IdKind::Text
            }
        ));
        assert!(i64::try_from(&id).is_err());
        assert!(Uuid::try_from(&id).is_err());
        assert_eq!(String::try_from(&id).unwrap(), "account-7");
    }

    #[test]
    fn oversized_unsigned_integers_are_rejected() {
        let result: Result<Id, _> = serde_json::from_str("18446744073709551615");
        assert!(result.is_err());
    }
}
