use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::{fmt, str::FromStr};
use thiserror::Error;
use uuid::Uuid;

macro_rules! numeric_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub u64);

        impl $name {
            /// Raw numeric value.
            #[must_use]
            pub const fn get(self) -> u64 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }

        impl FromStr for $name {
            type Err = std::num::ParseIntError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Ok(Self(s.trim().parse()?))
            }
        }

        impl From<u64> for $name {
            fn from(value: u64) -> Self {
                Self(value)
            }
        }
    };
}

numeric_id!(
    /// Primary key of a project row.
    ProjectId
);
numeric_id!(
    /// Primary key of a role.
    RoleId
);
numeric_id!(
    /// Primary key of a user account.
    UserId
);
numeric_id!(
    /// Primary key of a group.
    GroupId
);
numeric_id!(
    /// Primary key of a milestone.
    MilestoneId
);

/// Identifier of an emitted project event (UUID v7).
#[derive(Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Default)]
pub struct EventId(pub Uuid);

impl EventId {
    #[must_use]
    /// Generate a fresh event identifier.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for EventId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

impl Serialize for EventId {
    fn serialize<S>(&self, s: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        s.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for EventId {
    fn deserialize<D>(d: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(d)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Length of a hex-encoded SHA-1 object id.
const OBJECT_ID_HEX_LEN: usize = 40;

/// Git object id in lowercase hex form.
///
/// Kept independent of any git library so events can travel through crates
/// that never open a repository.
#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct ObjectId(String);

/// Error returned when parsing a malformed [`ObjectId`].
#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid object id '{0}'")]
pub struct InvalidObjectId(pub String);

impl ObjectId {
    /// The all-zero id used for "ref absent".
    #[must_use]
    pub fn zero() -> Self {
        Self("0".repeat(OBJECT_ID_HEX_LEN))
    }

    /// Whether this is the all-zero id.
    #[must_use]
    pub fn is_zero(&self) -> bool {
        self.0.bytes().all(|b| b == b'0')
    }

    /// Hex representation.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for ObjectId {
    type Err = InvalidObjectId;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() == OBJECT_ID_HEX_LEN && s.bytes().all(|b| b.is_ascii_hexdigit()) {
            Ok(Self(s.to_ascii_lowercase()))
        } else {
            Err(InvalidObjectId(s.to_owned()))
        }
    }
}

impl Serialize for ObjectId {
    fn serialize<S>(&self, s: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        s.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for ObjectId {
    fn deserialize<D>(d: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(d)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::expect_used)]

    use super::*;

    #[test]
    fn event_id_uses_uuid_v7() {
        let id = EventId::new();
        assert_eq!(id.0.get_version_num(), 7);
    }

    #[test]
    fn project_id_parses_trimmed_numbers() {
        let parsed: ProjectId = " 42 ".parse().expect("must parse project id");
        assert_eq!(parsed, ProjectId(42));
        assert!("forty-two".parse::<ProjectId>().is_err());
    }

    #[test]
    fn object_id_zero_roundtrips() {
        let zero = ObjectId::zero();
        assert!(zero.is_zero());
        let parsed: ObjectId = zero.as_str().parse().expect("zero id is valid hex");
        assert_eq!(parsed, zero);
    }

    #[test]
    fn object_id_rejects_short_or_non_hex_input() {
        assert!("abc".parse::<ObjectId>().is_err());
        assert!("z".repeat(40).parse::<ObjectId>().is_err());
        let upper = "ABCDEF0123456789ABCDEF0123456789ABCDEF01";
        let parsed: ObjectId = upper.parse().expect("uppercase hex is accepted");
        assert_eq!(parsed.as_str(), upper.to_ascii_lowercase());
        assert!(!parsed.is_zero());
    }
}
