//! 12-byte object identifiers.
//!
//! The document store's records (patients, users, authorizations) are keyed
//! by a 12-byte identifier, following the same shape as the original
//! prototype's `bson.ObjectId`. On the wire an identifier is a 24-character
//! lowercase hex string; [`ObjectId::try_from`] is the only coercion path the
//! `patient_id` / `user_id` / `access_control_id` / `target_user_id`
//! validators (§3) are allowed to use.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// A 12-byte object identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObjectId([u8; 12]);

/// Errors that can occur when coercing a value into an [`ObjectId`].
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ObjectIdError {
    #[error("object id must be exactly 24 hex characters, got {0}")]
    WrongLength(usize),
    #[error("object id contains non-hex characters")]
    InvalidHex,
}

impl ObjectId {
    pub const fn from_bytes(bytes: [u8; 12]) -> Self {
        ObjectId(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 12] {
        &self.0
    }

    /// Builds an `ObjectId` by repeating a single hex nibble pair, matching
    /// the `P = 111...111` / `D = 000...000` shorthand used in the test
    /// scenarios (§8).
    pub const fn repeated(byte: u8) -> Self {
        ObjectId([byte; 12])
    }
}

impl FromStr for ObjectId {
    type Err = ObjectIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != 24 {
            return Err(ObjectIdError::WrongLength(s.len()));
        }
        let mut bytes = [0u8; 12];
        hex::decode_to_slice(s, &mut bytes).map_err(|_| ObjectIdError::InvalidHex)?;
        Ok(ObjectId(bytes))
    }
}

impl TryFrom<&str> for ObjectId {
    type Error = ObjectIdError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        ObjectId::from_str(value)
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl Serialize for ObjectId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for ObjectId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        ObjectId::from_str(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_hex() {
        let oid = ObjectId::repeated(0x11);
        let s = oid.to_string();
        assert_eq!(s, "111111111111111111111111");
        assert_eq!(ObjectId::from_str(&s).unwrap(), oid);
    }

    #[test]
    fn rejects_wrong_length() {
        assert_eq!(ObjectId::from_str("abcd"), Err(ObjectIdError::WrongLength(4)));
    }

    #[test]
    fn rejects_non_hex() {
        assert_eq!(
            ObjectId::from_str("zzzzzzzzzzzzzzzzzzzzzzzz"),
            Err(ObjectIdError::InvalidHex)
        );
    }
}
