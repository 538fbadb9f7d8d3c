//! Base64 encoding and decoding utilities.
//!
//! This module provides [`Base64Bytes`], a wrapper type for working with
//! base64-encoded data on the wire: nonces, signatures, evidence claims and
//! attestation payloads are all binary fields that travel as base64 ASCII
//! inside the JSON envelope (§6).

use base64::Engine;
use base64::engine::general_purpose::STANDARD as B64;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::borrow::Cow;
use std::fmt::Display;

/// A wrapper for base64-encoded byte data.
///
/// Holds bytes that represent base64-encoded data and provides methods for
/// encoding and decoding. Uses copy-on-write semantics to avoid unnecessary
/// allocations when the encoded form is only ever read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Base64Bytes<'a>(pub Cow<'a, [u8]>);

impl Base64Bytes<'_> {
    /// Decodes the base64 string bytes to raw binary data.
    pub fn decode(&self) -> Result<Vec<u8>, base64::DecodeError> {
        B64.decode(&self.0)
    }

    /// Encodes raw binary data into base64 string bytes.
    pub fn encode<T: AsRef<[u8]>>(input: T) -> Base64Bytes<'static> {
        let encoded = B64.encode(input.as_ref());
        Base64Bytes(Cow::Owned(encoded.into_bytes()))
    }

    pub fn as_str(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(self.0.as_ref())
    }

    /// Detaches from any borrowed lifetime, cloning the bytes if needed.
    pub fn to_owned_static(&self) -> Base64Bytes<'static> {
        Base64Bytes(Cow::Owned(self.0.clone().into_owned()))
    }
}

impl AsRef<[u8]> for Base64Bytes<'_> {
    fn as_ref(&self) -> &[u8] {
        self.0.as_ref()
    }
}

impl<'a> From<&'a [u8]> for Base64Bytes<'a> {
    fn from(slice: &'a [u8]) -> Self {
        Base64Bytes(Cow::Borrowed(slice))
    }
}

impl Display for Base64Bytes<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl Serialize for Base64Bytes<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.as_str())
    }
}

impl<'de> Deserialize<'de> for Base64Bytes<'static> {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Ok(Base64Bytes(Cow::Owned(s.into_bytes())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips() {
        let encoded = Base64Bytes::encode(b"hello gateway");
        assert_eq!(encoded.to_string(), "aGVsbG8gZ2F0ZXdheQ==");
        let decoded = encoded.decode().unwrap();
        assert_eq!(decoded, b"hello gateway");
    }

    #[test]
    fn rejects_invalid_base64() {
        let bad = Base64Bytes(Cow::Borrowed(b"not base64!!".as_slice()));
        assert!(bad.decode().is_err());
    }
}
