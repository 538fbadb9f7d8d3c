//! Single-use nonces (§3 "Nonce").

use crate::util::b64::Base64Bytes;
use rand::RngCore;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Byte length of a nonce, per §3.
pub const NONCE_LEN: usize = 24;

/// A 24-byte single-use nonce.
///
/// Issued by the Verifier ([`crate::envelope::NonceResponse`]) and by the DAP
/// when it needs to attest a caller ([`crate::envelope::EvidenceResponse::requested_nonce`]).
/// Travels on the wire as base64 ASCII.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Nonce([u8; NONCE_LEN]);

impl Nonce {
    /// Draws a fresh nonce from the process-wide cryptographic RNG.
    pub fn generate() -> Self {
        let mut bytes = [0u8; NONCE_LEN];
        rand::rng().fill_bytes(&mut bytes);
        Nonce(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; NONCE_LEN] {
        &self.0
    }
}

impl AsRef<[u8]> for Nonce {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl From<Nonce> for Base64Bytes<'static> {
    fn from(nonce: Nonce) -> Self {
        Base64Bytes::encode(nonce.0)
    }
}

impl TryFrom<&Base64Bytes<'_>> for Nonce {
    type Error = NonceDecodeError;

    fn try_from(value: &Base64Bytes<'_>) -> Result<Self, Self::Error> {
        let bytes = value.decode().map_err(|_| NonceDecodeError::NotBase64)?;
        let bytes: [u8; NONCE_LEN] = bytes
            .try_into()
            .map_err(|_| NonceDecodeError::WrongLength)?;
        Ok(Nonce(bytes))
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum NonceDecodeError {
    #[error("nonce is not valid base64")]
    NotBase64,
    #[error("nonce must decode to exactly {NONCE_LEN} bytes")]
    WrongLength,
}

impl Serialize for Nonce {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        Base64Bytes::encode(self.0).serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Nonce {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let b64 = Base64Bytes::<'static>::deserialize(deserializer)?;
        Nonce::try_from(&b64).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_base64() {
        let nonce = Nonce::generate();
        let encoded: Base64Bytes<'static> = nonce.into();
        let decoded = Nonce::try_from(&encoded).unwrap();
        assert_eq!(nonce, decoded);
    }

    #[test]
    fn two_draws_differ() {
        // Astronomically unlikely to collide; guards against a constant RNG seed regression.
        assert_ne!(Nonce::generate(), Nonce::generate());
    }

    #[test]
    fn rejects_wrong_length() {
        let short = Base64Bytes::encode(b"too-short");
        assert_eq!(Nonce::try_from(&short), Err(NonceDecodeError::WrongLength));
    }
}
