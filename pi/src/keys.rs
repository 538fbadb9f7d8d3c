//! Signing-key loading (§5: "Signing keys and their associated randomness
//! are process-scoped and never logged").

use ed25519_dalek::VerifyingKey;
use gateway_types::crypto::SigningKeyPair;
use std::path::Path;

#[derive(Debug, thiserror::Error)]
pub enum KeyError {
    #[error("failed to read key file at {0}: {1}")]
    Read(std::path::PathBuf, std::io::Error),
    #[error("key material must be exactly 32 bytes of hex, got {0} bytes")]
    WrongLength(usize),
    #[error("key material is not valid hex: {0}")]
    InvalidHex(#[from] hex::FromHexError),
}

/// Loads a hex-encoded 32-byte Ed25519 signing key from `path`.
pub fn load_signing_key(path: &Path) -> Result<SigningKeyPair, KeyError> {
    let raw = std::fs::read_to_string(path).map_err(|e| KeyError::Read(path.to_path_buf(), e))?;
    let bytes = hex::decode(raw.trim())?;
    let bytes: [u8; 32] = bytes
        .try_into()
        .map_err(|v: Vec<u8>| KeyError::WrongLength(v.len()))?;
    Ok(SigningKeyPair::from_bytes(&bytes))
}

/// Parses a hex-encoded 32-byte Ed25519 public key.
pub fn parse_verifying_key(hex_str: &str) -> Result<VerifyingKey, KeyError> {
    let bytes = hex::decode(hex_str.trim())?;
    let bytes: [u8; 32] = bytes
        .try_into()
        .map_err(|v: Vec<u8>| KeyError::WrongLength(v.len()))?;
    VerifyingKey::from_bytes(&bytes).map_err(|_| KeyError::WrongLength(bytes.len()))
}
