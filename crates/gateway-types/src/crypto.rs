//! Ed25519 signing and SHA-256 evidence hashing (§9 "Signature primitives").
//!
//! Every signed artifact in this protocol — an evidence claim, an
//! attestation token, a signed query result — is the same shape: some
//! canonically-encoded payload plus a detached Ed25519 signature over it.
//! [`Signed<T>`] is that shape, generic over the payload type, so the
//! Verifier's attestation token and the DAP/PI's signed results share one
//! sign/verify/opaque-encode path instead of three near-identical ones.

use crate::canonical::canonical_json;
use crate::nonce::Nonce;
use crate::util::b64::Base64Bytes;
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Errors that can occur while signing or verifying protocol artifacts.
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    #[error("signature is not valid base64")]
    NotBase64,
    #[error("signature is not a valid Ed25519 signature")]
    MalformedSignature,
    #[error("signature does not verify under the expected public key")]
    VerificationFailed,
    #[error("opaque envelope is not valid JSON")]
    MalformedEnvelope(#[from] serde_json::Error),
}

/// A process-scoped Ed25519 signing key.
///
/// Held for the lifetime of the process and never logged (§5 "Resource
/// discipline"). Each of the Verifier, DAP and PI binaries owns exactly one.
pub struct SigningKeyPair(SigningKey);

impl SigningKeyPair {
    pub fn generate() -> Self {
        SigningKeyPair(SigningKey::generate(&mut rand::rngs::OsRng))
    }

    pub fn from_bytes(bytes: &[u8; 32]) -> Self {
        SigningKeyPair(SigningKey::from_bytes(bytes))
    }

    pub fn verifying_key(&self) -> VerifyingKey {
        self.0.verifying_key()
    }

    fn sign_raw(&self, bytes: &[u8]) -> Signature {
        self.0.sign(bytes)
    }
}

/// SHA-256 of `artifact ∥ nonce` (§3 "Evidence claim").
pub fn evidence_digest(artifact: &[u8], nonce: &Nonce) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(artifact);
    hasher.update(nonce.as_ref());
    hasher.finalize().into()
}

/// Signs `sha256(artifact ∥ nonce)`, producing one half of an evidence bundle.
pub fn sign_evidence(key: &SigningKeyPair, artifact: &[u8], nonce: &Nonce) -> Base64Bytes<'static> {
    let digest = evidence_digest(artifact, nonce);
    let signature = key.sign_raw(&digest);
    Base64Bytes::encode(signature.to_bytes())
}

/// Verifies an evidence claim against the recomputed digest and the claimed
/// signer's public key (§4.1 step 2-3).
pub fn verify_evidence(
    claim: &Base64Bytes<'_>,
    artifact: &[u8],
    nonce: &Nonce,
    signer: &VerifyingKey,
) -> Result<(), CryptoError> {
    let digest = evidence_digest(artifact, nonce);
    let sig_bytes = claim.decode().map_err(|_| CryptoError::NotBase64)?;
    let sig_bytes: [u8; 64] = sig_bytes
        .try_into()
        .map_err(|_| CryptoError::MalformedSignature)?;
    let signature = Signature::from_bytes(&sig_bytes);
    signer
        .verify(&digest, &signature)
        .map_err(|_| CryptoError::VerificationFailed)
}

/// A payload bundled with a detached Ed25519 signature over its canonical
/// encoding.
///
/// The wire-level field this produces (`attestation`, `response`, ...) is
/// always the base64 encoding of this whole envelope (payload + signature):
/// callers treat it as opaque until they decode and verify it (§3
/// "Clients treat the token as opaque bytes until verified").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signed<T> {
    pub payload: T,
    pub signature: Base64Bytes<'static>,
}

impl<T: Serialize> Signed<T> {
    pub fn sign(key: &SigningKeyPair, payload: T) -> Self {
        let bytes = canonical_json(&payload).into_bytes();
        let signature = Base64Bytes::encode(key.sign_raw(&bytes).to_bytes());
        Signed { payload, signature }
    }

    /// Base64-encodes the whole signed envelope for transmission as a single
    /// opaque wire field.
    pub fn to_opaque(&self) -> Result<Base64Bytes<'static>, CryptoError>
    where
        T: Serialize,
    {
        let json = serde_json::to_vec(self)?;
        Ok(Base64Bytes::encode(json))
    }
}

impl<T: Serialize + DeserializeOwned> Signed<T> {
    /// Decodes an opaque wire field back into a [`Signed<T>`] without
    /// verifying it — verification is a separate, explicit step so callers
    /// can't accidentally trust an unverified payload.
    pub fn from_opaque(bytes: &Base64Bytes<'_>) -> Result<Self, CryptoError> {
        let json = bytes.decode().map_err(|_| CryptoError::NotBase64)?;
        let signed: Signed<T> = serde_json::from_slice(&json)?;
        Ok(signed)
    }

    /// Verifies the detached signature against `signer`, returning the
    /// payload on success.
    pub fn verify(&self, signer: &VerifyingKey) -> Result<&T, CryptoError> {
        let bytes = canonical_json(&self.payload).into_bytes();
        let sig_bytes = self
            .signature
            .decode()
            .map_err(|_| CryptoError::NotBase64)?;
        let sig_bytes: [u8; 64] = sig_bytes
            .try_into()
            .map_err(|_| CryptoError::MalformedSignature)?;
        let signature = Signature::from_bytes(&sig_bytes);
        signer
            .verify(&bytes, &signature)
            .map_err(|_| CryptoError::VerificationFailed)?;
        Ok(&self.payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn evidence_claim_round_trips() {
        let key = SigningKeyPair::generate();
        let nonce = Nonce::generate();
        let artifact = b"pretend source bytes";
        let claim = sign_evidence(&key, artifact, &nonce);
        assert!(verify_evidence(&claim, artifact, &nonce, &key.verifying_key()).is_ok());
    }

    #[test]
    fn evidence_claim_rejects_wrong_nonce() {
        let key = SigningKeyPair::generate();
        let artifact = b"pretend source bytes";
        let claim = sign_evidence(&key, artifact, &Nonce::generate());
        let other_nonce = Nonce::generate();
        assert!(verify_evidence(&claim, artifact, &other_nonce, &key.verifying_key()).is_err());
    }

    #[test]
    fn evidence_claim_rejects_wrong_signer() {
        let key = SigningKeyPair::generate();
        let impostor = SigningKeyPair::generate();
        let nonce = Nonce::generate();
        let artifact = b"pretend source bytes";
        let claim = sign_evidence(&key, artifact, &nonce);
        assert!(verify_evidence(&claim, artifact, &nonce, &impostor.verifying_key()).is_err());
    }

    #[test]
    fn signed_payload_round_trips_opaquely() {
        let key = SigningKeyPair::generate();
        let signed = Signed::sign(&key, json!({"bp": 100.0}));
        let opaque = signed.to_opaque().unwrap();
        let decoded: Signed<serde_json::Value> = Signed::from_opaque(&opaque).unwrap();
        let verified = decoded.verify(&key.verifying_key()).unwrap();
        assert_eq!(verified, &json!({"bp": 100.0}));
    }

    #[test]
    fn signed_payload_rejects_tampering() {
        let key = SigningKeyPair::generate();
        let mut signed = Signed::sign(&key, json!({"bp": 100.0}));
        signed.payload = json!({"bp": 999.0});
        assert!(signed.verify(&key.verifying_key()).is_err());
    }
}
