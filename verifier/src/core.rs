//! The Verifier's nonce and attestation logic (§4.1).

use dashmap::DashMap;
use ed25519_dalek::VerifyingKey;
use gateway_store::PipelineRegistry;
use gateway_types::crypto::{verify_evidence, Signed, SigningKeyPair};
use gateway_types::envelope::AttestationPayload;
use gateway_types::nonce::Nonce;
use gateway_types::{GatewayError, Peer, UnixTimestamp};

/// A single generic rejection, deliberately carrying no detail: §4.1
/// "Failure" — "the Verifier does not reveal which step failed".
#[derive(Debug, thiserror::Error)]
#[error("attestation request rejected")]
pub struct Rejected;

pub struct Verifier {
    signing_key: SigningKeyPair,
    pending_nonces: DashMap<Nonce, UnixTimestamp>,
    nonce_window_secs: u64,
    registry: PipelineRegistry,
    dap_verifying_key: VerifyingKey,
    pi_verifying_key: VerifyingKey,
}

impl Verifier {
    pub fn new(
        signing_key: SigningKeyPair,
        registry: PipelineRegistry,
        nonce_window_secs: u64,
        dap_verifying_key: VerifyingKey,
        pi_verifying_key: VerifyingKey,
    ) -> Self {
        Verifier {
            signing_key,
            pending_nonces: DashMap::new(),
            nonce_window_secs,
            registry,
            dap_verifying_key,
            pi_verifying_key,
        }
    }

    pub fn verifying_key(&self) -> VerifyingKey {
        self.signing_key.verifying_key()
    }

    /// `request_nonce` (§4.1): generates 24 random bytes, records the
    /// issuance time, returns the nonce.
    pub fn issue_nonce(&self, now: UnixTimestamp) -> Nonce {
        let nonce = Nonce::generate();
        self.pending_nonces.insert(nonce, now);
        nonce
    }

    fn peer_key(&self, peer: Peer) -> &VerifyingKey {
        match peer {
            Peer::Dap => &self.dap_verifying_key,
            Peer::Pi => &self.pi_verifying_key,
        }
    }

    /// `request_attestation` (§4.1). Consumes the nonce on success and on
    /// every rejection path but "unknown nonce" itself, so a replayed nonce
    /// never succeeds twice (§8 "For every issued nonce, at most one
    /// successful attestation consumes it").
    pub fn request_attestation(
        &self,
        peer: Peer,
        source_code_claim: &gateway_types::Base64Bytes<'_>,
        loaded_pipeline_claim: &gateway_types::Base64Bytes<'_>,
        nonce: Nonce,
        query_name: &str,
        now: UnixTimestamp,
    ) -> Result<Signed<AttestationPayload>, Rejected> {
        let issued_at = self
            .pending_nonces
            .remove(&nonce)
            .map(|(_, issued_at)| issued_at)
            .ok_or(Rejected)?;
        if !issued_at.has_not_expired(self.nonce_window_secs, now) {
            return Err(Rejected);
        }

        let peer_key = self.peer_key(peer);
        verify_evidence(source_code_claim, peer.source_image(), &nonce, peer_key).map_err(|_| Rejected)?;

        let canonical = self.registry.canonical_bytes(query_name).map_err(|_| Rejected)?;
        verify_evidence(loaded_pipeline_claim, canonical.as_bytes(), &nonce, peer_key)
            .map_err(|_| Rejected)?;

        let payload = AttestationPayload {
            expiration: (now + self.nonce_window_secs).seconds_since_epoch(),
            source_code_claim: source_code_claim.to_owned_static(),
            loaded_pipeline_claim: loaded_pipeline_claim.to_owned_static(),
        };
        Ok(Signed::sign(&self.signing_key, payload))
    }
}

impl From<Rejected> for GatewayError {
    fn from(_: Rejected) -> Self {
        GatewayError::Attestation("rejected".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gateway_store::seed::build_seed;
    use gateway_types::canonical::canonical_pipeline;
    use gateway_types::crypto::sign_evidence;

    fn verifier_with(dap_key: &SigningKeyPair, pi_key: &SigningKeyPair) -> Verifier {
        let (_, registry, _) = build_seed();
        Verifier::new(
            SigningKeyPair::generate(),
            registry,
            300,
            dap_key.verifying_key(),
            pi_key.verifying_key(),
        )
    }

    #[test]
    fn accepts_matching_evidence_and_consumes_the_nonce() {
        let dap_key = SigningKeyPair::generate();
        let pi_key = SigningKeyPair::generate();
        let verifier = verifier_with(&dap_key, &pi_key);
        let now = UnixTimestamp(1_700_000_000);
        let nonce = verifier.issue_nonce(now);

        let (_, registry, _) = build_seed();
        let canonical = canonical_pipeline(&registry.get("get_bp").unwrap().pipeline);
        let source_claim = sign_evidence(&dap_key, Peer::Dap.source_image(), &nonce);
        let pipeline_claim = sign_evidence(&dap_key, canonical.as_bytes(), &nonce);

        let attestation = verifier
            .request_attestation(Peer::Dap, &source_claim, &pipeline_claim, nonce, "get_bp", now)
            .unwrap();
        assert!(attestation.verify(&verifier.verifying_key()).is_ok());

        // Replay: same nonce is now unknown, so it is rejected again.
        assert!(verifier
            .request_attestation(Peer::Dap, &source_claim, &pipeline_claim, nonce, "get_bp", now)
            .is_err());
    }

    #[test]
    fn rejects_expired_nonce() {
        let dap_key = SigningKeyPair::generate();
        let pi_key = SigningKeyPair::generate();
        let verifier = verifier_with(&dap_key, &pi_key);
        let issued_at = UnixTimestamp(1_700_000_000);
        let nonce = verifier.issue_nonce(issued_at);

        let (_, registry, _) = build_seed();
        let canonical = canonical_pipeline(&registry.get("get_bp").unwrap().pipeline);
        let source_claim = sign_evidence(&dap_key, Peer::Dap.source_image(), &nonce);
        let pipeline_claim = sign_evidence(&dap_key, canonical.as_bytes(), &nonce);

        let too_late = issued_at + 301;
        assert!(verifier
            .request_attestation(Peer::Dap, &source_claim, &pipeline_claim, nonce, "get_bp", too_late)
            .is_err());
    }

    #[test]
    fn rejects_claim_signed_by_the_wrong_peer() {
        let dap_key = SigningKeyPair::generate();
        let pi_key = SigningKeyPair::generate();
        let verifier = verifier_with(&dap_key, &pi_key);
        let now = UnixTimestamp(1_700_000_000);
        let nonce = verifier.issue_nonce(now);

        // PI's key signs evidence claimed to be the DAP's.
        let source_claim = sign_evidence(&pi_key, Peer::Dap.source_image(), &nonce);
        let (_, registry, _) = build_seed();
        let canonical = canonical_pipeline(&registry.get("get_bp").unwrap().pipeline);
        let pipeline_claim = sign_evidence(&pi_key, canonical.as_bytes(), &nonce);

        assert!(verifier
            .request_attestation(Peer::Dap, &source_claim, &pipeline_claim, nonce, "get_bp", now)
            .is_err());
    }

    #[test]
    fn rejects_unknown_query_name() {
        let dap_key = SigningKeyPair::generate();
        let pi_key = SigningKeyPair::generate();
        let verifier = verifier_with(&dap_key, &pi_key);
        let now = UnixTimestamp(1_700_000_000);
        let nonce = verifier.issue_nonce(now);
        let source_claim = sign_evidence(&dap_key, Peer::Dap.source_image(), &nonce);
        let pipeline_claim = sign_evidence(&dap_key, b"whatever", &nonce);

        assert!(verifier
            .request_attestation(Peer::Dap, &source_claim, &pipeline_claim, nonce, "no-such-route", now)
            .is_err());
    }
}
