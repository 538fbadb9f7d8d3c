//! The PI's own evidence claims, scoped follow-up execution, and signing
//! logic (§4.3 "Personal Intermediary").

use gateway_store::{PipelineRegistry, Store};
use gateway_types::crypto::{sign_evidence, Signed, SigningKeyPair};
use gateway_types::nonce::Nonce;
use gateway_types::params::Params;
use gateway_types::template::bind;
use gateway_types::{Base64Bytes, GatewayError, Peer, UnixTimestamp};
use serde_json::Value;
use std::sync::Arc;

/// Holds the PI's restricted store, its one loaded approved pipeline, and
/// its own signing key. One instance is shared across every connection.
pub struct Pi {
    store: Arc<dyn Store>,
    registry: PipelineRegistry,
    signing_key: SigningKeyPair,
}

impl Pi {
    pub fn new(store: Arc<dyn Store>, registry: PipelineRegistry, signing_key: SigningKeyPair) -> Self {
        Pi { store, registry, signing_key }
    }

    /// Computes this PI's own evidence claims under `nonce`, for a query
    /// named `query_name` in its registry. The PI loads exactly one pipeline
    /// (§10.6 resolved open question), so in practice `query_name` is always
    /// that pipeline's own name.
    pub fn evidence_claims(
        &self,
        nonce: &Nonce,
        query_name: &str,
    ) -> Result<(Base64Bytes<'static>, Base64Bytes<'static>), GatewayError> {
        let canonical = self.registry.canonical_bytes(query_name).map_err(|e| GatewayError::Evidence(e.to_string()))?;
        let source_claim = sign_evidence(&self.signing_key, Peer::Pi.source_image(), nonce);
        let pipeline_claim = sign_evidence(&self.signing_key, canonical.as_bytes(), nonce);
        Ok((source_claim, pipeline_claim))
    }

    /// Runs the PI's own `is_bp_above_mean` pipeline against its
    /// population-statistics view, binding the reading the DAP just
    /// released as `input_bp` (§4.3 "Follow-up computation").
    pub fn run_follow_up(&self, route: &str, input_bp: f64, now: UnixTimestamp) -> Result<Vec<Value>, GatewayError> {
        let template = self.registry.get(route).map_err(|e| GatewayError::Protocol(e.to_string()))?;
        let mut params = Params::new();
        let value = gateway_types::params::validate_param("input_bp", &serde_json::json!(input_bp), now)?;
        params.insert("input_bp".to_string(), value);
        let bound = bind(&template.pipeline, &params)?;
        self.store
            .run_pipeline(&bound, now.seconds_since_epoch())
            .map_err(GatewayError::store)
    }

    /// Signs `payload` under this PI's own key, producing the opaque field
    /// a [`gateway_types::envelope::QueryResponse`] carries for a follow-up
    /// the PI itself computed (§4.3 "signs and returns").
    pub fn sign(&self, payload: Value) -> Signed<Value> {
        Signed::sign(&self.signing_key, payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gateway_store::seed::{build_pi_store, ROUTE_IS_BP_ABOVE_MEAN};
    use gateway_types::nonce::Nonce;

    fn pi_with_seed() -> Pi {
        let (store, registry) = build_pi_store();
        Pi::new(Arc::new(store), registry, SigningKeyPair::generate())
    }

    #[test]
    fn follow_up_above_mean_yields_one() {
        let pi = pi_with_seed();
        let now = UnixTimestamp(1_700_000_000);
        let result = pi.run_follow_up(ROUTE_IS_BP_ABOVE_MEAN, 100.0, now).unwrap();
        assert_eq!(result[0]["result"], Value::from(1));
    }

    #[test]
    fn follow_up_below_mean_yields_negative_one() {
        let pi = pi_with_seed();
        let now = UnixTimestamp(1_700_000_000);
        let result = pi.run_follow_up(ROUTE_IS_BP_ABOVE_MEAN, 90.0, now).unwrap();
        assert_eq!(result[0]["result"], Value::from(-1));
    }

    #[test]
    fn follow_up_at_mean_yields_zero() {
        let pi = pi_with_seed();
        let now = UnixTimestamp(1_700_000_000);
        let result = pi.run_follow_up(ROUTE_IS_BP_ABOVE_MEAN, 98.6, now).unwrap();
        assert_eq!(result[0]["result"], Value::from(0));
    }

    #[test]
    fn evidence_claims_verify_under_pis_own_key() {
        let pi = pi_with_seed();
        let nonce = Nonce::generate();
        let (source_claim, pipeline_claim) = pi.evidence_claims(&nonce, ROUTE_IS_BP_ABOVE_MEAN).unwrap();
        let verifying_key = pi.signing_key.verifying_key();
        assert!(gateway_types::crypto::verify_evidence(&source_claim, Peer::Pi.source_image(), &nonce, &verifying_key).is_ok());
        let canonical = pi.registry.canonical_bytes(ROUTE_IS_BP_ABOVE_MEAN).unwrap();
        assert!(gateway_types::crypto::verify_evidence(&pipeline_claim, canonical.as_bytes(), &nonce, &verifying_key).is_ok());
    }
}
