//! The DAP's authentication, binding, execution, and signing logic (§4.2
//! "Data-Access Proxy").

use gateway_store::model::COLLECTION_USERS;
use gateway_store::{PipelineRegistry, Store};
use gateway_types::crypto::{sign_evidence, Signed, SigningKeyPair};
use gateway_types::nonce::Nonce;
use gateway_types::params::Params;
use gateway_types::template::bind;
use gateway_types::{Base64Bytes, GatewayError, ObjectId, Peer, UnixTimestamp};
use serde_json::Value;
use std::sync::Arc;

/// The string a release-policy pipeline emits in place of a value when the
/// caller holds an unexpired `enclave` permission but has not yet attested
/// (§4.2 "Sentinel value").
pub const ATTESTATION_SENTINEL: &str = "attestation required";

/// The DAP's authenticated session state: who is calling, and the
/// `attestation` bit the release policy reads (§4.2 steps 1-7).
pub struct AuthenticatedUser {
    pub user_id: ObjectId,
}

/// Holds the store, the approved-pipeline registry, and this DAP's own
/// signing key. One instance is shared across every connection.
pub struct Dap {
    store: Arc<dyn Store>,
    registry: PipelineRegistry,
    signing_key: SigningKeyPair,
}

impl Dap {
    pub fn new(store: Arc<dyn Store>, registry: PipelineRegistry, signing_key: SigningKeyPair) -> Self {
        Dap { store, registry, signing_key }
    }

    /// Looks up `username`/`password` in the `users` collection (§10.6:
    /// "minimal username/password auth with no password hashing" — matching
    /// the original prototype's `authenticate_user`).
    pub fn authenticate(&self, username: &str, password: &str) -> Result<AuthenticatedUser, GatewayError> {
        let users = self.store.collection(COLLECTION_USERS).map_err(GatewayError::store)?;
        let matched = users.iter().find(|doc| {
            doc.get("username").and_then(Value::as_str) == Some(username)
                && doc.get("password").and_then(Value::as_str) == Some(password)
        });
        let doc = matched.ok_or(GatewayError::Auth)?;
        let id_str = doc.get("_id").and_then(Value::as_str).ok_or(GatewayError::Auth)?;
        let user_id: ObjectId = id_str.try_into().map_err(|_| GatewayError::Auth)?;
        Ok(AuthenticatedUser { user_id })
    }

    /// Whether `route` names a template this DAP has loaded.
    pub fn whitelisted(&self, route: &str) -> bool {
        self.registry.get(route).is_ok()
    }

    /// Computes this DAP's own evidence claims under `nonce`, for a query
    /// named `query_name` in its registry (§4.1 step 2-3, §4.2 step 2 when
    /// the DAP itself is the attested peer of a PI→DAP hop).
    pub fn evidence_claims(
        &self,
        nonce: &Nonce,
        query_name: &str,
    ) -> Result<(Base64Bytes<'static>, Base64Bytes<'static>), GatewayError> {
        let canonical = self.registry.canonical_bytes(query_name).map_err(|e| GatewayError::Evidence(e.to_string()))?;
        let source_claim = sign_evidence(&self.signing_key, Peer::Dap.source_image(), nonce);
        let pipeline_claim = sign_evidence(&self.signing_key, canonical.as_bytes(), nonce);
        Ok((source_claim, pipeline_claim))
    }

    /// Binds `params` into the named approved template and runs it against
    /// the store (§4.2 step 4, §4.4).
    pub fn execute(&self, route: &str, params: &Params, now: UnixTimestamp) -> Result<Vec<Value>, GatewayError> {
        let template = self.registry.get(route).map_err(|e| GatewayError::Protocol(e.to_string()))?;
        let bound = bind(&template.pipeline, params)?;
        self.store
            .run_pipeline(&bound, now.seconds_since_epoch())
            .map_err(GatewayError::store)
    }

    /// Signs `payload` under this DAP's own key, producing the opaque field
    /// a [`gateway_types::envelope::QueryResponse`] carries (§4.2 step 8).
    pub fn sign(&self, payload: Value) -> Signed<Value> {
        Signed::sign(&self.signing_key, payload)
    }
}

/// Whether any leaf of `results` is the sentinel value (§4.2 "If the
/// sentinel appears anywhere in the projected result").
pub fn contains_sentinel(results: &[Value]) -> bool {
    results.iter().any(|doc| value_contains_sentinel(doc))
}

fn value_contains_sentinel(value: &Value) -> bool {
    match value {
        Value::String(s) => s == ATTESTATION_SENTINEL,
        Value::Array(items) => items.iter().any(value_contains_sentinel),
        Value::Object(map) => map.values().any(value_contains_sentinel),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gateway_store::seed::{build_seed, ROUTE_GET_BP};
    use serde_json::json;

    fn dap_with_seed() -> (Dap, gateway_store::seed::ScenarioUsers) {
        let (store, registry, users) = build_seed();
        let dap = Dap::new(Arc::new(store), registry, SigningKeyPair::generate());
        (dap, users)
    }

    #[test]
    fn authenticates_known_username_and_password() {
        let (dap, users) = dap_with_seed();
        let authed = dap.authenticate("P", "patient-pass").unwrap();
        assert_eq!(authed.user_id, users.patient_id);
    }

    #[test]
    fn rejects_wrong_password() {
        let (dap, _users) = dap_with_seed();
        assert!(dap.authenticate("P", "wrong").is_err());
    }

    #[test]
    fn rejects_unknown_username() {
        let (dap, _users) = dap_with_seed();
        assert!(dap.authenticate("nobody", "whatever").is_err());
    }

    #[test]
    fn whitelisted_reports_loaded_routes_only() {
        let (dap, _users) = dap_with_seed();
        assert!(dap.whitelisted(ROUTE_GET_BP));
        assert!(!dap.whitelisted("drop_table"));
    }

    #[test]
    fn execute_runs_the_bound_pipeline() {
        let (dap, users) = dap_with_seed();
        let now = UnixTimestamp(1_700_000_000);
        let mut params = Params::new();
        params.insert("patient_id".to_string(), gateway_types::params::validate_param("patient_id", &json!(users.patient_id.to_string()), now).unwrap());
        params.insert("user_id".to_string(), gateway_types::params::validate_param("user_id", &json!(users.patient_id.to_string()), now).unwrap());
        params.insert("attestation".to_string(), gateway_types::params::validate_param("attestation", &json!(false), now).unwrap());
        let result = dap.execute(ROUTE_GET_BP, &params, now).unwrap();
        assert_eq!(result[0]["bp"], json!(100.0));
    }

    #[test]
    fn sentinel_detection_finds_nested_string() {
        let results = vec![json!({"bp": ATTESTATION_SENTINEL})];
        assert!(contains_sentinel(&results));
        let results = vec![json!({"bp": 100.0})];
        assert!(!contains_sentinel(&results));
    }
}
