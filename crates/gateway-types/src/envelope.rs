//! Wire message envelopes (§6 "External Interfaces").
//!
//! Every inter-component message is one line of JSON. These types are the
//! required-fields shapes from the §6 table; binary fields (signatures,
//! evidence, nonces) are base64 ASCII via [`crate::util::b64::Base64Bytes`]
//! and [`crate::nonce::Nonce`].

use crate::nonce::Nonce;
use crate::util::b64::Base64Bytes;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const VERB_GET: &str = "GET";

pub const ROUTE_NONCE: &str = "nonce";
pub const ROUTE_EVIDENCE: &str = "evidence";
pub const ROUTE_ATTESTATION: &str = "attestation";

/// `{ verb:"GET", route:"nonce" }`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NonceRequest {
    pub verb: String,
    pub route: String,
}

impl NonceRequest {
    pub fn new() -> Self {
        NonceRequest {
            verb: VERB_GET.to_string(),
            route: ROUTE_NONCE.to_string(),
        }
    }

    pub fn is_well_formed(&self) -> bool {
        self.verb == VERB_GET && self.route == ROUTE_NONCE
    }
}

impl Default for NonceRequest {
    fn default() -> Self {
        Self::new()
    }
}

/// `{ nonce:<b64> }`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NonceResponse {
    pub nonce: Nonce,
}

/// `{ verb:"GET", route:"evidence", nonce, [query_name] }`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvidenceRequest {
    pub verb: String,
    pub route: String,
    pub nonce: Nonce,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query_name: Option<String>,
}

impl EvidenceRequest {
    pub fn new(nonce: Nonce, query_name: Option<String>) -> Self {
        EvidenceRequest {
            verb: VERB_GET.to_string(),
            route: ROUTE_EVIDENCE.to_string(),
            nonce,
            query_name,
        }
    }

    pub fn is_well_formed(&self) -> bool {
        self.verb == VERB_GET && self.route == ROUTE_EVIDENCE
    }
}

/// `{ source_code_claim, loaded_pipeline_claim, received_nonce, [requested_nonce] }`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvidenceResponse {
    pub source_code_claim: Base64Bytes<'static>,
    pub loaded_pipeline_claim: Base64Bytes<'static>,
    pub received_nonce: Nonce,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub requested_nonce: Option<Nonce>,
}

/// `{ verb:"GET", route:"attestation", source_code_claim, loaded_pipeline_claim, nonce, query_name }`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttestationRequest {
    pub verb: String,
    pub route: String,
    pub source_code_claim: Base64Bytes<'static>,
    pub loaded_pipeline_claim: Base64Bytes<'static>,
    pub nonce: Nonce,
    pub query_name: String,
}

impl AttestationRequest {
    pub fn new(
        source_code_claim: Base64Bytes<'static>,
        loaded_pipeline_claim: Base64Bytes<'static>,
        nonce: Nonce,
        query_name: String,
    ) -> Self {
        AttestationRequest {
            verb: VERB_GET.to_string(),
            route: ROUTE_ATTESTATION.to_string(),
            source_code_claim,
            loaded_pipeline_claim,
            nonce,
            query_name,
        }
    }

    pub fn is_well_formed(&self) -> bool {
        self.verb == VERB_GET && self.route == ROUTE_ATTESTATION
    }
}

/// `{ attestation:<b64-signed-payload> }`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttestationResponse {
    pub attestation: Base64Bytes<'static>,
}

/// The caller's own evidence, carried alongside a query request so the
/// callee can mutually attest the caller (§2 steps 7-8, §4.2 step 2).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerEvidence {
    pub source_code_claim: Base64Bytes<'static>,
    pub loaded_pipeline_claim: Base64Bytes<'static>,
    /// The nonce the callee itself issued in its evidence response, under
    /// which the caller computed the two claims above.
    pub nonce: Nonce,
    /// The caller's own loaded follow-up pipeline name, so the callee's
    /// attestation request to the Verifier names the right template.
    pub query_name: String,
}

/// `{ verb:"GET", route:<name>, username, password, params:{...} }`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryRequest {
    pub verb: String,
    pub route: String,
    pub username: String,
    pub password: String,
    pub params: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub peer_evidence: Option<PeerEvidence>,
}

impl QueryRequest {
    pub fn is_well_formed(&self) -> bool {
        self.verb == VERB_GET && !self.route.is_empty()
    }
}

/// `{ response:<b64-signed-result> }`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryResponse {
    pub response: Base64Bytes<'static>,
}

/// `{ error:<string> }` — the generic failure reply used by every route.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorReply {
    pub error: String,
}

impl ErrorReply {
    pub fn new(kind: impl Into<String>) -> Self {
        ErrorReply { error: kind.into() }
    }
}

/// `{ close:"close" }`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Close {
    pub close: String,
}

impl Close {
    pub fn new() -> Self {
        Close {
            close: "close".to_string(),
        }
    }

    pub fn is_well_formed(&self) -> bool {
        self.close == "close"
    }
}

impl Default for Close {
    fn default() -> Self {
        Self::new()
    }
}

/// The attestation payload signed inside an [`AttestationResponse`] (§3
/// "Attestation token", §6 "Attestation payload").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttestationPayload {
    pub expiration: u64,
    pub source_code_claim: Base64Bytes<'static>,
    pub loaded_pipeline_claim: Base64Bytes<'static>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nonce_request_wire_shape() {
        let req = NonceRequest::new();
        let json = serde_json::to_string(&req).unwrap();
        assert_eq!(json, r#"{"verb":"GET","route":"nonce"}"#);
    }

    #[test]
    fn close_wire_shape() {
        assert_eq!(serde_json::to_string(&Close::new()).unwrap(), r#"{"close":"close"}"#);
    }

    #[test]
    fn query_response_and_error_reply_are_distinguishable() {
        let ok = QueryResponse {
            response: Base64Bytes::encode(b"payload"),
        };
        let ok_value: Value = serde_json::to_value(&ok).unwrap();
        assert!(ok_value.get("response").is_some());

        let err = ErrorReply::new("parameter_error");
        let err_value: Value = serde_json::to_value(&err).unwrap();
        assert!(err_value.get("error").is_some());
    }
}
