//! The PI's outbound channel to the DAP (§2 control-flow steps 2-9, §4.3
//! "PI relays to the DAP").
//!
//! One call opens one connection and carries the whole exchange across it:
//! the PI requests a nonce for itself, asks the DAP for its evidence, has
//! the Verifier attest the DAP, attaches the PI's own evidence (computed
//! under the DAP's freshly-issued reverse nonce) to the real query, and
//! reads back the DAP's signed result.

use crate::core::Pi;
use crate::verifier_client::VerifierClient;
use ed25519_dalek::VerifyingKey;
use gateway_net::{connect_with_retry, read_message, write_message};
use gateway_store::seed::ROUTE_IS_BP_ABOVE_MEAN;
use gateway_types::crypto::Signed;
use gateway_types::envelope::{EvidenceRequest, EvidenceResponse, PeerEvidence, QueryRequest, QueryResponse, VERB_GET};
use gateway_types::{Base64Bytes, GatewayError};
use rustls::ClientConfig;
use serde_json::Value;
use std::net::SocketAddr;
use std::sync::Arc;

/// The DAP's signed result, both as the still-opaque wire field (for
/// unmodified passthrough to a Client) and as the verified value (for a
/// follow-up computation to read).
pub struct DapResult {
    pub opaque: Base64Bytes<'static>,
    pub value: Value,
}

pub struct DapClient {
    addr: SocketAddr,
    server_name: String,
    tls_config: Arc<ClientConfig>,
    verifying_key: VerifyingKey,
}

impl DapClient {
    pub fn new(addr: SocketAddr, server_name: String, tls_config: Arc<ClientConfig>, verifying_key: VerifyingKey) -> Self {
        DapClient { addr, server_name, tls_config, verifying_key }
    }

    pub async fn query(
        &self,
        pi: &Pi,
        own_nonce_channel: &VerifierClient,
        dap_attest_channel: &VerifierClient,
        route: &str,
        username: &str,
        password: &str,
        params: Value,
    ) -> Result<DapResult, GatewayError> {
        let stream = connect_with_retry(self.addr, &self.server_name, self.tls_config.clone())
            .await
            .map_err(|e| GatewayError::Protocol(e.to_string()))?;
        let (read_half, mut write_half) = tokio::io::split(stream);
        let mut reader = tokio::io::BufReader::new(read_half);

        // Step 2: a nonce of the PI's own, to carry in the evidence request
        // to the DAP.
        let nonce_v = own_nonce_channel.request_nonce().await?;

        // Step 3: ask the DAP for its evidence under that nonce.
        write_message(&mut write_half, &EvidenceRequest::new(nonce_v, Some(route.to_string())))
            .await
            .map_err(|e| GatewayError::Protocol(e.to_string()))?;
        let evidence: EvidenceResponse = read_message(&mut reader)
            .await
            .map_err(|e| GatewayError::Protocol(e.to_string()))?
            .ok_or_else(|| GatewayError::Protocol("dap closed the channel before replying".into()))?;
        if evidence.received_nonce != nonce_v {
            return Err(GatewayError::Attestation("dap's evidence was computed under the wrong nonce".into()));
        }
        let nonce_d = evidence
            .requested_nonce
            .ok_or_else(|| GatewayError::Protocol("dap did not supply a reverse nonce".into()))?;

        // Steps 5-6: have the Verifier attest the DAP's claims.
        dap_attest_channel
            .request_attestation(evidence.source_code_claim, evidence.loaded_pipeline_claim, nonce_v, route.to_string())
            .await?;

        // Step 7: attach this PI's own evidence, computed under the DAP's
        // reverse nonce, and send the real query.
        let (source_code_claim, loaded_pipeline_claim) = pi.evidence_claims(&nonce_d, ROUTE_IS_BP_ABOVE_MEAN)?;
        let peer_evidence = PeerEvidence {
            source_code_claim,
            loaded_pipeline_claim,
            nonce: nonce_d,
            query_name: ROUTE_IS_BP_ABOVE_MEAN.to_string(),
        };
        let request = QueryRequest {
            verb: VERB_GET.to_string(),
            route: route.to_string(),
            username: username.to_string(),
            password: password.to_string(),
            params,
            peer_evidence: Some(peer_evidence),
        };
        write_message(&mut write_half, &request)
            .await
            .map_err(|e| GatewayError::Protocol(e.to_string()))?;

        // Step 9: read back the DAP's signed result.
        let raw: Value = read_message(&mut reader)
            .await
            .map_err(|e| GatewayError::Protocol(e.to_string()))?
            .ok_or_else(|| GatewayError::Protocol("dap closed the channel before replying".into()))?;
        if let Some(kind) = raw.get("error").and_then(Value::as_str) {
            return Err(GatewayError::Store(format!("dap rejected the query: {kind}")));
        }
        let response: QueryResponse = serde_json::from_value(raw).map_err(|e| GatewayError::Protocol(e.to_string()))?;

        let signed: Signed<Value> = Signed::from_opaque(&response.response).map_err(GatewayError::attestation)?;
        let value = signed.verify(&self.verifying_key).map_err(GatewayError::attestation)?.clone();

        Ok(DapResult { opaque: response.response, value })
    }
}
