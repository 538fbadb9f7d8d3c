//! The DAP's own outbound channel to the Verifier (§2 control-flow steps
//! 3-6, §4.2 "DAP as attested peer").

use ed25519_dalek::VerifyingKey;
use gateway_net::{connect_with_retry, read_message, write_message};
use gateway_types::crypto::Signed;
use gateway_types::envelope::{
    AttestationPayload, AttestationRequest, AttestationResponse, NonceRequest, NonceResponse,
};
use gateway_types::nonce::Nonce;
use gateway_types::util::b64::Base64Bytes;
use gateway_types::GatewayError;
use rustls::ClientConfig;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::BufReader;

pub struct VerifierClient {
    addr: SocketAddr,
    server_name: String,
    tls_config: Arc<ClientConfig>,
    verifying_key: VerifyingKey,
}

impl VerifierClient {
    pub fn new(addr: SocketAddr, server_name: String, tls_config: Arc<ClientConfig>, verifying_key: VerifyingKey) -> Self {
        VerifierClient { addr, server_name, tls_config, verifying_key }
    }

    /// `request_nonce` (§4.1): opens a fresh channel to the Verifier and asks
    /// for a single-use nonce.
    pub async fn request_nonce(&self) -> Result<Nonce, GatewayError> {
        let stream = connect_with_retry(self.addr, &self.server_name, self.tls_config.clone())
            .await
            .map_err(|e| GatewayError::Protocol(e.to_string()))?;
        let (read_half, mut write_half) = tokio::io::split(stream);
        let mut reader = BufReader::new(read_half);

        write_message(&mut write_half, &NonceRequest::new())
            .await
            .map_err(|e| GatewayError::Protocol(e.to_string()))?;
        let response: NonceResponse = read_message(&mut reader)
            .await
            .map_err(|e| GatewayError::Protocol(e.to_string()))?
            .ok_or_else(|| GatewayError::Protocol("verifier closed the channel before replying".into()))?;
        Ok(response.nonce)
    }

    /// `request_attestation` (§4.1): submits this DAP's own evidence claims
    /// and returns the verified attestation payload, or an error if the
    /// Verifier rejected the request or the signature does not verify.
    pub async fn request_attestation(
        &self,
        source_code_claim: Base64Bytes<'static>,
        loaded_pipeline_claim: Base64Bytes<'static>,
        nonce: Nonce,
        query_name: String,
    ) -> Result<AttestationPayload, GatewayError> {
        let stream = connect_with_retry(self.addr, &self.server_name, self.tls_config.clone())
            .await
            .map_err(|e| GatewayError::Protocol(e.to_string()))?;
        let (read_half, mut write_half) = tokio::io::split(stream);
        let mut reader = BufReader::new(read_half);

        let request = AttestationRequest::new(source_code_claim, loaded_pipeline_claim, nonce, query_name);
        write_message(&mut write_half, &request)
            .await
            .map_err(|e| GatewayError::Protocol(e.to_string()))?;

        let raw: serde_json::Value = read_message(&mut reader)
            .await
            .map_err(|e| GatewayError::Protocol(e.to_string()))?
            .ok_or_else(|| GatewayError::Protocol("verifier closed the channel before replying".into()))?;

        if raw.get("error").is_some() {
            return Err(GatewayError::Attestation("verifier rejected the request".into()));
        }
        let response: AttestationResponse =
            serde_json::from_value(raw).map_err(|e| GatewayError::Protocol(e.to_string()))?;

        let signed: Signed<AttestationPayload> =
            Signed::from_opaque(&response.attestation).map_err(GatewayError::attestation)?;
        signed
            .verify(&self.verifying_key)
            .map(Clone::clone)
            .map_err(GatewayError::attestation)
    }
}
