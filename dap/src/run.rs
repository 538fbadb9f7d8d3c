//! DAP accept loop and per-connection protocol state machine (§4.2).

use crate::config::Config;
use crate::core::{contains_sentinel, Dap};
use crate::keys::{load_signing_key, parse_verifying_key};
use crate::verifier_client::VerifierClient;
use dotenvy::dotenv;
use gateway_net::{client_config, read_message, server_config, write_message, Shutdown, TlsIdentity};
use gateway_store::seed::build_seed;
use gateway_types::envelope::{
    ErrorReply, EvidenceRequest, EvidenceResponse, PeerEvidence, QueryRequest, QueryResponse,
    ROUTE_EVIDENCE,
};
use gateway_types::params::parse_inbound_params;
use gateway_types::{GatewayError, ObjectId, UnixTimestamp};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_rustls::TlsAcceptor;

pub async fn run() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .compact()
        .init();

    let config = Config::load()?;

    let signing_key = load_signing_key(&config.signing_key_path)?;
    let verifier_verifying_key = parse_verifying_key(&config.verifier_verifying_key)?;
    let (store, registry, _users) = build_seed();
    let dap = Arc::new(Dap::new(Arc::new(store), registry, signing_key));

    let identity = TlsIdentity {
        cert_path: config.tls.cert_path.clone(),
        key_path: config.tls.key_path.clone(),
        ca_path: config.tls.ca_path.clone(),
    };
    let server_tls = Arc::new(server_config(&identity)?);
    let acceptor = TlsAcceptor::from(server_tls);
    let client_tls = Arc::new(client_config(&identity)?);

    let dap_channel = Arc::new(VerifierClient::new(
        config.verifier_dap_addr,
        config.verifier_server_name.clone(),
        client_tls.clone(),
        verifier_verifying_key,
    ));
    let pi_attest_channel = Arc::new(VerifierClient::new(
        config.verifier_pi_addr,
        config.verifier_server_name.clone(),
        client_tls,
        verifier_verifying_key,
    ));

    let shutdown = Shutdown::try_new()?;
    let cancel = shutdown.cancellation_token();

    tracing::info!(bind_addr = %config.bind_addr, "dap listening");
    let listener = TcpListener::bind(config.bind_addr).await?;
    let attestation_timeout = Duration::from_secs(config.attestation_timeout_secs);

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (tcp, remote) = accepted?;
                let acceptor = acceptor.clone();
                let dap = dap.clone();
                let dap_channel = dap_channel.clone();
                let pi_attest_channel = pi_attest_channel.clone();
                tokio::spawn(async move {
                    match acceptor.accept(tcp).await {
                        Ok(stream) => {
                            if let Err(e) = handle_connection(stream, dap, dap_channel, pi_attest_channel, attestation_timeout).await {
                                tracing::debug!(%remote, error = %e, "connection ended");
                            }
                        }
                        Err(e) => tracing::warn!(%remote, error = %e, "TLS handshake failed"),
                    }
                });
            }
            _ = cancel.cancelled() => return Ok(()),
        }
    }
}

async fn handle_connection(
    stream: tokio_rustls::server::TlsStream<tokio::net::TcpStream>,
    dap: Arc<Dap>,
    dap_channel: Arc<VerifierClient>,
    pi_attest_channel: Arc<VerifierClient>,
    attestation_timeout: Duration,
) -> Result<(), Box<dyn std::error::Error>> {
    let (read_half, mut write_half) = tokio::io::split(stream);
    let mut reader = tokio::io::BufReader::new(read_half);

    loop {
        let Some(message): Option<serde_json::Value> = read_message(&mut reader).await? else {
            return Ok(());
        };
        if message.get("close").is_some() {
            return Ok(());
        }

        let route = message.get("route").and_then(serde_json::Value::as_str).map(str::to_string);

        if route.as_deref() == Some(ROUTE_EVIDENCE) {
            let req: EvidenceRequest = serde_json::from_value(message)?;
            match handle_evidence_request(&dap, &dap_channel, &req).await {
                Ok(response) => write_message(&mut write_half, &response).await?,
                Err(e) => write_message(&mut write_half, &ErrorReply::new(e.kind())).await?,
            }
            continue;
        }

        let Some(route) = route else {
            write_message(&mut write_half, &ErrorReply::new("protocol_error")).await?;
            return Ok(());
        };
        if !dap.whitelisted(&route) {
            write_message(&mut write_half, &ErrorReply::new("protocol_error")).await?;
            return Ok(());
        }

        let req: QueryRequest = serde_json::from_value(message)?;
        match handle_query(&dap, &dap_channel, &pi_attest_channel, req, &mut reader, &mut write_half, attestation_timeout).await {
            Ok(response) => write_message(&mut write_half, &response).await?,
            Err(e) => write_message(&mut write_half, &ErrorReply::new(e.kind())).await?,
        }
    }
}

/// `handle_evidence_request` (§4.2): proves the DAP's own identity under the
/// caller-supplied nonce and emits a fresh reverse nonce for the caller's own
/// claims. The reverse nonce must itself come from the Verifier, since only
/// nonces recorded in the Verifier's pending map can later be consumed in an
/// attestation request (§3 "pending-nonces mapping").
async fn handle_evidence_request(
    dap: &Dap,
    dap_channel: &VerifierClient,
    req: &EvidenceRequest,
) -> Result<EvidenceResponse, GatewayError> {
    let query_name = req
        .query_name
        .as_deref()
        .ok_or_else(|| GatewayError::Protocol("evidence request missing query_name".into()))?;
    let (source_code_claim, loaded_pipeline_claim) = dap.evidence_claims(&req.nonce, query_name)?;
    let fresh_nonce = dap_channel.request_nonce().await?;
    Ok(EvidenceResponse {
        source_code_claim,
        loaded_pipeline_claim,
        received_nonce: req.nonce,
        requested_nonce: Some(fresh_nonce),
    })
}

/// `handle_query` (§4.2 steps 1-8).
async fn handle_query(
    dap: &Dap,
    dap_channel: &VerifierClient,
    pi_attest_channel: &VerifierClient,
    req: QueryRequest,
    reader: &mut (impl tokio::io::AsyncBufRead + Unpin),
    writer: &mut (impl tokio::io::AsyncWrite + Unpin),
    attestation_timeout: Duration,
) -> Result<QueryResponse, GatewayError> {
    if !req.is_well_formed() {
        return Err(GatewayError::Protocol("malformed query request".into()));
    }

    // Step 2: a caller that already carries its own evidence is attested
    // up front — no reactive round trip is needed even if the release
    // policy would otherwise yield the sentinel.
    let pre_attested = match &req.peer_evidence {
        Some(pe) => {
            pi_attest_channel
                .request_attestation(
                    pe.source_code_claim.clone(),
                    pe.loaded_pipeline_claim.clone(),
                    pe.nonce,
                    pe.query_name.clone(),
                )
                .await?;
            true
        }
        None => false,
    };

    // Step 3-4: authenticate the end user and validate caller-supplied params.
    let authed = dap.authenticate(&req.username, &req.password)?;
    let now = UnixTimestamp::try_now().map_err(|e| GatewayError::Protocol(e.to_string()))?;
    let mut params = parse_inbound_params(&req.params, now)?;
    insert_identity_params(&mut params, authed.user_id, now);
    set_attestation_param(&mut params, pre_attested, now);

    // Steps 5-6: bind and execute.
    let mut result = dap.execute(&req.route, &params, now)?;

    // Step 7: reactive attestation of the caller if the release policy asks for it.
    if !pre_attested && contains_sentinel(&result) {
        attest_caller_reactively(dap_channel, pi_attest_channel, &req.route, reader, writer, attestation_timeout).await?;
        set_attestation_param(&mut params, true, now);
        result = dap.execute(&req.route, &params, now)?;
    }

    // Step 8: sign and return.
    let signed = dap.sign(serde_json::Value::Array(result));
    let response = signed.to_opaque().map_err(GatewayError::attestation)?;
    Ok(QueryResponse { response })
}

fn insert_identity_params(params: &mut gateway_types::params::Params, user_id: ObjectId, now: UnixTimestamp) {
    let value = gateway_types::params::validate_param(
        "user_id",
        &serde_json::Value::String(user_id.to_string()),
        now,
    )
    .expect("user_id from an authenticated record always validates");
    params.insert("user_id".to_string(), value);
}

fn set_attestation_param(params: &mut gateway_types::params::Params, attested: bool, now: UnixTimestamp) {
    let value = gateway_types::params::validate_param("attestation", &serde_json::Value::Bool(attested), now)
        .expect("a bool always validates as `attestation`");
    params.insert("attestation".to_string(), value);
}

/// Attempts to mutually attest a caller that did not present evidence up
/// front (§2 control-flow steps 3-6, run in reverse over the already-open
/// channel). A genuine plain Client never answers the evidence request this
/// sends, so this necessarily times out for it (§8 "External without PI").
async fn attest_caller_reactively(
    dap_channel: &VerifierClient,
    pi_attest_channel: &VerifierClient,
    route: &str,
    reader: &mut (impl tokio::io::AsyncBufRead + Unpin),
    writer: &mut (impl tokio::io::AsyncWrite + Unpin),
    attestation_timeout: Duration,
) -> Result<(), GatewayError> {
    let nonce = dap_channel.request_nonce().await?;
    write_message(writer, &EvidenceRequest::new(nonce, Some(route.to_string())))
        .await
        .map_err(|e| GatewayError::Protocol(e.to_string()))?;

    let response: PeerEvidence = tokio::time::timeout(attestation_timeout, read_message::<EvidenceResponse>(reader))
        .await
        .map_err(|_| GatewayError::Attestation("caller did not respond to evidence request in time".into()))?
        .map_err(|e| GatewayError::Protocol(e.to_string()))?
        .map(|evidence_response| PeerEvidence {
            source_code_claim: evidence_response.source_code_claim,
            loaded_pipeline_claim: evidence_response.loaded_pipeline_claim,
            nonce: evidence_response.received_nonce,
            query_name: route.to_string(),
        })
        .ok_or_else(|| GatewayError::Attestation("caller closed the channel before responding".into()))?;

    if response.nonce != nonce {
        return Err(GatewayError::Attestation("caller's evidence was computed under the wrong nonce".into()));
    }

    pi_attest_channel
        .request_attestation(response.source_code_claim, response.loaded_pipeline_claim, nonce, response.query_name)
        .await?;
    Ok(())
}
