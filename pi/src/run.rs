//! PI accept loop and per-connection protocol state machine (§4.3).

use crate::config::Config;
use crate::core::Pi;
use crate::dap_client::{DapClient, DapResult};
use crate::keys::{load_signing_key, parse_verifying_key};
use crate::verifier_client::VerifierClient;
use dotenvy::dotenv;
use gateway_net::{client_config, read_message, server_config, write_message, Shutdown, TlsIdentity};
use gateway_store::seed::{build_pi_store, ROUTE_IS_BP_ABOVE_MEAN};
use gateway_types::envelope::{ErrorReply, QueryRequest, QueryResponse};
use gateway_types::GatewayError;
use serde_json::Value;
use std::sync::Arc;
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
    let dap_verifying_key = parse_verifying_key(&config.dap_verifying_key)?;
    let (store, registry) = build_pi_store();
    let pi = Arc::new(Pi::new(Arc::new(store), registry, signing_key));

    let identity = TlsIdentity {
        cert_path: config.tls.cert_path.clone(),
        key_path: config.tls.key_path.clone(),
        ca_path: config.tls.ca_path.clone(),
    };
    let server_tls = Arc::new(server_config(&identity)?);
    let acceptor = TlsAcceptor::from(server_tls);
    let client_tls = Arc::new(client_config(&identity)?);

    let own_nonce_channel = Arc::new(VerifierClient::new(
        config.verifier_pi_addr,
        config.verifier_server_name.clone(),
        client_tls.clone(),
        verifier_verifying_key,
    ));
    let dap_attest_channel = Arc::new(VerifierClient::new(
        config.verifier_dap_addr,
        config.verifier_server_name.clone(),
        client_tls.clone(),
        verifier_verifying_key,
    ));
    let dap_client = Arc::new(DapClient::new(
        config.dap_addr,
        config.dap_server_name.clone(),
        client_tls,
        dap_verifying_key,
    ));

    let shutdown = Shutdown::try_new()?;
    let cancel = shutdown.cancellation_token();

    tracing::info!(bind_addr = %config.bind_addr, "pi listening");
    let listener = TcpListener::bind(config.bind_addr).await?;

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (tcp, remote) = accepted?;
                let acceptor = acceptor.clone();
                let pi = pi.clone();
                let own_nonce_channel = own_nonce_channel.clone();
                let dap_attest_channel = dap_attest_channel.clone();
                let dap_client = dap_client.clone();
                tokio::spawn(async move {
                    match acceptor.accept(tcp).await {
                        Ok(stream) => {
                            if let Err(e) = handle_connection(stream, pi, own_nonce_channel, dap_attest_channel, dap_client).await {
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
    pi: Arc<Pi>,
    own_nonce_channel: Arc<VerifierClient>,
    dap_attest_channel: Arc<VerifierClient>,
    dap_client: Arc<DapClient>,
) -> Result<(), Box<dyn std::error::Error>> {
    let (read_half, mut write_half) = tokio::io::split(stream);
    let mut reader = tokio::io::BufReader::new(read_half);

    loop {
        let Some(message): Option<Value> = read_message(&mut reader).await? else {
            return Ok(());
        };
        if message.get("close").is_some() {
            return Ok(());
        }

        let req: QueryRequest = match serde_json::from_value(message) {
            Ok(req) => req,
            Err(_) => {
                write_message(&mut write_half, &ErrorReply::new("protocol_error")).await?;
                return Ok(());
            }
        };

        let result = handle_query(&pi, &own_nonce_channel, &dap_attest_channel, &dap_client, req).await;
        match result {
            Ok(response) => write_message(&mut write_half, &response).await?,
            Err(e) => write_message(&mut write_half, &ErrorReply::new(e.kind())).await?,
        }
    }
}

/// Dispatches a Client's query (§4.3): `is_bp_above_mean` is the PI's own
/// follow-up, computed from a reading it first obtains from the DAP; every
/// other route is a plain relay of whatever the DAP returns, unmodified.
async fn handle_query(
    pi: &Pi,
    own_nonce_channel: &VerifierClient,
    dap_attest_channel: &VerifierClient,
    dap_client: &DapClient,
    req: QueryRequest,
) -> Result<QueryResponse, GatewayError> {
    if !req.is_well_formed() {
        return Err(GatewayError::Protocol("malformed query request".into()));
    }

    if req.route == ROUTE_IS_BP_ABOVE_MEAN {
        handle_follow_up(pi, own_nonce_channel, dap_attest_channel, dap_client, req).await
    } else {
        handle_passthrough(pi, own_nonce_channel, dap_attest_channel, dap_client, req).await
    }
}

async fn handle_passthrough(
    pi: &Pi,
    own_nonce_channel: &VerifierClient,
    dap_attest_channel: &VerifierClient,
    dap_client: &DapClient,
    req: QueryRequest,
) -> Result<QueryResponse, GatewayError> {
    let DapResult { opaque, .. } = dap_client
        .query(pi, own_nonce_channel, dap_attest_channel, &req.route, &req.username, &req.password, req.params)
        .await?;
    Ok(QueryResponse { response: opaque })
}

/// §8 scenario 5: obtains `bp` from the DAP, runs the PI's own approved
/// `is_bp_above_mean` pipeline against it, and signs the result under the
/// PI's own key.
async fn handle_follow_up(
    pi: &Pi,
    own_nonce_channel: &VerifierClient,
    dap_attest_channel: &VerifierClient,
    dap_client: &DapClient,
    req: QueryRequest,
) -> Result<QueryResponse, GatewayError> {
    let dap_result = dap_client
        .query(
            pi,
            own_nonce_channel,
            dap_attest_channel,
            gateway_store::seed::ROUTE_GET_BP,
            &req.username,
            &req.password,
            req.params,
        )
        .await?;
    let input_bp = extract_bp(&dap_result.value)?;

    let now = gateway_types::UnixTimestamp::try_now().map_err(|e| GatewayError::Protocol(e.to_string()))?;
    let result = pi.run_follow_up(ROUTE_IS_BP_ABOVE_MEAN, input_bp, now)?;
    let signed = pi.sign(Value::Array(result));
    let response = signed.to_opaque().map_err(GatewayError::attestation)?;
    Ok(QueryResponse { response })
}

/// Reads the `bp` field out of the DAP's released result. The DAP may
/// instead release `null` (no authorization) or the attestation sentinel,
/// neither of which is a number a follow-up can be computed over.
fn extract_bp(value: &Value) -> Result<f64, GatewayError> {
    value
        .get(0)
        .and_then(|doc| doc.get("bp"))
        .and_then(Value::as_f64)
        .ok_or(GatewayError::Unauthorized)
}
