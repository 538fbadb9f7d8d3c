//! Verifier accept loops (§4.1, §5 "Verifier serves Client and PI connections
//! in parallel").

use crate::config::Config;
use crate::core::Verifier;
use crate::keys::{load_signing_key, parse_verifying_key};
use dotenvy::dotenv;
use gateway_net::{read_message, write_message, server_config, Shutdown, TlsIdentity};
use gateway_store::seed::build_seed;
use gateway_types::envelope::{
    AttestationRequest, AttestationResponse, ErrorReply, NonceRequest, NonceResponse,
};
use gateway_types::{GatewayError, Peer, UnixTimestamp};
use std::net::SocketAddr;
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
    let dap_verifying_key = parse_verifying_key(&config.dap_verifying_key)?;
    let pi_verifying_key = parse_verifying_key(&config.pi_verifying_key)?;
    let (_, registry, _) = build_seed();

    let verifier = Arc::new(Verifier::new(
        signing_key,
        registry,
        config.nonce_window_secs,
        dap_verifying_key,
        pi_verifying_key,
    ));

    let identity = TlsIdentity {
        cert_path: config.tls.cert_path.clone(),
        key_path: config.tls.key_path.clone(),
        ca_path: config.tls.ca_path.clone(),
    };
    let tls_config = Arc::new(server_config(&identity)?);
    let acceptor = TlsAcceptor::from(tls_config);

    let shutdown = Shutdown::try_new()?;

    let dap_loop = accept_loop(config.bind_for_dap, acceptor.clone(), verifier.clone(), Peer::Dap, shutdown.cancellation_token());
    let pi_loop = accept_loop(config.bind_for_pi, acceptor, verifier, Peer::Pi, shutdown.cancellation_token());

    tracing::info!(dap_addr = %config.bind_for_dap, pi_addr = %config.bind_for_pi, "verifier listening");
    tokio::select! {
        result = dap_loop => result?,
        result = pi_loop => result?,
        _ = shutdown.recv() => {}
    }
    Ok(())
}

async fn accept_loop(
    addr: SocketAddr,
    acceptor: TlsAcceptor,
    verifier: Arc<Verifier>,
    peer: Peer,
    cancel: tokio_util::sync::CancellationToken,
) -> Result<(), Box<dyn std::error::Error>> {
    let listener = TcpListener::bind(addr).await?;
    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (tcp, remote) = accepted?;
                let acceptor = acceptor.clone();
                let verifier = verifier.clone();
                tokio::spawn(async move {
                    match acceptor.accept(tcp).await {
                        Ok(stream) => {
                            if let Err(e) = handle_connection(stream, verifier, peer).await {
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
    verifier: Arc<Verifier>,
    peer: Peer,
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

        let route = message.get("route").and_then(serde_json::Value::as_str);
        match route {
            Some("nonce") => {
                let _: NonceRequest = serde_json::from_value(message)?;
                let now = UnixTimestamp::try_now()?;
                let nonce = verifier.issue_nonce(now);
                tracing::debug!(peer = peer.as_str(), "nonce issued");
                write_message(&mut write_half, &NonceResponse { nonce }).await?;
            }
            Some("attestation") => {
                let req: AttestationRequest = serde_json::from_value(message)?;
                let now = UnixTimestamp::try_now()?;
                match verifier.request_attestation(
                    peer,
                    &req.source_code_claim,
                    &req.loaded_pipeline_claim,
                    req.nonce,
                    &req.query_name,
                    now,
                ) {
                    Ok(signed) => {
                        let attestation = signed.to_opaque().map_err(GatewayError::attestation)?;
                        tracing::debug!(peer = peer.as_str(), "attestation accepted");
                        write_message(&mut write_half, &AttestationResponse { attestation }).await?;
                    }
                    Err(_rejected) => {
                        tracing::warn!(peer = peer.as_str(), "attestation rejected");
                        write_message(&mut write_half, &ErrorReply::new("attestation_error")).await?;
                    }
                }
            }
            _ => {
                write_message(&mut write_half, &ErrorReply::new("protocol_error")).await?;
                return Ok(());
            }
        }
    }
}
