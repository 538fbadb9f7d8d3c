//! Mutually-authenticated TLS 1.3 channel configuration (§9 "TLS 1.3 with
//! mutual certificate authentication on every channel").

use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::server::WebPkiClientVerifier;
use rustls::{ClientConfig, RootCertStore, ServerConfig};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

#[derive(Debug, thiserror::Error)]
pub enum TlsConfigError {
    #[error("failed to read {0}: {1}")]
    Read(String, std::io::Error),
    #[error("{0} contains no usable certificates")]
    NoCertificates(String),
    #[error("{0} contains no usable private key")]
    NoPrivateKey(String),
    #[error("rustls rejected the configuration: {0}")]
    Rustls(#[from] rustls::Error),
    #[error("failed to build client certificate verifier: {0}")]
    Verifier(#[from] rustls::server::VerifierBuilderError),
}

/// The certificate, private key, and trust-anchor bundle every gateway
/// channel is configured from (§10.2 "paths to the TLS certificate/key/CA
/// bundle").
pub struct TlsIdentity {
    pub cert_path: std::path::PathBuf,
    pub key_path: std::path::PathBuf,
    pub ca_path: std::path::PathBuf,
}

fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>, TlsConfigError> {
    let file = File::open(path).map_err(|e| TlsConfigError::Read(path.display().to_string(), e))?;
    let certs = rustls_pemfile::certs(&mut BufReader::new(file))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| TlsConfigError::Read(path.display().to_string(), e))?;
    if certs.is_empty() {
        return Err(TlsConfigError::NoCertificates(path.display().to_string()));
    }
    Ok(certs)
}

fn load_private_key(path: &Path) -> Result<PrivateKeyDer<'static>, TlsConfigError> {
    let file = File::open(path).map_err(|e| TlsConfigError::Read(path.display().to_string(), e))?;
    rustls_pemfile::private_key(&mut BufReader::new(file))
        .map_err(|e| TlsConfigError::Read(path.display().to_string(), e))?
        .ok_or_else(|| TlsConfigError::NoPrivateKey(path.display().to_string()))
}

fn load_root_store(ca_path: &Path) -> Result<RootCertStore, TlsConfigError> {
    let mut store = RootCertStore::empty();
    for cert in load_certs(ca_path)? {
        store.add(cert).map_err(TlsConfigError::Rustls)?;
    }
    Ok(store)
}

/// Builds a server-side TLS config that requires and verifies a client
/// certificate against `identity.ca_path` (§9).
pub fn server_config(identity: &TlsIdentity) -> Result<ServerConfig, TlsConfigError> {
    let certs = load_certs(&identity.cert_path)?;
    let key = load_private_key(&identity.key_path)?;
    let roots = Arc::new(load_root_store(&identity.ca_path)?);
    let verifier = WebPkiClientVerifier::builder(roots).build()?;
    let config = ServerConfig::builder()
        .with_client_cert_verifier(verifier)
        .with_single_cert(certs, key)?;
    Ok(config)
}

/// Builds a client-side TLS config that presents its own certificate and
/// verifies the peer against `identity.ca_path` (§9).
pub fn client_config(identity: &TlsIdentity) -> Result<ClientConfig, TlsConfigError> {
    let certs = load_certs(&identity.cert_path)?;
    let key = load_private_key(&identity.key_path)?;
    let roots = load_root_store(&identity.ca_path)?;
    let config = ClientConfig::builder()
        .with_root_certificates(roots)
        .with_client_auth_cert(certs, key)
        .map_err(TlsConfigError::Rustls)?;
    Ok(config)
}
