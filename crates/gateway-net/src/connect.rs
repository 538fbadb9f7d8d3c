//! Bounded connect-with-retry to a peer channel (§5 "every connection is
//! opened with a retry/backoff bounded by ~30 attempts").

use rustls::pki_types::ServerName;
use rustls::ClientConfig;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;
use tokio_rustls::TlsConnector;

pub const MAX_CONNECT_ATTEMPTS: u32 = 30;
const RETRY_DELAY: Duration = Duration::from_millis(500);

#[derive(Debug, thiserror::Error)]
pub enum ConnectError {
    #[error("failed to connect to {addr} after {attempts} attempts: {source}")]
    Exhausted {
        addr: SocketAddr,
        attempts: u32,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid server name {0}")]
    InvalidServerName(String),
    #[error("TLS handshake failed: {0}")]
    Tls(#[from] std::io::Error),
}

/// Opens a mutually-authenticated TLS channel to `addr`, retrying the
/// underlying TCP connect up to [`MAX_CONNECT_ATTEMPTS`] times with a fixed
/// backoff before giving up (§5 resource discipline).
pub async fn connect_with_retry(
    addr: SocketAddr,
    server_name: &str,
    tls_config: Arc<ClientConfig>,
) -> Result<TlsStream<TcpStream>, ConnectError> {
    let name = ServerName::try_from(server_name.to_string())
        .map_err(|_| ConnectError::InvalidServerName(server_name.to_string()))?;

    let mut last_err = None;
    for attempt in 1..=MAX_CONNECT_ATTEMPTS {
        match TcpStream::connect(addr).await {
            Ok(tcp) => {
                let connector = TlsConnector::from(tls_config);
                return Ok(connector.connect(name, tcp).await?);
            }
            Err(e) => {
                tracing::debug!(attempt, %addr, "connect attempt failed");
                last_err = Some(e);
                tokio::time::sleep(RETRY_DELAY).await;
            }
        }
    }
    Err(ConnectError::Exhausted {
        addr,
        attempts: MAX_CONNECT_ATTEMPTS,
        source: last_err.expect("loop runs at least once"),
    })
}
