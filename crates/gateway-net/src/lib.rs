//! The mutually-authenticated channel: TLS configuration, line-delimited
//! JSON framing, bounded connect-with-retry, and graceful shutdown (§10.1
//! "`gateway-net`").

pub mod connect;
pub mod framing;
pub mod shutdown;
pub mod tls;

pub use connect::{connect_with_retry, ConnectError, MAX_CONNECT_ATTEMPTS};
pub use framing::{read_message, write_message, NetError};
pub use shutdown::Shutdown;
pub use tls::{client_config, server_config, TlsConfigError, TlsIdentity};
