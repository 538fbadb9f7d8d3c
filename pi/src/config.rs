//! PI configuration (§10.2).

use clap::Parser;
use serde::Deserialize;
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

#[derive(Parser, Debug)]
#[command(name = "pi")]
#[command(about = "Personal Intermediary for the confidential data-access gateway")]
struct CliArgs {
    /// Path to the JSON configuration file
    #[arg(long, short, env = "CONFIG", default_value = "pi.config.json")]
    config: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TlsPaths {
    pub cert_path: PathBuf,
    pub key_path: PathBuf,
    pub ca_path: PathBuf,
}

/// PI server configuration (§10.2: bind address, the DAP's address and
/// public key, the Verifier's two addresses and public key, signing key
/// path).
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Address Clients connect to for query requests.
    pub bind_addr: SocketAddr,
    /// Address of the DAP this PI relays queries and follow-ups through.
    pub dap_addr: SocketAddr,
    /// TLS server name the DAP's certificate is issued for.
    pub dap_server_name: String,
    /// Hex-encoded Ed25519 public key of the DAP, used to verify the signed
    /// result a passthrough query or a follow-up's input reading carries.
    pub dap_verifying_key: String,
    /// The Verifier's PI-facing address, used for this PI's own nonce
    /// requests (§2 control-flow step 2).
    pub verifier_pi_addr: SocketAddr,
    /// The Verifier's DAP-facing address. The PI connects here — not to
    /// `verifier_pi_addr` — when attesting the DAP's evidence, mirroring why
    /// the DAP dials the Verifier's PI-facing address to attest a PI caller
    /// (§4.1 "peer" is fixed per bound listener, not carried on the wire).
    pub verifier_dap_addr: SocketAddr,
    /// TLS server name the Verifier's certificate is issued for.
    pub verifier_server_name: String,
    /// Hex-encoded Ed25519 public key of the Verifier.
    pub verifier_verifying_key: String,
    pub tls: TlsPaths,
    pub signing_key_path: PathBuf,
    #[serde(default = "config_defaults::default_log_level")]
    pub log_level: String,
}

mod config_defaults {
    use std::env;

    pub fn default_log_level() -> String {
        env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file at {0}: {1}")]
    FileRead(PathBuf, std::io::Error),
    #[error("failed to parse config file: {0}")]
    JsonParse(#[from] serde_json::Error),
}

impl Config {
    pub fn load() -> Result<Self, ConfigError> {
        let cli_args = CliArgs::parse();
        Self::load_from_path(&cli_args.config)
    }

    fn load_from_path(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|e| ConfigError::FileRead(path.to_path_buf(), e))?;
        Ok(serde_json::from_str(&content)?)
    }
}
