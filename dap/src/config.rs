//! DAP configuration (§10.2).

use clap::Parser;
use serde::Deserialize;
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

#[derive(Parser, Debug)]
#[command(name = "dap")]
#[command(about = "Data-Access Proxy for the confidential data-access gateway")]
struct CliArgs {
    /// Path to the JSON configuration file
    #[arg(long, short, env = "CONFIG", default_value = "dap.config.json")]
    config: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TlsPaths {
    pub cert_path: PathBuf,
    pub key_path: PathBuf,
    pub ca_path: PathBuf,
}

/// DAP server configuration (§10.2: bind address, TLS paths, the Verifier's
/// address and public key, signing key path, attestation-of-caller timeout).
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Address Clients and the PI connect to for evidence/query requests.
    pub bind_addr: SocketAddr,
    /// The Verifier's DAP-facing address, used for this DAP's own nonce
    /// requests (§4.2 step 4's fresh reverse nonce).
    pub verifier_dap_addr: SocketAddr,
    /// The Verifier's PI-facing address. The DAP connects here — not to
    /// `verifier_dap_addr` — when attesting a caller's evidence, since the
    /// Verifier derives which public key to check against from which bound
    /// listener the request arrived on (§4.1 "peer").
    pub verifier_pi_addr: SocketAddr,
    /// TLS server name the Verifier's certificate is issued for.
    pub verifier_server_name: String,
    pub tls: TlsPaths,
    pub signing_key_path: PathBuf,
    /// Hex-encoded Ed25519 public key of the Verifier.
    pub verifier_verifying_key: String,
    /// How long the DAP waits for a caller to answer a self-initiated
    /// evidence request when attesting a caller post-hoc (§4.2 step 7). A
    /// plain Client never answers this, so scenario 3 (§8) times out here.
    #[serde(default = "config_defaults::default_attestation_timeout_secs")]
    pub attestation_timeout_secs: u64,
    #[serde(default = "config_defaults::default_log_level")]
    pub log_level: String,
}

mod config_defaults {
    use std::env;

    pub fn default_attestation_timeout_secs() -> u64 {
        env::var("ATTESTATION_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(10)
    }

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
