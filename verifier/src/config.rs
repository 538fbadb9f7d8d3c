//! Verifier configuration (§10.2).

use clap::Parser;
use serde::Deserialize;
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

#[derive(Parser, Debug)]
#[command(name = "verifier")]
#[command(about = "Root of trust for the confidential data-access gateway")]
struct CliArgs {
    /// Path to the JSON configuration file
    #[arg(long, short, env = "CONFIG", default_value = "verifier.config.json")]
    config: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TlsPaths {
    pub cert_path: PathBuf,
    pub key_path: PathBuf,
    pub ca_path: PathBuf,
}

/// Server configuration (§10.2: bind address, TLS paths, nonce window,
/// signing key path).
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Address the DAP connects to for nonce/attestation requests.
    pub bind_for_dap: SocketAddr,
    /// Address the PI connects to for nonce/attestation requests.
    pub bind_for_pi: SocketAddr,
    pub tls: TlsPaths,
    #[serde(default = "config_defaults::default_nonce_window_secs")]
    pub nonce_window_secs: u64,
    pub signing_key_path: PathBuf,
    /// Hex-encoded Ed25519 public key of the DAP.
    pub dap_verifying_key: String,
    /// Hex-encoded Ed25519 public key of the PI.
    pub pi_verifying_key: String,
    #[serde(default = "config_defaults::default_log_level")]
    pub log_level: String,
}

mod config_defaults {
    use std::env;

    pub fn default_nonce_window_secs() -> u64 {
        env::var("NONCE_WINDOW_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(300)
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
