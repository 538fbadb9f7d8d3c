//! The shared error taxonomy (§7 "Error Handling Design").
//!
//! Every fallible operation in the gateway ultimately produces a
//! [`GatewayError`]. DAP and PI collapse it to a wire-level
//! `{ error: <kind> }` reply via [`GatewayError::kind`] and then close the
//! channel (§7 "Propagation"); the Verifier never serializes `kind` at all —
//! it always answers a failed request with the same generic rejection, so
//! a caller cannot learn which validation step failed (§4.1 "Failure").

use crate::params::ParameterError;

/// Why a nonce lookup failed (§3 invariants, §8 boundary cases).
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum NonceErrorKind {
    #[error("nonce is unknown")]
    Unknown,
    #[error("nonce was already consumed")]
    AlreadyConsumed,
    #[error("nonce has expired")]
    Expired,
}

/// The shared error taxonomy (§7).
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("nonce error: {0}")]
    Nonce(#[from] NonceErrorKind),
    #[error("evidence error: {0}")]
    Evidence(String),
    #[error("attestation error: {0}")]
    Attestation(String),
    #[error("authentication failed")]
    Auth,
    #[error("parameter error: {0}")]
    Parameter(#[from] ParameterError),
    #[error("release denied")]
    Unauthorized,
    #[error("store error: {0}")]
    Store(String),
}

impl GatewayError {
    pub fn evidence(source: impl std::fmt::Display) -> Self {
        GatewayError::Evidence(source.to_string())
    }

    pub fn attestation(source: impl std::fmt::Display) -> Self {
        GatewayError::Attestation(source.to_string())
    }

    pub fn store(source: impl std::fmt::Display) -> Self {
        GatewayError::Store(source.to_string())
    }

    /// The stable, non-sensitive label DAP/PI put in a `{ error: <kind> }`
    /// reply. Never includes the underlying detail string: §7 requires the
    /// *kind* to be observable but not an oracle into internals.
    pub fn kind(&self) -> &'static str {
        match self {
            GatewayError::Protocol(_) => "protocol_error",
            GatewayError::Nonce(_) => "nonce_error",
            GatewayError::Evidence(_) => "evidence_error",
            GatewayError::Attestation(_) => "attestation_error",
            GatewayError::Auth => "auth_error",
            GatewayError::Parameter(_) => "parameter_error",
            GatewayError::Unauthorized => "unauthorized_error",
            GatewayError::Store(_) => "store_error",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_never_echoes_detail() {
        let err = GatewayError::store("disk on fire");
        assert_eq!(err.kind(), "store_error");
        assert!(!err.kind().contains("fire"));
    }
}
