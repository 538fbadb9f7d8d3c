//! Canonical source-byte images for the attested components (§9
//! "Source-of-own-code introspection ... replaced by a build-time step that
//! embeds a canonical byte image of the component's source or binary as a
//! constant; the Verifier knows the same image").
//!
//! Both the attested binary and the Verifier import this module, so the two
//! sides of a source-code claim are checked against a single constant
//! rather than two copies that could drift apart.

/// Which attested component a source-code claim is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Peer {
    Dap,
    Pi,
}

impl Peer {
    pub fn source_image(&self) -> &'static [u8] {
        match self {
            Peer::Dap => DAP_SOURCE_IMAGE,
            Peer::Pi => PI_SOURCE_IMAGE,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Peer::Dap => "dap",
            Peer::Pi => "pi",
        }
    }
}

/// The DAP's canonical source image. In a real enclave deployment this would
/// be produced by a reproducible build step over the DAP's own source tree;
/// here it stands in as the fixed byte string both the DAP and the Verifier
/// hash the issued nonce against.
pub const DAP_SOURCE_IMAGE: &[u8] = b"gateway-dap/v1";

/// The PI's canonical source image, analogous to [`DAP_SOURCE_IMAGE`].
pub const PI_SOURCE_IMAGE: &[u8] = b"gateway-pi/v1";
