//! Shared wire types for the confidential data-access gateway.
//!
//! This crate has no I/O of its own. It defines the vocabulary every other
//! crate in the workspace speaks:
//!
//! - [`util`] — base64 wrapper, object identifiers, Unix timestamps.
//! - [`nonce`] — the single-use nonce type issued by the Verifier.
//! - [`canonical`] — the byte-deterministic encoder attestation binds to.
//! - [`crypto`] — Ed25519 signing/verification and SHA-256 evidence hashing.
//! - [`query`] — the `Query` document type approved pipelines are made of.
//! - [`params`] — the closed parameter schema and validator set (§3, §4.4).
//! - [`template`] — the `$name` placeholder binding engine (§4.4).
//! - [`envelope`] — the wire message shapes exchanged between components (§6).
//! - [`error`] — the shared error taxonomy (§7).
//! - [`identity`] — the canonical source-byte images attested components are hashed against (§9).

pub mod canonical;
pub mod crypto;
pub mod envelope;
pub mod error;
pub mod identity;
pub mod nonce;
pub mod params;
pub mod query;
pub mod template;
pub mod util;

pub use error::GatewayError;
pub use identity::Peer;
pub use nonce::Nonce;
pub use query::Query;
pub use util::b64::Base64Bytes;
pub use util::oid::ObjectId;
pub use util::timestamp::UnixTimestamp;
