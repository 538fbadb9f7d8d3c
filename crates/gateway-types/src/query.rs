//! The `Query` document type approved pipelines are made of (§3 "Approved pipeline").
//!
//! A `Query` is a small aggregation pipeline: an ordered list of stage
//! documents, each a JSON object naming one operator (`$match`, `$lookup`,
//! `$addFields`, `$project`, ...). Before binding, leaf strings of the form
//! `$name` are placeholders resolved by the template-binding engine
//! ([`crate::template`]); after binding, the same tree is handed to the
//! store's aggregation evaluator. Representing stages as plain
//! [`serde_json::Value`] (rather than a typed Rust enum) is deliberate: the
//! Verifier's attestation binds the *canonical bytes* of this exact document
//! (§4.1 "Canonicalization rule"), so the wire shape and the attested shape
//! must be the same value, not a round-trip through a richer type that could
//! silently normalize something away.

use serde::{Deserialize, Serialize};

/// A single stage in an aggregation pipeline.
pub type Stage = serde_json::Value;

/// An ordered pipeline of stages, as fetched from the approved-pipeline registry.
pub type Query = Vec<Stage>;

/// A named, Verifier-approved pipeline (§3 "Approved pipeline").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovedPipeline {
    pub name: String,
    pub pipeline: Query,
}

impl ApprovedPipeline {
    pub fn new(name: impl Into<String>, pipeline: Query) -> Self {
        ApprovedPipeline {
            name: name.into(),
            pipeline,
        }
    }
}
