//! The Verifier-controlled registry of approved query templates (§3
//! "Approved pipeline", §4.1 "Recompute expected pipeline hash").
//!
//! A [`PipelineRegistry`] is shared, read-mostly lookup state: Verifier,
//! DAP, and PI each hold one (populated identically at startup in this
//! reference deployment, since template administration is explicitly out of
//! scope — §3 "mutated only via an out-of-band administrative interface").

use gateway_types::canonical::canonical_pipeline;
use gateway_types::query::ApprovedPipeline;
use std::collections::HashMap;

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("unknown query template: {0}")]
    UnknownTemplate(String),
}

pub struct PipelineRegistry {
    templates: HashMap<String, ApprovedPipeline>,
}

impl PipelineRegistry {
    pub fn new() -> Self {
        PipelineRegistry { templates: HashMap::new() }
    }

    pub fn register(&mut self, pipeline: ApprovedPipeline) {
        self.templates.insert(pipeline.name.clone(), pipeline);
    }

    pub fn get(&self, name: &str) -> Result<&ApprovedPipeline, RegistryError> {
        self.templates
            .get(name)
            .ok_or_else(|| RegistryError::UnknownTemplate(name.to_string()))
    }

    /// The canonical string this template's pipeline-claim hash is computed
    /// over (§3 "Canonicalization rule").
    pub fn canonical_bytes(&self, name: &str) -> Result<String, RegistryError> {
        Ok(canonical_pipeline(&self.get(name)?.pipeline))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.templates.keys().map(String::as_str)
    }
}

impl Default for PipelineRegistry {
    fn default() -> Self {
        Self::new()
    }
}
