//! Error taxonomy for the query pipeline.
//!
//! Collaborators (stores, HTTP clients) return `anyhow::Result`; the core
//! wraps their failures into the variant that decides how the failure
//! propagates.
//!
//! | Variant | Chat / stream | Direct search |
//! |---------|---------------|---------------|
//! | `Validation` | terminal | terminal |
//! | `Retrieval` | degraded to empty context | terminal |
//! | `Generation` | terminal, no analytics | n/a |
//! | `Persistence` | logged by the recorder only | logged only |
//! | `Configuration` | terminal | terminal |

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RagError {
    /// Bad caller input. Never retried.
    #[error("invalid request: {0}")]
    Validation(String),

    /// Embedding or vector store failure.
    #[error("retrieval failed: {0:#}")]
    Retrieval(#[source] anyhow::Error),

    /// Completion provider failure.
    #[error("generation failed: {0:#}")]
    Generation(#[source] anyhow::Error),

    /// Analytics write failure.
    #[error("persistence failed: {0:#}")]
    Persistence(#[source] anyhow::Error),

    /// Deployment fault such as an embedding dimension mismatch.
    #[error("configuration error: {0}")]
    Configuration(String),
}

impl RagError {
    /// Machine-readable code used in HTTP error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            RagError::Validation(_) => "bad_request",
            RagError::Retrieval(_) => "retrieval_failed",
            RagError::Generation(_) => "generation_failed",
            RagError::Persistence(_) => "persistence_failed",
            RagError::Configuration(_) => "configuration",
        }
    }
}
