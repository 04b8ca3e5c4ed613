//! # Docs Assistant Core
//!
//! Runtime-agnostic logic for Docs Assistant: data models, the error
//! taxonomy, collaborator traits, the retriever, context assembly, and the
//! query orchestrator that drives retrieval-augmented generation.
//!
//! This crate contains no tokio, sqlx, HTTP clients, or other I/O. Concrete
//! providers and stores live in the `docs-assistant` app crate and are
//! passed in as trait objects.
//!
//! ```text
//! query ──▶ Retriever ──▶ Context Assembler ──▶ Completion Provider ──▶ answer
//!            │    │                                                    │
//!     Embedding  VectorStore                                  Analytics Recorder
//! ```

pub mod analytics;
pub mod completion;
pub mod context;
pub mod embedding;
pub mod error;
pub mod models;
pub mod orchestrator;
pub mod retriever;
pub mod store;
#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use error::RagError;
