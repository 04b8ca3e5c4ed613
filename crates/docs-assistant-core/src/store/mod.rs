//! Vector store abstraction.
//!
//! The [`VectorStore`] trait is the only storage contract the query
//! pipeline consumes: "k nearest documents to this vector, ascending by
//! distance". Document CRUD and the query log are persistence concerns of
//! the application crate.
//!
//! Implementations must be `Send + Sync` to work with async runtimes.

pub mod memory;

use anyhow::Result;
use async_trait::async_trait;

use crate::models::Document;

/// Nearest-neighbour lookup over stored document vectors.
///
/// # Contract
///
/// - Rows are ordered by ascending cosine distance (best match first).
/// - At most `k` rows are returned.
/// - An empty corpus returns an empty vector, not an error.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Return up to `k` documents closest to `query_vec`, with distances.
    async fn nearest(&self, query_vec: &[f32], k: usize) -> Result<Vec<(Document, f64)>>;
}
