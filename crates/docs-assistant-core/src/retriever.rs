//! Semantic retrieval: query text → ranked [`SearchResult`]s.
//!
//! The retriever embeds the query once, asks the [`VectorStore`] for the
//! nearest documents, and returns them best-first (ascending cosine
//! distance). It has no side effects and never retries; retry policy
//! belongs to the embedding client.

use std::sync::Arc;

use tracing::debug;

use crate::embedding::EmbeddingProvider;
use crate::error::RagError;
use crate::models::SearchResult;
use crate::store::VectorStore;

/// Upper bound on caller-supplied result limits.
pub const MAX_RESULTS: usize = 10;

/// Reject limits outside `[1, MAX_RESULTS]`. Limits are never clamped.
pub fn validate_limit(limit: usize) -> Result<(), RagError> {
    if !(1..=MAX_RESULTS).contains(&limit) {
        return Err(RagError::Validation(format!(
            "limit must be between 1 and {}, got {}",
            MAX_RESULTS, limit
        )));
    }
    Ok(())
}

/// Embedding provider + vector store, shared across requests.
#[derive(Clone)]
pub struct Retriever {
    embedder: Arc<dyn EmbeddingProvider>,
    store: Arc<dyn VectorStore>,
}

impl Retriever {
    pub fn new(embedder: Arc<dyn EmbeddingProvider>, store: Arc<dyn VectorStore>) -> Self {
        Self { embedder, store }
    }

    pub fn embedder(&self) -> &Arc<dyn EmbeddingProvider> {
        &self.embedder
    }

    /// Return at most `limit` documents nearest to `query`, best first.
    ///
    /// # Errors
    ///
    /// - [`RagError::Validation`] for an empty query or out-of-range limit.
    /// - [`RagError::Retrieval`] when the embedding call or the store fails.
    /// - [`RagError::Configuration`] when the provider returns a vector
    ///   whose length differs from its declared dimension.
    pub async fn retrieve(&self, query: &str, limit: usize) -> Result<Vec<SearchResult>, RagError> {
        if query.trim().is_empty() {
            return Err(RagError::Validation("query must not be empty".into()));
        }
        validate_limit(limit)?;

        let query_vec = self
            .embedder
            .embed(query)
            .await
            .map_err(RagError::Retrieval)?;

        let dims = self.embedder.dims();
        if query_vec.len() != dims {
            return Err(RagError::Configuration(format!(
                "embedding model '{}' returned {} dimensions, expected {}",
                self.embedder.model_name(),
                query_vec.len(),
                dims
            )));
        }

        let rows = self
            .store
            .nearest(&query_vec, limit)
            .await
            .map_err(RagError::Retrieval)?;

        let mut results: Vec<SearchResult> = rows
            .into_iter()
            .map(|(document, distance)| SearchResult { document, distance })
            .collect();

        // Stable, so ties keep the store's order.
        results.sort_by(|a, b| {
            a.distance
                .partial_cmp(&b.distance)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        results.truncate(limit);

        debug!(limit, count = results.len(), "retrieval complete");
        Ok(results)
    }
}
