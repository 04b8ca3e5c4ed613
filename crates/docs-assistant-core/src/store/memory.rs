//! In-memory [`VectorStore`] implementation for tests and embedding hosts.
//!
//! Uses a `Vec` behind `std::sync::RwLock` for thread safety. Search is a
//! brute-force cosine distance scan over all stored vectors.

use std::sync::RwLock;

use anyhow::Result;
use async_trait::async_trait;

use crate::embedding::cosine_distance;
use crate::models::Document;

use super::VectorStore;

struct StoredDoc {
    doc: Document,
    vector: Vec<f32>,
}

/// In-memory store for testing.
pub struct InMemoryStore {
    docs: RwLock<Vec<StoredDoc>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            docs: RwLock::new(Vec::new()),
        }
    }

    /// Insert a document with its vector, replacing any previous entry
    /// with the same id.
    pub fn insert(&self, doc: Document, vector: Vec<f32>) {
        let mut docs = self.docs.write().unwrap();
        docs.retain(|sd| sd.doc.id != doc.id);
        docs.push(StoredDoc { doc, vector });
    }

    pub fn len(&self) -> usize {
        self.docs.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl VectorStore for InMemoryStore {
    async fn nearest(&self, query_vec: &[f32], k: usize) -> Result<Vec<(Document, f64)>> {
        let docs = self.docs.read().unwrap();
        let mut rows: Vec<(Document, f64)> = docs
            .iter()
            .map(|sd| (sd.doc.clone(), cosine_distance(query_vec, &sd.vector)))
            .collect();
        rows.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));
        rows.truncate(k);
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::DocumentInput;

    fn doc(title: &str) -> Document {
        Document::new(DocumentInput {
            title: title.to_string(),
            body: format!("{} body", title),
            ..Default::default()
        })
    }

    #[tokio::test]
    async fn test_nearest_ascending_and_bounded() {
        let store = InMemoryStore::new();
        store.insert(doc("far"), vec![-1.0, 0.0]);
        store.insert(doc("near"), vec![1.0, 0.1]);
        store.insert(doc("mid"), vec![0.0, 1.0]);

        let rows = store.nearest(&[1.0, 0.0], 2).await.unwrap();
        let titles: Vec<&str> = rows.iter().map(|(d, _)| d.title.as_str()).collect();
        assert_eq!(titles, vec!["near", "mid"]);
        assert!(rows[0].1 <= rows[1].1);
    }

    #[tokio::test]
    async fn test_insert_replaces_same_id() {
        let store = InMemoryStore::new();
        let d = doc("a");
        store.insert(d.clone(), vec![1.0]);
        store.insert(d, vec![-1.0]);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_empty_store() {
        let store = InMemoryStore::new();
        assert!(store.nearest(&[1.0], 5).await.unwrap().is_empty());
    }
}
