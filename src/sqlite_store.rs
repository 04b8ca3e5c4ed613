//! SQLite-backed document and vector storage.
//!
//! Documents live in `documents`; each has at most one vector in
//! `embeddings`, stored as a little-endian `f32` BLOB. Nearest-neighbour
//! search is a linear cosine-distance scan in Rust, which is adequate for
//! documentation-sized corpora.

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use docs_assistant_core::embedding::{blob_to_vec, cosine_distance, vec_to_blob};
use docs_assistant_core::models::Document;
use docs_assistant_core::store::VectorStore;
use docs_assistant_core::RagError;

/// One page of documents, newest first.
#[derive(Debug, serde::Serialize)]
pub struct DocumentPage {
    pub documents: Vec<Document>,
    pub total: i64,
    pub page: i64,
    pub limit: i64,
}

pub struct SqliteStore {
    pool: SqlitePool,
}

const DOCUMENT_COLUMNS: &str =
    "d.id, d.title, d.body, d.url, d.category, d.tags_json, d.content_hash, d.created_at, d.updated_at";

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Insert a document together with its vector in one transaction.
    pub async fn insert_document(&self, doc: &Document, vector: &[f32], model: &str) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO documents (id, title, body, url, category, tags_json,
                                   content_hash, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&doc.id)
        .bind(&doc.title)
        .bind(&doc.body)
        .bind(&doc.url)
        .bind(&doc.category)
        .bind(tags_json(doc)?)
        .bind(&doc.content_hash)
        .bind(doc.created_at)
        .bind(doc.updated_at)
        .execute(&mut *tx)
        .await?;

        insert_vector(&mut tx, doc, vector, model).await?;

        tx.commit().await?;
        Ok(())
    }

    /// Persist an edited document.
    ///
    /// When `vector` is `Some`, the old vector is replaced in the same
    /// transaction. Callers must pass a fresh vector whenever the body hash
    /// changed; the stored vector would otherwise describe the old body.
    pub async fn update_document(
        &self,
        doc: &Document,
        vector: Option<&[f32]>,
        model: &str,
    ) -> Result<bool> {
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            r#"
            UPDATE documents
            SET title = ?, body = ?, url = ?, category = ?, tags_json = ?,
                content_hash = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(&doc.title)
        .bind(&doc.body)
        .bind(&doc.url)
        .bind(&doc.category)
        .bind(tags_json(doc)?)
        .bind(&doc.content_hash)
        .bind(doc.updated_at)
        .bind(&doc.id)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            return Ok(false);
        }

        if let Some(vector) = vector {
            sqlx::query("DELETE FROM embeddings WHERE document_id = ?")
                .bind(&doc.id)
                .execute(&mut *tx)
                .await?;
            insert_vector(&mut tx, doc, vector, model).await?;
        }

        tx.commit().await?;
        Ok(true)
    }

    /// Delete a document and its vector. Returns `false` if it didn't exist.
    pub async fn delete_document(&self, id: &str) -> Result<bool> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM embeddings WHERE document_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        let result = sqlx::query("DELETE FROM documents WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn get_document(&self, id: &str) -> Result<Option<Document>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM documents d WHERE d.id = ?",
            DOCUMENT_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| row_to_document(&r)).transpose()
    }

    /// List documents, newest first. `page` is 1-based.
    pub async fn list_documents(&self, page: i64, limit: i64) -> Result<DocumentPage> {
        let offset = page
            .checked_sub(1)
            .and_then(|p| p.checked_mul(limit))
            .filter(|o| *o >= 0)
            .ok_or_else(|| RagError::Validation(format!("page {} is out of range", page)))?;

        let rows = sqlx::query(&format!(
            "SELECT {} FROM documents d ORDER BY d.created_at DESC, d.id LIMIT ? OFFSET ?",
            DOCUMENT_COLUMNS
        ))
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM documents")
            .fetch_one(&self.pool)
            .await?;

        let documents = rows
            .iter()
            .map(row_to_document)
            .collect::<Result<Vec<_>>>()?;

        Ok(DocumentPage {
            documents,
            total,
            page,
            limit,
        })
    }

    /// Distinct vector dimensions present in the store.
    pub async fn stored_dimensions(&self) -> Result<Vec<i64>> {
        let dims = sqlx::query_scalar("SELECT DISTINCT dims FROM embeddings ORDER BY dims")
            .fetch_all(&self.pool)
            .await?;
        Ok(dims)
    }

    /// Fail with [`RagError::Configuration`] if any stored vector was
    /// produced with a dimension other than `expected`.
    pub async fn verify_dimensions(&self, expected: usize) -> Result<()> {
        let found: Vec<i64> = self
            .stored_dimensions()
            .await?
            .into_iter()
            .filter(|d| *d != expected as i64)
            .collect();

        if !found.is_empty() {
            return Err(RagError::Configuration(format!(
                "stored vectors have dimension {:?} but the embedding model produces {}; \
                 re-embed the corpus or fix embedding.dims",
                found, expected
            ))
            .into());
        }
        Ok(())
    }
}

async fn insert_vector(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    doc: &Document,
    vector: &[f32],
    model: &str,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO embeddings (document_id, model, dims, content_hash, embedding, created_at)
        VALUES (?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&doc.id)
    .bind(model)
    .bind(vector.len() as i64)
    .bind(&doc.content_hash)
    .bind(vec_to_blob(vector))
    .bind(chrono::Utc::now().timestamp())
    .execute(&mut **tx)
    .await?;
    Ok(())
}

fn tags_json(doc: &Document) -> Result<String> {
    serde_json::to_string(&doc.tags).context("Failed to encode tags")
}

fn row_to_document(row: &SqliteRow) -> Result<Document> {
    let tags_json: String = row.try_get("tags_json")?;
    Ok(Document {
        id: row.try_get("id")?,
        title: row.try_get("title")?,
        body: row.try_get("body")?,
        url: row.try_get("url")?,
        category: row.try_get("category")?,
        tags: serde_json::from_str(&tags_json).unwrap_or_default(),
        content_hash: row.try_get("content_hash")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

#[async_trait]
impl VectorStore for SqliteStore {
    async fn nearest(&self, query_vec: &[f32], k: usize) -> Result<Vec<(Document, f64)>> {
        // Only vectors of the query's dimension are comparable; startup
        // verification keeps any others out of the store.
        let rows = sqlx::query(&format!(
            r#"
            SELECT {}, e.embedding
            FROM embeddings e
            JOIN documents d ON d.id = e.document_id
            WHERE e.dims = ?
            "#,
            DOCUMENT_COLUMNS
        ))
        .bind(query_vec.len() as i64)
        .fetch_all(&self.pool)
        .await?;

        let mut scored = Vec::with_capacity(rows.len());
        for row in &rows {
            let blob: Vec<u8> = row.try_get("embedding")?;
            let distance = cosine_distance(query_vec, &blob_to_vec(&blob));
            scored.push((row_to_document(row)?, distance));
        }

        scored.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(k);
        Ok(scored)
    }
}
