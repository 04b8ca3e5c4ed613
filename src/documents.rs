//! Document management: create, update, delete, and browse the corpus.
//!
//! Shared by the `docs-assistant docs` CLI commands and the
//! `/api/documents` HTTP endpoints. Creating a document embeds its body;
//! updating re-embeds only when the body changed.

use anyhow::{Context, Result};
use tracing::info;

use docs_assistant_core::models::{Document, DocumentInput};
use docs_assistant_core::RagError;

use crate::app::AppContext;
use crate::sqlite_store::DocumentPage;

/// Largest page size accepted by [`list_documents`].
pub const MAX_PAGE_SIZE: i64 = 100;

/// Embed `text` and check the vector against the embedder's dimension.
async fn embed_body(ctx: &AppContext, text: &str) -> Result<Vec<f32>> {
    let embedder = ctx.embedder();
    let vector = embedder
        .embed(text)
        .await
        .context("Failed to generate embedding")?;

    if vector.len() != embedder.dims() {
        return Err(RagError::Configuration(format!(
            "embedding model '{}' returned {} dimensions, expected {}",
            embedder.model_name(),
            vector.len(),
            embedder.dims()
        ))
        .into());
    }
    Ok(vector)
}

pub async fn create_document(ctx: &AppContext, input: DocumentInput) -> Result<Document> {
    input.validate()?;
    let doc = Document::new(input);
    let vector = embed_body(ctx, &doc.body).await?;

    ctx.store
        .insert_document(&doc, &vector, ctx.embedder().model_name())
        .await?;

    info!(id = %doc.id, title = %doc.title, "document created");
    Ok(doc)
}

/// Replace a document's fields. Returns `None` if it doesn't exist.
pub async fn update_document(
    ctx: &AppContext,
    id: &str,
    input: DocumentInput,
) -> Result<Option<Document>> {
    input.validate()?;
    let Some(mut doc) = ctx.store.get_document(id).await? else {
        return Ok(None);
    };

    let body_changed = doc.apply(input);
    let vector = if body_changed {
        Some(embed_body(ctx, &doc.body).await?)
    } else {
        None
    };

    if !ctx
        .store
        .update_document(&doc, vector.as_deref(), ctx.embedder().model_name())
        .await?
    {
        return Ok(None);
    }

    info!(id = %doc.id, reembedded = body_changed, "document updated");
    Ok(Some(doc))
}

pub async fn delete_document(ctx: &AppContext, id: &str) -> Result<bool> {
    let deleted = ctx.store.delete_document(id).await?;
    if deleted {
        info!(id, "document deleted");
    }
    Ok(deleted)
}

pub async fn get_document(ctx: &AppContext, id: &str) -> Result<Option<Document>> {
    ctx.store.get_document(id).await
}

/// One page of documents. `page` is 1-based; `limit` is in `[1, 100]`.
pub async fn list_documents(ctx: &AppContext, page: i64, limit: i64) -> Result<DocumentPage> {
    if page < 1 {
        return Err(RagError::Validation("page must be >= 1".into()).into());
    }
    if !(1..=MAX_PAGE_SIZE).contains(&limit) {
        return Err(
            RagError::Validation(format!("limit must be in [1, {}]", MAX_PAGE_SIZE)).into(),
        );
    }
    ctx.store.list_documents(page, limit).await
}

// ============ CLI ============

pub async fn run_add(ctx: &AppContext, input: DocumentInput) -> Result<()> {
    let doc = create_document(ctx, input).await?;
    println!("Added document {} ({})", doc.id, doc.title);
    Ok(())
}

pub async fn run_list(ctx: &AppContext, page: i64, limit: i64) -> Result<()> {
    let page = list_documents(ctx, page, limit).await?;
    if page.documents.is_empty() {
        println!("No documents.");
        return Ok(());
    }

    for doc in &page.documents {
        let category = if doc.category.is_empty() {
            String::new()
        } else {
            format!(" [{}]", doc.category)
        };
        println!("{}  {}{}", doc.id, doc.title, category);
    }
    println!(
        "\npage {} ({} of {} documents)",
        page.page,
        page.documents.len(),
        page.total
    );
    Ok(())
}

pub async fn run_get(ctx: &AppContext, id: &str) -> Result<()> {
    let Some(doc) = get_document(ctx, id).await? else {
        anyhow::bail!("document not found: {}", id);
    };

    println!("--- Document ---");
    println!("id:       {}", doc.id);
    println!("title:    {}", doc.title);
    if !doc.url.is_empty() {
        println!("url:      {}", doc.url);
    }
    if !doc.category.is_empty() {
        println!("category: {}", doc.category);
    }
    if !doc.tags.is_empty() {
        let tags: Vec<&str> = doc.tags.iter().map(String::as_str).collect();
        println!("tags:     {}", tags.join(", "));
    }
    println!();
    println!("{}", doc.body);
    Ok(())
}

pub async fn run_delete(ctx: &AppContext, id: &str) -> Result<()> {
    if !delete_document(ctx, id).await? {
        anyhow::bail!("document not found: {}", id);
    }
    println!("Deleted document {}", id);
    Ok(())
}
