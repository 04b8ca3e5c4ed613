//! Integration tests for SQLite persistence: vector search, document
//! lifecycle, dimension checks, and the query log writer.

use std::sync::Arc;

use docs_assistant::analytics::{recent_queries, SqliteAnalytics};
use docs_assistant::app::AppContext;
use docs_assistant::config::Config;
use docs_assistant::sqlite_store::SqliteStore;
use docs_assistant::{db, documents, migrate, search};
use docs_assistant_core::analytics::AnalyticsRecorder;
use docs_assistant_core::models::{Document, DocumentInput, QueryLogEntry};
use docs_assistant_core::store::VectorStore;
use docs_assistant_core::testing::{HashEmbedder, ScriptedCompletion};
use docs_assistant_core::RagError;
use sqlx::SqlitePool;
use tempfile::TempDir;

fn test_config(tmp: &TempDir) -> Config {
    let config_content = format!(
        r#"
[db]
path = "{}"

[server]
bind = "127.0.0.1:0"
"#,
        tmp.path().join("docs.sqlite").display()
    );
    toml::from_str(&config_content).unwrap()
}

async fn open_store(config: &Config) -> (SqlitePool, SqliteStore) {
    let pool = db::connect(config).await.unwrap();
    migrate::migrate(&pool).await.unwrap();
    (pool.clone(), SqliteStore::new(pool))
}

fn doc(title: &str, body: &str, url: &str) -> Document {
    Document::new(DocumentInput {
        title: title.to_string(),
        body: body.to_string(),
        url: url.to_string(),
        ..Default::default()
    })
}

async fn app_with_hash_embedder(config: &Config) -> AppContext {
    let (ctx, _writer) = AppContext::with_providers(
        config,
        Arc::new(HashEmbedder::new(64)),
        Arc::new(ScriptedCompletion::answering("ok")),
    )
    .await
    .unwrap();
    ctx
}

#[tokio::test]
async fn test_nearest_orders_by_ascending_distance() {
    let tmp = TempDir::new().unwrap();
    let config = test_config(&tmp);
    let (_pool, store) = open_store(&config).await;

    let far = doc("Far", "far", "");
    let near = doc("Near", "near", "");
    let mid = doc("Mid", "mid", "");
    store.insert_document(&far, &[0.0, 1.0], "test").await.unwrap();
    store.insert_document(&near, &[1.0, 0.0], "test").await.unwrap();
    store.insert_document(&mid, &[0.7, 0.7], "test").await.unwrap();

    let rows = store.nearest(&[1.0, 0.0], 10).await.unwrap();
    let titles: Vec<&str> = rows.iter().map(|(d, _)| d.title.as_str()).collect();
    assert_eq!(titles, vec!["Near", "Mid", "Far"]);
    assert!(rows.windows(2).all(|w| w[0].1 <= w[1].1));
    assert!(rows[0].1.abs() < 1e-6);

    let top = store.nearest(&[1.0, 0.0], 2).await.unwrap();
    assert_eq!(top.len(), 2);
}

#[tokio::test]
async fn test_nearest_on_empty_corpus() {
    let tmp = TempDir::new().unwrap();
    let config = test_config(&tmp);
    let (_pool, store) = open_store(&config).await;

    let rows = store.nearest(&[1.0, 0.0, 0.0], 5).await.unwrap();
    assert!(rows.is_empty());
}

#[tokio::test]
async fn test_document_roundtrip_and_listing() {
    let tmp = TempDir::new().unwrap();
    let config = test_config(&tmp);
    let (_pool, store) = open_store(&config).await;

    let mut first = doc("First", "alpha", "https://docs.example.com/first");
    first.tags = ["ops".to_string(), "deploy".to_string()].into_iter().collect();
    first.created_at -= 10;
    let second = doc("Second", "beta", "");
    store.insert_document(&first, &[1.0], "test").await.unwrap();
    store.insert_document(&second, &[1.0], "test").await.unwrap();

    let fetched = store.get_document(&first.id).await.unwrap().unwrap();
    assert_eq!(fetched, first);
    assert!(store.get_document("missing").await.unwrap().is_none());

    let page = store.list_documents(1, 1).await.unwrap();
    assert_eq!(page.total, 2);
    assert_eq!(page.documents.len(), 1);
    assert_eq!(page.documents[0].title, "Second");

    let page = store.list_documents(2, 1).await.unwrap();
    assert_eq!(page.documents[0].title, "First");
}

#[tokio::test]
async fn test_list_documents_rejects_overflowing_page() {
    let tmp = TempDir::new().unwrap();
    let config = test_config(&tmp);
    let ctx = app_with_hash_embedder(&config).await;

    let err = documents::list_documents(&ctx, i64::MAX, 100)
        .await
        .unwrap_err();
    assert!(matches!(
        err.downcast_ref::<RagError>(),
        Some(RagError::Validation(_))
    ));

    // The last page that still fits is an ordinary empty page.
    let page = documents::list_documents(&ctx, i64::MAX / 100, 100)
        .await
        .unwrap();
    assert!(page.documents.is_empty());
}

#[tokio::test]
async fn test_search_context_digest() {
    let tmp = TempDir::new().unwrap();
    let config = test_config(&tmp);
    let ctx = app_with_hash_embedder(&config).await;

    assert_eq!(search::search_context(&ctx, "rollout", None).await.unwrap(), "");

    documents::create_document(
        &ctx,
        DocumentInput {
            title: "Deploy".into(),
            body: "kubernetes rollout guide".into(),
            ..Default::default()
        },
    )
    .await
    .unwrap();

    let digest = search::search_context(&ctx, "kubernetes rollout", Some(1))
        .await
        .unwrap();
    assert_eq!(
        digest,
        "Relevant documentation:\n\nDocument 1: Deploy\nkubernetes rollout guide"
    );
}

#[tokio::test]
async fn test_delete_removes_vector() {
    let tmp = TempDir::new().unwrap();
    let config = test_config(&tmp);
    let (pool, store) = open_store(&config).await;

    let d = doc("Gone", "soon", "");
    store.insert_document(&d, &[1.0, 0.0], "test").await.unwrap();
    assert!(store.delete_document(&d.id).await.unwrap());
    assert!(!store.delete_document(&d.id).await.unwrap());

    let vectors: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM embeddings")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(vectors, 0);
    assert!(store.nearest(&[1.0, 0.0], 5).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_update_with_new_body_recomputes_vector() {
    let tmp = TempDir::new().unwrap();
    let config = test_config(&tmp);
    let ctx = app_with_hash_embedder(&config).await;

    let created = documents::create_document(
        &ctx,
        DocumentInput {
            title: "Deploy".into(),
            body: "kubernetes rollout guide".into(),
            ..Default::default()
        },
    )
    .await
    .unwrap();

    let updated = documents::update_document(
        &ctx,
        &created.id,
        DocumentInput {
            title: "Deploy".into(),
            body: "terraform provisioning notes".into(),
            ..Default::default()
        },
    )
    .await
    .unwrap()
    .unwrap();
    assert_ne!(updated.content_hash, created.content_hash);

    let (count, hash): (i64, String) =
        sqlx::query_as("SELECT COUNT(*), MAX(content_hash) FROM embeddings WHERE document_id = ?")
            .bind(&created.id)
            .fetch_one(&ctx.pool)
            .await
            .unwrap();
    assert_eq!(count, 1);
    assert_eq!(hash, updated.content_hash);

    // The stored vector now matches the new body exactly.
    let query = HashEmbedder::new(64).vector_for("terraform provisioning notes");
    let rows = ctx.store.nearest(&query, 1).await.unwrap();
    assert_eq!(rows[0].0.id, created.id);
    assert!(rows[0].1.abs() < 1e-6);
}

#[tokio::test]
async fn test_update_without_body_change_keeps_vector() {
    let tmp = TempDir::new().unwrap();
    let config = test_config(&tmp);
    let ctx = app_with_hash_embedder(&config).await;

    let input = DocumentInput {
        title: "Old title".into(),
        body: "unchanged body".into(),
        ..Default::default()
    };
    let created = documents::create_document(&ctx, input.clone()).await.unwrap();

    let renamed = DocumentInput {
        title: "New title".into(),
        ..input
    };
    let updated = documents::update_document(&ctx, &created.id, renamed)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(updated.title, "New title");
    assert_eq!(updated.content_hash, created.content_hash);

    let hash: String = sqlx::query_scalar("SELECT content_hash FROM embeddings WHERE document_id = ?")
        .bind(&created.id)
        .fetch_one(&ctx.pool)
        .await
        .unwrap();
    assert_eq!(hash, created.content_hash);
}

#[tokio::test]
async fn test_update_missing_document() {
    let tmp = TempDir::new().unwrap();
    let config = test_config(&tmp);
    let ctx = app_with_hash_embedder(&config).await;

    let result = documents::update_document(
        &ctx,
        "missing",
        DocumentInput {
            title: "t".into(),
            body: "b".into(),
            ..Default::default()
        },
    )
    .await
    .unwrap();
    assert!(result.is_none());
}

#[tokio::test]
async fn test_invalid_document_input_is_validation_error() {
    let tmp = TempDir::new().unwrap();
    let config = test_config(&tmp);
    let ctx = app_with_hash_embedder(&config).await;

    let err = documents::create_document(
        &ctx,
        DocumentInput {
            title: "".into(),
            body: "b".into(),
            ..Default::default()
        },
    )
    .await
    .unwrap_err();
    assert!(matches!(
        err.downcast_ref::<RagError>(),
        Some(RagError::Validation(_))
    ));
}

#[tokio::test]
async fn test_startup_rejects_mismatched_stored_dimensions() {
    let tmp = TempDir::new().unwrap();
    let config = test_config(&tmp);
    {
        let (pool, store) = open_store(&config).await;
        store
            .insert_document(&doc("Old", "old", ""), &[1.0, 0.0, 0.0, 0.0], "old-model")
            .await
            .unwrap();
        pool.close().await;
    }

    let result = AppContext::with_providers(
        &config,
        Arc::new(HashEmbedder::new(8)),
        Arc::new(ScriptedCompletion::answering("ok")),
    )
    .await;
    let err = match result {
        Ok(_) => panic!("expected a configuration error"),
        Err(e) => e,
    };
    assert!(matches!(
        err.downcast_ref::<RagError>(),
        Some(RagError::Configuration(_))
    ));

    // Matching dimension starts fine.
    assert!(AppContext::with_providers(
        &config,
        Arc::new(HashEmbedder::new(4)),
        Arc::new(ScriptedCompletion::answering("ok")),
    )
    .await
    .is_ok());
}

#[tokio::test]
async fn test_query_log_writer_persists_entries() {
    let tmp = TempDir::new().unwrap();
    let config = test_config(&tmp);
    let (pool, _store) = open_store(&config).await;

    let (recorder, writer) = SqliteAnalytics::spawn(pool.clone());
    recorder.record(QueryLogEntry::new("first", "a", vec![]));
    recorder.record(QueryLogEntry::new(
        "second",
        "b",
        vec!["https://docs.example.com/x".into()],
    ));
    drop(recorder);
    writer.join().await;

    let entries = recent_queries(&pool, 10).await.unwrap();
    let queries: Vec<&str> = entries.iter().map(|e| e.query.as_str()).collect();
    assert_eq!(queries, vec!["second", "first"]);
    assert_eq!(entries[0].sources, vec!["https://docs.example.com/x"]);

    let limited = recent_queries(&pool, 1).await.unwrap();
    assert_eq!(limited.len(), 1);
}

#[tokio::test]
async fn test_migrations_are_idempotent() {
    let tmp = TempDir::new().unwrap();
    let config = test_config(&tmp);
    migrate::run_migrations(&config).await.unwrap();
    migrate::run_migrations(&config).await.unwrap();
}
