//! Application wiring: database, providers, store, and orchestrator.

use std::sync::Arc;

use anyhow::Result;
use sqlx::SqlitePool;
use tracing::info;

use docs_assistant_core::completion::CompletionProvider;
use docs_assistant_core::embedding::EmbeddingProvider;
use docs_assistant_core::orchestrator::Orchestrator;
use docs_assistant_core::retriever::Retriever;

use crate::analytics::{AnalyticsWriter, SqliteAnalytics};
use crate::config::Config;
use crate::sqlite_store::SqliteStore;
use crate::{completion, db, embedding, migrate};

/// Everything a command or request handler needs.
pub struct AppContext {
    pub config: Arc<Config>,
    pub pool: SqlitePool,
    pub store: Arc<SqliteStore>,
    pub orchestrator: Orchestrator,
}

impl AppContext {
    /// Build providers from config and wire the pipeline.
    pub async fn build(config: &Config) -> Result<(Self, AnalyticsWriter)> {
        let embedder = embedding::create_embedder(&config.embedding)?;
        let completion = completion::create_completion(&config.completion)?;
        Self::with_providers(config, embedder, completion).await
    }

    /// Wire the pipeline around caller-supplied providers.
    ///
    /// Runs migrations, then refuses to start if stored vectors disagree
    /// with the embedder's dimension.
    pub async fn with_providers(
        config: &Config,
        embedder: Arc<dyn EmbeddingProvider>,
        completion: Arc<dyn CompletionProvider>,
    ) -> Result<(Self, AnalyticsWriter)> {
        let pool = db::connect(config).await?;
        migrate::migrate(&pool).await?;

        let store = Arc::new(SqliteStore::new(pool.clone()));
        if embedder.dims() > 0 {
            store.verify_dimensions(embedder.dims()).await?;
        }

        info!(
            embedding_model = embedder.model_name(),
            dims = embedder.dims(),
            completion_model = completion.model_name(),
            "pipeline ready"
        );

        let (analytics, writer) = SqliteAnalytics::spawn(pool.clone());
        let orchestrator = Orchestrator::new(
            Retriever::new(embedder, store.clone()),
            completion,
            Arc::new(analytics),
            config.orchestrator_settings(),
        );

        let ctx = Self {
            config: Arc::new(config.clone()),
            pool,
            store,
            orchestrator,
        };
        Ok((ctx, writer))
    }

    pub fn embedder(&self) -> &Arc<dyn EmbeddingProvider> {
        self.orchestrator.retriever().embedder()
    }
}
