//! Query log persistence.
//!
//! [`SqliteAnalytics`] is the production [`AnalyticsRecorder`]. `record`
//! only enqueues the entry on an unbounded channel; a single writer task
//! drains the channel into `query_logs`. A failed insert is logged and
//! never reaches the request that produced the entry.

use anyhow::Result;
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error};

use docs_assistant_core::analytics::AnalyticsRecorder;
use docs_assistant_core::models::QueryLogEntry;
use docs_assistant_core::RagError;

use crate::app::AppContext;

pub struct SqliteAnalytics {
    tx: mpsc::UnboundedSender<QueryLogEntry>,
}

/// Handle on the background writer task.
///
/// The task exits once every [`SqliteAnalytics`] sender is dropped and the
/// queue is drained.
pub struct AnalyticsWriter {
    handle: JoinHandle<()>,
}

impl SqliteAnalytics {
    /// Start the writer task. Must be called inside a tokio runtime.
    pub fn spawn(pool: SqlitePool) -> (Self, AnalyticsWriter) {
        let (tx, mut rx) = mpsc::unbounded_channel::<QueryLogEntry>();

        let handle = tokio::spawn(async move {
            while let Some(entry) = rx.recv().await {
                if let Err(e) = insert_query_log(&pool, &entry).await {
                    let err = RagError::Persistence(e);
                    error!(error = %err, query = %entry.query, "failed to record query log");
                }
            }
            debug!("analytics writer stopped");
        });

        (Self { tx }, AnalyticsWriter { handle })
    }
}

impl AnalyticsRecorder for SqliteAnalytics {
    fn record(&self, entry: QueryLogEntry) {
        if self.tx.send(entry).is_err() {
            error!("analytics writer is gone; query log dropped");
        }
    }
}

impl AnalyticsWriter {
    /// Wait for queued entries to be written.
    pub async fn join(self) {
        if let Err(e) = self.handle.await {
            error!(error = %e, "analytics writer panicked");
        }
    }
}

pub async fn insert_query_log(pool: &SqlitePool, entry: &QueryLogEntry) -> Result<()> {
    sqlx::query(
        "INSERT INTO query_logs (id, query, response, sources_json, created_at) VALUES (?, ?, ?, ?, ?)",
    )
    .bind(&entry.id)
    .bind(&entry.query)
    .bind(&entry.response)
    .bind(serde_json::to_string(&entry.sources)?)
    .bind(entry.created_at.timestamp())
    .execute(pool)
    .await?;
    Ok(())
}

/// Most recent query log entries, newest first.
pub async fn recent_queries(pool: &SqlitePool, limit: i64) -> Result<Vec<QueryLogEntry>> {
    let rows = sqlx::query(
        "SELECT id, query, response, sources_json, created_at FROM query_logs \
         ORDER BY created_at DESC, rowid DESC LIMIT ?",
    )
    .bind(limit)
    .fetch_all(pool)
    .await?;

    rows.iter()
        .map(|row| {
            let sources_json: String = row.try_get("sources_json")?;
            let created_at: i64 = row.try_get("created_at")?;
            Ok(QueryLogEntry {
                id: row.try_get("id")?,
                query: row.try_get("query")?,
                response: row.try_get("response")?,
                sources: serde_json::from_str(&sources_json).unwrap_or_default(),
                created_at: DateTime::<Utc>::from_timestamp(created_at, 0).unwrap_or_default(),
            })
        })
        .collect()
}

/// CLI entry point for `docs-assistant queries`.
pub async fn run_queries(ctx: &AppContext, limit: i64) -> Result<()> {
    let entries = recent_queries(&ctx.pool, limit).await?;
    if entries.is_empty() {
        println!("No queries recorded yet.");
        return Ok(());
    }

    for entry in entries {
        println!(
            "{}  {}",
            entry.created_at.format("%Y-%m-%d %H:%M:%S"),
            entry.query
        );
        for source in &entry.sources {
            println!("    source: {}", source);
        }
    }
    Ok(())
}
