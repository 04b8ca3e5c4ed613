//! `docs-assistant search`: semantic search from the command line.

use anyhow::Result;

use docs_assistant_core::context::{format_context_for_llm, truncate_chars};

use crate::app::AppContext;

/// The documentation digest an LLM prompt would receive for `query`.
pub async fn search_context(ctx: &AppContext, query: &str, limit: Option<usize>) -> Result<String> {
    let limit = limit.unwrap_or(ctx.config.retrieval.default_limit);
    let results = ctx.orchestrator.search(query, limit).await?;
    Ok(format_context_for_llm(&results))
}

pub async fn run_search(
    ctx: &AppContext,
    query: &str,
    limit: Option<usize>,
    show_context: bool,
) -> Result<()> {
    if show_context {
        let context = search_context(ctx, query, limit).await?;
        if context.is_empty() {
            println!("No results.");
        } else {
            println!("{}", context);
        }
        return Ok(());
    }

    let limit = limit.unwrap_or(ctx.config.retrieval.default_limit);
    let results = ctx.orchestrator.search(query, limit).await?;

    if results.is_empty() {
        println!("No results.");
        return Ok(());
    }

    for (i, result) in results.iter().enumerate() {
        let doc = &result.document;
        let date = chrono::DateTime::from_timestamp(doc.updated_at, 0)
            .map(|dt| dt.format("%Y-%m-%d").to_string())
            .unwrap_or_default();

        println!("{}. [{:.3}] {}", i + 1, result.distance, doc.title);
        println!("    updated: {}", date);
        if !doc.url.is_empty() {
            println!("    url: {}", doc.url);
        }
        println!(
            "    excerpt: \"{}\"",
            truncate_chars(&doc.body, 160).replace('\n', " ").trim()
        );
        println!("    id: {}", doc.id);
        println!();
    }

    Ok(())
}
