//! `docs-assistant ask`: one question through the full pipeline.

use std::io::Write;

use anyhow::{bail, Result};
use futures::StreamExt;

use docs_assistant_core::models::ConversationTurn;
use docs_assistant_core::orchestrator::StreamEvent;

use crate::app::AppContext;

pub async fn run_ask(ctx: &AppContext, question: &str, stream: bool) -> Result<()> {
    let turns = vec![ConversationTurn::user(question)];

    if !stream {
        let answer = ctx.orchestrator.chat(turns).await?;
        println!("{}", answer.message);
        print_sources(&answer.sources);
        return Ok(());
    }

    let mut events = ctx.orchestrator.chat_stream(turns).await?;
    let mut stdout = std::io::stdout();
    while let Some(event) = events.next().await {
        match event {
            StreamEvent::Chunk(text) => {
                print!("{}", text);
                stdout.flush()?;
            }
            StreamEvent::Done => {
                println!();
                break;
            }
            StreamEvent::Error(message) => {
                println!();
                bail!("{}", message);
            }
        }
    }
    Ok(())
}

fn print_sources(sources: &[docs_assistant_core::models::SearchResult]) {
    let urls: Vec<&str> = sources
        .iter()
        .map(|s| s.document.url.as_str())
        .filter(|u| !u.is_empty())
        .collect();
    if urls.is_empty() {
        return;
    }
    println!("\nSources:");
    for url in urls {
        println!("  - {}", url);
    }
}
