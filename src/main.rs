//! # Docs Assistant CLI (`docs-assistant`)
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `docs-assistant init` | Create the SQLite database and run schema migrations |
//! | `docs-assistant serve` | Start the HTTP API server |
//! | `docs-assistant search "<query>"` | Semantic search over the corpus |
//! | `docs-assistant ask "<question>"` | Answer a question from the documentation |
//! | `docs-assistant docs add\|list\|get\|delete` | Manage documents |
//! | `docs-assistant queries` | Show recent query log entries |
//!
//! ## Examples
//!
//! ```bash
//! docs-assistant init --config ./config/docs-assistant.toml
//! docs-assistant docs add --title "Deploying" --file docs/deploy.md --url https://docs.example.com/deploy
//! docs-assistant ask "How do I roll back a deploy?" --stream
//! docs-assistant serve
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use docs_assistant::app::AppContext;
use docs_assistant::{analytics, chat, config, documents, migrate, search, server};
use docs_assistant_core::models::DocumentInput;

/// Docs Assistant: retrieval-augmented answers over your documentation.
#[derive(Parser)]
#[command(name = "docs-assistant", version)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/docs-assistant.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema. Safe to run repeatedly.
    Init,

    /// Start the HTTP API server on `[server].bind`.
    Serve,

    /// Semantic search over stored documents.
    Search {
        query: String,

        /// Maximum number of results (1-10). Defaults to `retrieval.default_limit`.
        #[arg(long)]
        limit: Option<usize>,

        /// Print the results as the documentation digest sent to an LLM.
        #[arg(long)]
        context: bool,
    },

    /// Answer a question using the documentation as context.
    Ask {
        question: String,

        /// Print the answer as it is generated.
        #[arg(long)]
        stream: bool,
    },

    /// Manage documents.
    Docs {
        #[command(subcommand)]
        action: DocsAction,
    },

    /// Show the most recent queries.
    Queries {
        #[arg(long, default_value_t = 10)]
        limit: i64,
    },
}

#[derive(Subcommand)]
enum DocsAction {
    /// Add a document and embed it.
    Add {
        #[arg(long)]
        title: String,

        /// Read the body from this file.
        #[arg(long, conflicts_with = "body")]
        file: Option<PathBuf>,

        /// Document body.
        #[arg(long)]
        body: Option<String>,

        #[arg(long, default_value = "")]
        url: String,

        #[arg(long, default_value = "")]
        category: String,

        /// Tag; repeat for several.
        #[arg(long = "tag")]
        tags: Vec<String>,
    },

    /// List documents, newest first.
    List {
        #[arg(long, default_value_t = 1)]
        page: i64,

        #[arg(long, default_value_t = 20)]
        limit: i64,
    },

    /// Print one document.
    Get { id: String },

    /// Delete a document and its vector.
    Delete { id: String },
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new("docs_assistant=info,docs_assistant_core=info,tower_http=info,warn")
    });
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    if let Commands::Init = cli.command {
        migrate::run_migrations(&cfg).await?;
        println!("Database initialized successfully.");
        return Ok(());
    }

    let (ctx, writer) = AppContext::build(&cfg).await?;

    let result = if let Commands::Serve = cli.command {
        server::run_server(Arc::new(ctx)).await
    } else {
        let result = run_command(&ctx, cli.command).await;
        drop(ctx);
        result
    };

    // Every recorder handle is gone now; wait for queued query logs.
    writer.join().await;
    result
}

async fn run_command(ctx: &AppContext, command: Commands) -> Result<()> {
    match command {
        Commands::Search {
            query,
            limit,
            context,
        } => search::run_search(ctx, &query, limit, context).await,
        Commands::Ask { question, stream } => chat::run_ask(ctx, &question, stream).await,
        Commands::Docs { action } => run_docs(ctx, action).await,
        Commands::Queries { limit } => analytics::run_queries(ctx, limit).await,
        Commands::Init | Commands::Serve => Ok(()),
    }
}

async fn run_docs(ctx: &AppContext, action: DocsAction) -> Result<()> {
    match action {
        DocsAction::Add {
            title,
            file,
            body,
            url,
            category,
            tags,
        } => {
            let body = match (file, body) {
                (Some(path), _) => std::fs::read_to_string(&path)
                    .with_context(|| format!("Failed to read {}", path.display()))?,
                (None, Some(body)) => body,
                (None, None) => bail!("one of --file or --body is required"),
            };
            let input = DocumentInput {
                title,
                body,
                url,
                category,
                tags,
            };
            documents::run_add(ctx, input).await
        }
        DocsAction::List { page, limit } => documents::run_list(ctx, page, limit).await,
        DocsAction::Get { id } => documents::run_get(ctx, &id).await,
        DocsAction::Delete { id } => documents::run_delete(ctx, &id).await,
    }
}
