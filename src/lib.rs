//! # Docs Assistant
//!
//! Retrieval-augmented question answering over a documentation corpus.
//!
//! Documents are stored in SQLite together with one embedding vector each.
//! A question is embedded, the nearest documents are assembled into a
//! context block, and a chat completion model answers with that context in
//! front of the conversation. Answers are available as a single response
//! or as a server-sent event stream; every completed interaction is logged.
//!
//! The pipeline itself (retriever, context assembly, orchestrator, provider
//! traits) lives in `docs-assistant-core`. This crate supplies the concrete
//! providers and stores, the HTTP API, and the CLI.
//!
//! ```text
//! ┌──────────┐   ┌──────────────┐   ┌─────────────┐
//! │ CLI/HTTP │──▶│ Orchestrator │──▶│ OpenAI chat │
//! └──────────┘   └──────┬───────┘   └─────────────┘
//!                       │
//!          ┌────────────┼─────────────┐
//!          ▼            ▼             ▼
//!   ┌────────────┐ ┌─────────┐ ┌────────────┐
//!   │ embeddings │ │ SQLite  │ │ query_logs │
//!   └────────────┘ └─────────┘ └────────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |
//! | [`sqlite_store`] | Document and vector storage |
//! | [`embedding`] | OpenAI embeddings client |
//! | [`completion`] | OpenAI chat completions client and SSE parser |
//! | [`analytics`] | Query log writer |
//! | [`app`] | Pipeline wiring |
//! | [`documents`] | Document management |
//! | [`search`] | `search` command |
//! | [`chat`] | `ask` command |
//! | [`server`] | HTTP API |

pub mod analytics;
pub mod app;
pub mod chat;
pub mod completion;
pub mod config;
pub mod db;
pub mod documents;
pub mod embedding;
pub mod migrate;
pub mod search;
pub mod server;
pub mod sqlite_store;
