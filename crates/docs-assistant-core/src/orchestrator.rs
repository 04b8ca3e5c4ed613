//! Query orchestration: retrieval → context → completion → analytics.
//!
//! # Single-shot
//!
//! ```text
//! START ──▶ RETRIEVING ──▶ GENERATING ──▶ DONE
//!   │            │               │
//!   └──── FAILED ◀───────────────┘   (retrieval failure degrades, never fails)
//! ```
//!
//! # Streaming
//!
//! `START` and `RETRIEVING` are the same. The provider stream is then
//! wrapped in an [`EventStream`] that emits one [`StreamEvent::Chunk`] per
//! non-empty delta, in arrival order, and ends with exactly one terminal
//! event: [`StreamEvent::Done`] on a clean end of stream (analytics written
//! first) or [`StreamEvent::Error`] on a provider failure (no analytics).
//!
//! The returned stream owns the provider stream. Dropping it at any point
//! releases the provider connection; a consumer that stops reading early is
//! a normal exit.

use std::sync::Arc;

use futures::stream::{self, BoxStream, StreamExt};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::analytics::{source_urls, AnalyticsRecorder};
use crate::completion::{CompletionProvider, DeltaStream, GenerationParams};
use crate::context::assemble_search_context;
use crate::error::RagError;
use crate::models::{ConversationTurn, QueryLogEntry, Role, SearchResult};
use crate::retriever::Retriever;

/// Number of documents retrieved as chat context.
pub const CHAT_CONTEXT_LIMIT: usize = 3;

/// One item of the streaming output contract.
///
/// Transports must keep the three kinds distinguishable: a chunk can never
/// be mistaken for the completion or error marker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    Chunk(String),
    Done,
    Error(String),
}

pub type EventStream = BoxStream<'static, StreamEvent>;

/// Result of a single-shot chat.
#[derive(Debug, Clone, Serialize)]
pub struct ChatAnswer {
    pub message: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub sources: Vec<SearchResult>,
}

#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    /// Documents retrieved for chat context.
    pub context_limit: usize,
    pub generation: GenerationParams,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            context_limit: CHAT_CONTEXT_LIMIT,
            generation: GenerationParams::default(),
        }
    }
}

/// Turns after validation and retrieval, ready for the provider.
struct Prepared {
    query: String,
    turns: Vec<ConversationTurn>,
    results: Vec<SearchResult>,
}

/// Top-level coordinator. Built once, shared by every request.
#[derive(Clone)]
pub struct Orchestrator {
    retriever: Retriever,
    completion: Arc<dyn CompletionProvider>,
    analytics: Arc<dyn AnalyticsRecorder>,
    settings: OrchestratorSettings,
}

impl Orchestrator {
    pub fn new(
        retriever: Retriever,
        completion: Arc<dyn CompletionProvider>,
        analytics: Arc<dyn AnalyticsRecorder>,
        settings: OrchestratorSettings,
    ) -> Self {
        Self {
            retriever,
            completion,
            analytics,
            settings,
        }
    }

    pub fn retriever(&self) -> &Retriever {
        &self.retriever
    }

    pub fn settings(&self) -> &OrchestratorSettings {
        &self.settings
    }

    /// Direct search. Unlike chat, a retrieval failure is returned.
    pub async fn search(&self, query: &str, limit: usize) -> Result<Vec<SearchResult>, RagError> {
        let results = self.retriever.retrieve(query, limit).await?;
        self.analytics.record(QueryLogEntry::new(
            query,
            format!("Found {} results", results.len()),
            source_urls(&results),
        ));
        Ok(results)
    }

    /// Single-shot chat over `turns`.
    pub async fn chat(&self, turns: Vec<ConversationTurn>) -> Result<ChatAnswer, RagError> {
        let prepared = self.prepare(turns).await?;

        let message = self
            .completion
            .complete(&prepared.turns, &self.settings.generation)
            .await
            .map_err(RagError::Generation)?;

        self.analytics.record(QueryLogEntry::new(
            prepared.query,
            message.clone(),
            source_urls(&prepared.results),
        ));

        Ok(ChatAnswer {
            message,
            sources: prepared.results,
        })
    }

    /// Streaming chat over `turns`.
    ///
    /// Validation and retrieval happen before this returns; failing to open
    /// the provider stream is a [`RagError::Generation`]. Everything after
    /// that is reported through the returned stream.
    pub async fn chat_stream(&self, turns: Vec<ConversationTurn>) -> Result<EventStream, RagError> {
        let prepared = self.prepare(turns).await?;

        let deltas = self
            .completion
            .complete_stream(&prepared.turns, &self.settings.generation)
            .await
            .map_err(RagError::Generation)?;

        debug!(model = self.completion.model_name(), "provider stream opened");

        let state = StreamState::Streaming {
            deltas,
            answer: String::new(),
            query: prepared.query,
            sources: source_urls(&prepared.results),
            analytics: self.analytics.clone(),
        };
        Ok(stream::unfold(state, next_event).boxed())
    }

    /// `START` and `RETRIEVING`: validate, retrieve on the final turn,
    /// prepend context. The logged query is the final user turn.
    async fn prepare(&self, turns: Vec<ConversationTurn>) -> Result<Prepared, RagError> {
        validate_turns(&turns)?;
        let query = active_query(&turns).to_string();
        let retrieval_text = turns.last().map(|t| t.content.as_str()).unwrap_or_default();

        let results = match self
            .retriever
            .retrieve(retrieval_text, self.settings.context_limit)
            .await
        {
            Ok(results) => results,
            Err(e @ (RagError::Configuration(_) | RagError::Validation(_))) => return Err(e),
            Err(e) => {
                warn!(error = %e, "retrieval failed; answering without documentation context");
                Vec::new()
            }
        };

        let context = assemble_search_context(&results);
        let turns = if context.is_empty() {
            turns
        } else {
            augment(turns, &context)
        };

        info!(
            turns = turns.len(),
            context_docs = results.len(),
            "prepared conversation"
        );

        Ok(Prepared {
            query,
            turns,
            results,
        })
    }
}

enum StreamState {
    Streaming {
        deltas: DeltaStream,
        answer: String,
        query: String,
        sources: Vec<String>,
        analytics: Arc<dyn AnalyticsRecorder>,
    },
    Finished,
}

/// One step of the streaming state machine.
///
/// The provider stream is dropped as soon as a terminal event is produced,
/// so it is released once whether the stream ends, fails, or is abandoned.
async fn next_event(state: StreamState) -> Option<(StreamEvent, StreamState)> {
    let StreamState::Streaming {
        mut deltas,
        mut answer,
        query,
        sources,
        analytics,
    } = state
    else {
        return None;
    };

    loop {
        match deltas.next().await {
            Some(Ok(delta)) => {
                if delta.is_empty() {
                    continue;
                }
                answer.push_str(&delta);
                let next = StreamState::Streaming {
                    deltas,
                    answer,
                    query,
                    sources,
                    analytics,
                };
                return Some((StreamEvent::Chunk(delta), next));
            }
            Some(Err(e)) => {
                drop(deltas);
                let err = RagError::Generation(e);
                warn!(error = %err, streamed_chars = answer.len(), "provider stream failed");
                return Some((StreamEvent::Error(err.to_string()), StreamState::Finished));
            }
            None => {
                drop(deltas);
                debug!(chars = answer.len(), "provider stream complete");
                analytics.record(QueryLogEntry::new(query, answer, sources));
                return Some((StreamEvent::Done, StreamState::Finished));
            }
        }
    }
}

/// Reject empty conversations and empty turns.
pub fn validate_turns(turns: &[ConversationTurn]) -> Result<(), RagError> {
    if turns.is_empty() {
        return Err(RagError::Validation(
            "at least one message is required".into(),
        ));
    }
    if let Some(i) = turns.iter().position(|t| t.content.trim().is_empty()) {
        return Err(RagError::Validation(format!(
            "message {} has empty content",
            i + 1
        )));
    }
    Ok(())
}

/// The final user-authored turn, or the final turn if no user spoke.
///
/// Callers must have validated that `turns` is non-empty.
pub fn active_query(turns: &[ConversationTurn]) -> &str {
    turns
        .iter()
        .rev()
        .find(|t| t.role == Role::User)
        .or_else(|| turns.last())
        .map(|t| t.content.as_str())
        .unwrap_or_default()
}

/// Prepend the synthetic system turn carrying retrieval context.
pub fn augment(turns: Vec<ConversationTurn>, context: &str) -> Vec<ConversationTurn> {
    let mut augmented = Vec::with_capacity(turns.len() + 1);
    augmented.push(ConversationTurn::system(format!(
        "Context from documentation: {}",
        context
    )));
    augmented.extend(turns);
    augmented
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Document, DocumentInput};
    use crate::store::memory::InMemoryStore;
    use crate::testing::{
        FailingEmbedder, FixedEmbedder, HashEmbedder, MemoryRecorder, ScriptedCompletion,
    };

    fn doc(title: &str, url: &str) -> Document {
        Document::new(DocumentInput {
            title: title.to_string(),
            body: format!("{} explained in detail", title),
            url: url.to_string(),
            ..Default::default()
        })
    }

    struct Harness {
        orchestrator: Orchestrator,
        completion: Arc<ScriptedCompletion>,
        recorder: Arc<MemoryRecorder>,
    }

    fn harness(store: InMemoryStore, completion: ScriptedCompletion) -> Harness {
        harness_with_embedder(Arc::new(FixedEmbedder::new(vec![1.0, 0.0])), store, completion)
    }

    fn harness_with_embedder(
        embedder: Arc<dyn crate::embedding::EmbeddingProvider>,
        store: InMemoryStore,
        completion: ScriptedCompletion,
    ) -> Harness {
        let completion = Arc::new(completion);
        let recorder = Arc::new(MemoryRecorder::new());
        let orchestrator = Orchestrator::new(
            Retriever::new(embedder, Arc::new(store)),
            completion.clone(),
            recorder.clone(),
            OrchestratorSettings::default(),
        );
        Harness {
            orchestrator,
            completion,
            recorder,
        }
    }

    fn two_doc_store() -> InMemoryStore {
        let store = InMemoryStore::new();
        store.insert(doc("X overview", "https://docs.example.com/x"), vec![1.0, 0.0]);
        store.insert(doc("X internals", "https://docs.example.com/x-internals"), vec![0.9, 0.3]);
        store
    }

    async fn collect(stream: EventStream) -> Vec<StreamEvent> {
        stream.collect().await
    }

    #[tokio::test]
    async fn test_chat_prepends_context_and_logs_sources() {
        let h = harness(two_doc_store(), ScriptedCompletion::answering("X is a thing."));

        let answer = h
            .orchestrator
            .chat(vec![ConversationTurn::user("What is X?")])
            .await
            .unwrap();

        assert_eq!(answer.message, "X is a thing.");
        assert_eq!(answer.sources.len(), 2);

        let calls = h.completion.calls();
        assert_eq!(calls.len(), 1);
        let turns = &calls[0];
        assert_eq!(turns.len(), 2);
        assert_eq!(turns[0].role, Role::System);
        assert!(turns[0]
            .content
            .starts_with("Context from documentation: Document 1: X overview"));
        assert!(turns[0].content.contains("Document 2: X internals"));
        assert_eq!(turns[1], ConversationTurn::user("What is X?"));

        let entries = h.recorder.entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].query, "What is X?");
        assert_eq!(entries[0].response, "X is a thing.");
        assert_eq!(
            entries[0].sources,
            vec!["https://docs.example.com/x", "https://docs.example.com/x-internals"]
        );
    }

    #[tokio::test]
    async fn test_chat_excludes_empty_urls_from_sources() {
        let store = InMemoryStore::new();
        store.insert(doc("with url", "https://a"), vec![1.0, 0.0]);
        store.insert(doc("no url", ""), vec![0.8, 0.2]);
        let h = harness(store, ScriptedCompletion::answering("ok"));

        h.orchestrator
            .chat(vec![ConversationTurn::user("q")])
            .await
            .unwrap();
        assert_eq!(h.recorder.entries()[0].sources, vec!["https://a"]);
    }

    #[tokio::test]
    async fn test_chat_without_results_sends_turns_unchanged() {
        let h = harness(InMemoryStore::new(), ScriptedCompletion::answering("hi"));
        let turns = vec![
            ConversationTurn::user("hello"),
            ConversationTurn::new(Role::Assistant, "hi there"),
            ConversationTurn::user("how do I install?"),
        ];

        h.orchestrator.chat(turns.clone()).await.unwrap();
        assert_eq!(h.completion.calls()[0], turns);
        assert_eq!(h.recorder.entries()[0].query, "how do I install?");
        assert!(h.recorder.entries()[0].sources.is_empty());
    }

    #[tokio::test]
    async fn test_chat_degrades_when_retrieval_fails() {
        let h = harness_with_embedder(
            Arc::new(FailingEmbedder),
            two_doc_store(),
            ScriptedCompletion::answering("ungrounded answer"),
        );

        let answer = h
            .orchestrator
            .chat(vec![ConversationTurn::user("What is X?")])
            .await
            .unwrap();

        assert_eq!(answer.message, "ungrounded answer");
        assert!(answer.sources.is_empty());
        let calls = h.completion.calls();
        assert_eq!(calls[0].len(), 1);
        assert_eq!(calls[0][0].role, Role::User);
        assert_eq!(h.recorder.entries().len(), 1);
    }

    #[tokio::test]
    async fn test_chat_configuration_error_is_fatal() {
        let embedder = FixedEmbedder::new(vec![1.0, 0.0]).with_declared_dims(3);
        let h = harness_with_embedder(
            Arc::new(embedder),
            two_doc_store(),
            ScriptedCompletion::answering("never"),
        );

        let err = h
            .orchestrator
            .chat(vec![ConversationTurn::user("q")])
            .await
            .unwrap_err();
        assert!(matches!(err, RagError::Configuration(_)));
        assert!(h.completion.calls().is_empty());
    }

    #[tokio::test]
    async fn test_chat_validation() {
        let h = harness(two_doc_store(), ScriptedCompletion::answering("x"));

        let err = h.orchestrator.chat(vec![]).await.unwrap_err();
        assert!(matches!(err, RagError::Validation(_)));

        let err = h
            .orchestrator
            .chat(vec![ConversationTurn::user("ok"), ConversationTurn::user("  ")])
            .await
            .unwrap_err();
        assert!(matches!(err, RagError::Validation(_)));
        assert!(h.completion.calls().is_empty());
        assert!(h.recorder.entries().is_empty());
    }

    #[tokio::test]
    async fn test_chat_generation_failure_writes_no_analytics() {
        let h = harness(two_doc_store(), ScriptedCompletion::failing("upstream 503"));

        let err = h
            .orchestrator
            .chat(vec![ConversationTurn::user("q")])
            .await
            .unwrap_err();
        assert!(matches!(err, RagError::Generation(_)));
        assert!(h.recorder.entries().is_empty());
    }

    #[tokio::test]
    async fn test_stream_chunks_then_single_done() {
        let h = harness(
            two_doc_store(),
            ScriptedCompletion::streaming(["Hel", "", "lo, ", "world"]),
        );

        let events = collect(
            h.orchestrator
                .chat_stream(vec![ConversationTurn::user("greet me")])
                .await
                .unwrap(),
        )
        .await;

        assert_eq!(
            events,
            vec![
                StreamEvent::Chunk("Hel".into()),
                StreamEvent::Chunk("lo, ".into()),
                StreamEvent::Chunk("world".into()),
                StreamEvent::Done,
            ]
        );

        let text: String = events
            .iter()
            .filter_map(|e| match e {
                StreamEvent::Chunk(c) => Some(c.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(text, "Hello, world");

        let entries = h.recorder.entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].response, "Hello, world");
        assert_eq!(entries[0].query, "greet me");
        assert_eq!(h.completion.released(), 1);
        assert_eq!(h.completion.calls()[0].len(), 2);
    }

    #[tokio::test]
    async fn test_stream_error_after_partial_output() {
        let h = harness(
            two_doc_store(),
            ScriptedCompletion::streaming(["partial ", "answer"]).then_fail("connection reset"),
        );

        let events = collect(
            h.orchestrator
                .chat_stream(vec![ConversationTurn::user("q")])
                .await
                .unwrap(),
        )
        .await;

        assert_eq!(events.len(), 3);
        assert_eq!(events[0], StreamEvent::Chunk("partial ".into()));
        assert_eq!(events[1], StreamEvent::Chunk("answer".into()));
        match &events[2] {
            StreamEvent::Error(msg) => assert!(msg.contains("connection reset")),
            other => panic!("expected error marker, got {:?}", other),
        }
        assert!(h.recorder.entries().is_empty());
        assert_eq!(h.completion.released(), 1);
    }

    #[tokio::test]
    async fn test_stream_consumer_disconnect_releases_once() {
        let h = harness(
            two_doc_store(),
            ScriptedCompletion::streaming(["one ", "two ", "three ", "four"]),
        );

        let mut stream = h
            .orchestrator
            .chat_stream(vec![ConversationTurn::user("count")])
            .await
            .unwrap();

        assert_eq!(stream.next().await, Some(StreamEvent::Chunk("one ".into())));
        assert_eq!(stream.next().await, Some(StreamEvent::Chunk("two ".into())));
        assert_eq!(h.completion.released(), 0);

        drop(stream);

        assert_eq!(h.completion.released(), 1);
        assert!(h.recorder.entries().is_empty());
    }

    #[tokio::test]
    async fn test_stream_open_failure_is_generation_error() {
        let h = harness(two_doc_store(), ScriptedCompletion::failing("bad key"));
        let result = h
            .orchestrator
            .chat_stream(vec![ConversationTurn::user("q")])
            .await;
        assert!(matches!(result, Err(RagError::Generation(_))));
        assert!(h.recorder.entries().is_empty());
    }

    #[tokio::test]
    async fn test_stream_degrades_when_retrieval_fails() {
        let h = harness_with_embedder(
            Arc::new(FailingEmbedder),
            two_doc_store(),
            ScriptedCompletion::streaming(["fine"]),
        );
        let events = collect(
            h.orchestrator
                .chat_stream(vec![ConversationTurn::user("q")])
                .await
                .unwrap(),
        )
        .await;
        assert_eq!(events, vec![StreamEvent::Chunk("fine".into()), StreamEvent::Done]);
        assert_eq!(h.completion.calls()[0].len(), 1);
    }

    #[tokio::test]
    async fn test_search_propagates_retrieval_error() {
        let h = harness_with_embedder(
            Arc::new(FailingEmbedder),
            two_doc_store(),
            ScriptedCompletion::answering("unused"),
        );
        let err = h.orchestrator.search("anything", 5).await.unwrap_err();
        assert!(matches!(err, RagError::Retrieval(_)));
        assert!(h.recorder.entries().is_empty());
    }

    #[tokio::test]
    async fn test_search_empty_corpus_logs_zero_results() {
        let h = harness_with_embedder(
            Arc::new(HashEmbedder::new(16)),
            InMemoryStore::new(),
            ScriptedCompletion::answering("unused"),
        );
        let results = h.orchestrator.search("anything", 5).await.unwrap();
        assert!(results.is_empty());
        assert_eq!(h.recorder.entries()[0].response, "Found 0 results");
    }

    #[tokio::test]
    async fn test_retrieval_uses_final_turn_and_log_uses_final_user_turn() {
        let embedder = Arc::new(HashEmbedder::new(16));
        let h = harness_with_embedder(
            embedder.clone(),
            InMemoryStore::new(),
            ScriptedCompletion::answering("ok"),
        );

        h.orchestrator
            .chat(vec![
                ConversationTurn::user("A"),
                ConversationTurn::new(Role::Assistant, "B"),
            ])
            .await
            .unwrap();

        assert_eq!(embedder.inputs(), vec!["B"]);
        assert_eq!(h.recorder.entries()[0].query, "A");
    }

    #[test]
    fn test_active_query_prefers_last_user_turn() {
        let turns = vec![
            ConversationTurn::user("first"),
            ConversationTurn::user("second"),
            ConversationTurn::new(Role::Assistant, "reply"),
        ];
        assert_eq!(active_query(&turns), "second");
        let only_system = vec![ConversationTurn::system("sys")];
        assert_eq!(active_query(&only_system), "sys");
    }
}
