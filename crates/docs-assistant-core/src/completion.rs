//! Completion provider trait.
//!
//! A completion provider turns an ordered list of conversation turns into
//! an answer, either in one response or as a stream of text deltas.

use anyhow::Result;
use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::models::ConversationTurn;

/// Lazy, finite, non-restartable sequence of text deltas.
///
/// `None` marks a clean end of stream; an `Err` item is a provider failure
/// and nothing after it is meaningful. Dropping the stream releases the
/// underlying connection.
pub type DeltaStream = BoxStream<'static, Result<String>>;

/// Sampling settings passed on every completion call.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GenerationParams {
    pub temperature: f32,
    pub max_tokens: u32,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            max_tokens: 1000,
        }
    }
}

#[async_trait]
pub trait CompletionProvider: Send + Sync {
    /// Returns the model identifier (e.g. `"gpt-3.5-turbo"`).
    fn model_name(&self) -> &str;

    /// Single-shot completion.
    async fn complete(&self, turns: &[ConversationTurn], params: &GenerationParams)
        -> Result<String>;

    /// Open an incremental stream. Errors here mean the stream never opened.
    async fn complete_stream(
        &self,
        turns: &[ConversationTurn],
        params: &GenerationParams,
    ) -> Result<DeltaStream>;
}
