//! Chat completion provider implementations.
//!
//! [`OpenAICompletion`] talks to `POST {api_base}/chat/completions`, both in
//! one-shot mode and as a server-sent event stream. [`DisabledCompletion`]
//! fails every call.
//!
//! The stream is parsed incrementally with [`SseParser`]: network chunks
//! may split lines (or UTF-8 sequences) anywhere, so bytes are buffered
//! until a full line is available.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use serde::{Deserialize, Serialize};
use tracing::debug;

use docs_assistant_core::completion::{CompletionProvider, DeltaStream, GenerationParams};
use docs_assistant_core::models::ConversationTurn;

use crate::config::CompletionConfig;

pub struct DisabledCompletion;

#[async_trait]
impl CompletionProvider for DisabledCompletion {
    fn model_name(&self) -> &str {
        "disabled"
    }

    async fn complete(&self, _: &[ConversationTurn], _: &GenerationParams) -> Result<String> {
        bail!("Completion provider is disabled")
    }

    async fn complete_stream(
        &self,
        _: &[ConversationTurn],
        _: &GenerationParams,
    ) -> Result<DeltaStream> {
        bail!("Completion provider is disabled")
    }
}

// ============ Wire types ============

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    stream: bool,
}

#[derive(Serialize)]
struct WireMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
}

#[derive(Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: StreamDelta,
}

#[derive(Deserialize, Default)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct ErrorResponse {
    error: ErrorDetail,
}

#[derive(Deserialize)]
struct ErrorDetail {
    message: String,
}

// ============ OpenAI provider ============

pub struct OpenAICompletion {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
    request_timeout: Duration,
    idle_timeout: Duration,
}

impl OpenAICompletion {
    /// Requires `OPENAI_API_KEY` in the environment.
    pub fn new(config: &CompletionConfig) -> Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow!("OPENAI_API_KEY environment variable not set"))?;

        // No overall request timeout: it would cut long streams short. The
        // stream is bounded per delta by `idle_timeout` instead.
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            endpoint: format!("{}/chat/completions", config.api_base.trim_end_matches('/')),
            api_key,
            model: config.model.clone(),
            request_timeout: Duration::from_secs(config.timeout_secs),
            idle_timeout: Duration::from_secs(config.stream_idle_timeout_secs),
        })
    }

    async fn send(
        &self,
        turns: &[ConversationTurn],
        params: &GenerationParams,
        stream: bool,
    ) -> Result<reqwest::Response> {
        let request = ChatRequest {
            model: &self.model,
            messages: turns
                .iter()
                .map(|t| WireMessage {
                    role: t.role.as_str(),
                    content: &t.content,
                })
                .collect(),
            temperature: params.temperature,
            max_tokens: params.max_tokens,
            stream,
        };

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .context("completion request failed")?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ErrorResponse>(&text)
                .map(|e| e.error.message)
                .unwrap_or(text);
            bail!("OpenAI API error {}: {}", status, message);
        }

        Ok(response)
    }
}

#[async_trait]
impl CompletionProvider for OpenAICompletion {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(
        &self,
        turns: &[ConversationTurn],
        params: &GenerationParams,
    ) -> Result<String> {
        let response = tokio::time::timeout(self.request_timeout, async {
            let response = self.send(turns, params, false).await?;
            response
                .json::<ChatResponse>()
                .await
                .context("Invalid completion response")
        })
        .await
        .map_err(|_| {
            anyhow!("completion timed out after {}s", self.request_timeout.as_secs())
        })??;

        response
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content.unwrap_or_default())
            .ok_or_else(|| anyhow!("completion response contained no choices"))
    }

    async fn complete_stream(
        &self,
        turns: &[ConversationTurn],
        params: &GenerationParams,
    ) -> Result<DeltaStream> {
        let response = self.send(turns, params, true).await?;
        let bytes = response.bytes_stream().map(|chunk| chunk.map(|b| b.to_vec()));
        Ok(delta_stream(bytes.boxed(), self.idle_timeout))
    }
}

struct StreamState {
    bytes: BoxStream<'static, reqwest::Result<Vec<u8>>>,
    parser: SseParser,
    pending: VecDeque<Result<String>>,
    idle_timeout: Duration,
    finished: bool,
}

/// Turn a raw SSE byte stream into a stream of text deltas.
///
/// Ends after `[DONE]`, after the first error, or when the connection
/// closes. The byte stream (and with it the HTTP connection) is dropped as
/// soon as the delta stream finishes or is itself dropped.
fn delta_stream(
    bytes: BoxStream<'static, reqwest::Result<Vec<u8>>>,
    idle_timeout: Duration,
) -> DeltaStream {
    let state = StreamState {
        bytes,
        parser: SseParser::default(),
        pending: VecDeque::new(),
        idle_timeout,
        finished: false,
    };

    stream::unfold(state, |mut st| async move {
        loop {
            if let Some(item) = st.pending.pop_front() {
                return Some((item, st));
            }
            if st.finished {
                return None;
            }

            let events = match tokio::time::timeout(st.idle_timeout, st.bytes.next()).await {
                Err(_) => {
                    st.finished = true;
                    let err = anyhow!(
                        "no data from completion stream for {}s",
                        st.idle_timeout.as_secs()
                    );
                    return Some((Err(err), st));
                }
                Ok(Some(Err(e))) => {
                    st.finished = true;
                    return Some((Err(anyhow!(e).context("completion stream failed")), st));
                }
                Ok(Some(Ok(chunk))) => st.parser.push(&chunk),
                Ok(None) => {
                    st.finished = true;
                    st.parser.finish()
                }
            };

            for event in events {
                match event {
                    SseData::Delta(text) => st.pending.push_back(Ok(text)),
                    SseData::Done => {
                        st.finished = true;
                        break;
                    }
                    SseData::Failed(message) => {
                        st.pending.push_back(Err(anyhow!(message)));
                        st.finished = true;
                        break;
                    }
                }
            }
        }
    })
    .boxed()
}

// ============ SSE parsing ============

/// One meaningful `data:` line from an OpenAI completion stream.
#[derive(Debug, PartialEq)]
pub enum SseData {
    /// Non-empty content delta.
    Delta(String),
    /// The `[DONE]` sentinel.
    Done,
    /// Provider-reported error or undecodable payload.
    Failed(String),
}

/// Line-buffered SSE decoder.
#[derive(Default)]
pub struct SseParser {
    buf: Vec<u8>,
}

impl SseParser {
    /// Feed a network chunk; returns the events completed by it.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<SseData> {
        self.buf.extend_from_slice(chunk);
        let mut out = Vec::new();
        while let Some(pos) = self.buf.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buf.drain(..=pos).collect();
            if let Some(event) = parse_line(&String::from_utf8_lossy(&line)) {
                out.push(event);
            }
        }
        out
    }

    /// Flush a trailing line left without a newline.
    pub fn finish(&mut self) -> Vec<SseData> {
        if self.buf.is_empty() {
            return Vec::new();
        }
        let line = std::mem::take(&mut self.buf);
        parse_line(&String::from_utf8_lossy(&line))
            .into_iter()
            .collect()
    }
}

fn parse_line(line: &str) -> Option<SseData> {
    let line = line.trim_end_matches(|c: char| c == '\r' || c == '\n');
    // Comments, `event:` lines, and blank separators carry nothing.
    let data = line.strip_prefix("data:")?.trim_start();
    if data.is_empty() {
        return None;
    }
    if data == "[DONE]" {
        return Some(SseData::Done);
    }
    if let Ok(err) = serde_json::from_str::<ErrorResponse>(data) {
        return Some(SseData::Failed(err.error.message));
    }
    match serde_json::from_str::<StreamChunk>(data) {
        Ok(chunk) => chunk
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.delta.content)
            .filter(|c| !c.is_empty())
            .map(SseData::Delta),
        Err(e) => {
            debug!(payload = data, "undecodable stream payload");
            Some(SseData::Failed(format!("malformed stream payload: {}", e)))
        }
    }
}

/// Build the completion provider named by `completion.provider`.
pub fn create_completion(config: &CompletionConfig) -> Result<Arc<dyn CompletionProvider>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledCompletion)),
        "openai" => Ok(Arc::new(OpenAICompletion::new(config)?)),
        other => bail!("Unknown completion provider: {}", other),
    }
}
