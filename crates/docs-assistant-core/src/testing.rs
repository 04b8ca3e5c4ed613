//! Deterministic provider doubles for tests.
//!
//! These stand in for the network-backed embedding and completion clients
//! so pipeline behaviour can be exercised without credentials. The app
//! crate's integration tests use them too.

use std::collections::VecDeque;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::task::{Context, Poll};

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use futures::Stream;

use crate::analytics::AnalyticsRecorder;
use crate::completion::{CompletionProvider, DeltaStream, GenerationParams};
use crate::embedding::EmbeddingProvider;
use crate::models::{ConversationTurn, QueryLogEntry};

/// Bag-of-words embedder: each lowercase word adds 1.0 to a hashed bucket.
///
/// Texts sharing words land close together, which is enough to make
/// ranking assertions meaningful.
pub struct HashEmbedder {
    dims: usize,
    inputs: Mutex<Vec<String>>,
}

impl HashEmbedder {
    pub fn new(dims: usize) -> Self {
        Self {
            dims: dims.max(1),
            inputs: Mutex::new(Vec::new()),
        }
    }

    /// Texts passed to `embed`, in call order.
    pub fn inputs(&self) -> Vec<String> {
        self.inputs.lock().unwrap().clone()
    }

    pub fn vector_for(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; self.dims];
        for word in text.split_whitespace() {
            let word = word.to_lowercase();
            // FNV-1a
            let mut h: u64 = 0xcbf29ce484222325;
            for b in word.bytes() {
                h ^= b as u64;
                h = h.wrapping_mul(0x100000001b3);
            }
            v[(h % self.dims as u64) as usize] += 1.0;
        }
        v
    }
}

#[async_trait]
impl EmbeddingProvider for HashEmbedder {
    fn model_name(&self) -> &str {
        "hash"
    }
    fn dims(&self) -> usize {
        self.dims
    }
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.inputs.lock().unwrap().push(text.to_string());
        Ok(self.vector_for(text))
    }
}

/// Returns the same vector for every input.
pub struct FixedEmbedder {
    vector: Vec<f32>,
    declared_dims: usize,
}

impl FixedEmbedder {
    pub fn new(vector: Vec<f32>) -> Self {
        let declared_dims = vector.len();
        Self {
            vector,
            declared_dims,
        }
    }

    /// Declare a dimension different from the vector actually returned.
    pub fn with_declared_dims(mut self, dims: usize) -> Self {
        self.declared_dims = dims;
        self
    }
}

#[async_trait]
impl EmbeddingProvider for FixedEmbedder {
    fn model_name(&self) -> &str {
        "fixed"
    }
    fn dims(&self) -> usize {
        self.declared_dims
    }
    async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
        Ok(self.vector.clone())
    }
}

/// Always fails, like an embedding API that is down.
pub struct FailingEmbedder;

#[async_trait]
impl EmbeddingProvider for FailingEmbedder {
    fn model_name(&self) -> &str {
        "failing"
    }
    fn dims(&self) -> usize {
        0
    }
    async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
        bail!("embedding service unavailable")
    }
}

/// Completion double with a fixed answer and a scripted delta sequence.
///
/// Records every turn list it is called with and counts how many of its
/// streams have been dropped.
pub struct ScriptedCompletion {
    answer: Result<String, String>,
    deltas: Vec<Result<String, String>>,
    open_error: Option<String>,
    calls: Mutex<Vec<Vec<ConversationTurn>>>,
    released: Arc<AtomicUsize>,
}

impl ScriptedCompletion {
    pub fn answering(answer: impl Into<String>) -> Self {
        Self {
            answer: Ok(answer.into()),
            deltas: Vec::new(),
            open_error: None,
            calls: Mutex::new(Vec::new()),
            released: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn failing(message: impl Into<String>) -> Self {
        let message = message.into();
        let mut s = Self::answering("");
        s.answer = Err(message.clone());
        s.open_error = Some(message);
        s
    }

    /// Stream these deltas, then end cleanly.
    pub fn streaming<I, S>(deltas: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut s = Self::answering("");
        s.deltas = deltas.into_iter().map(|d| Ok(d.into())).collect();
        s
    }

    /// Append a mid-stream failure after the scripted deltas.
    pub fn then_fail(mut self, message: impl Into<String>) -> Self {
        self.deltas.push(Err(message.into()));
        self
    }

    pub fn calls(&self) -> Vec<Vec<ConversationTurn>> {
        self.calls.lock().unwrap().clone()
    }

    /// Number of provider streams dropped so far.
    pub fn released(&self) -> usize {
        self.released.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CompletionProvider for ScriptedCompletion {
    fn model_name(&self) -> &str {
        "scripted"
    }

    async fn complete(
        &self,
        turns: &[ConversationTurn],
        _params: &GenerationParams,
    ) -> Result<String> {
        self.calls.lock().unwrap().push(turns.to_vec());
        self.answer.clone().map_err(|e| anyhow!(e))
    }

    async fn complete_stream(
        &self,
        turns: &[ConversationTurn],
        _params: &GenerationParams,
    ) -> Result<DeltaStream> {
        self.calls.lock().unwrap().push(turns.to_vec());
        if let Some(message) = &self.open_error {
            bail!("{}", message);
        }
        Ok(Box::pin(ScriptedStream {
            items: self.deltas.iter().cloned().collect(),
            released: self.released.clone(),
        }))
    }
}

struct ScriptedStream {
    items: VecDeque<Result<String, String>>,
    released: Arc<AtomicUsize>,
}

impl Stream for ScriptedStream {
    type Item = Result<String>;

    fn poll_next(mut self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Poll::Ready(self.items.pop_front().map(|r| r.map_err(|e| anyhow!(e))))
    }
}

impl Drop for ScriptedStream {
    fn drop(&mut self) {
        self.released.fetch_add(1, Ordering::SeqCst);
    }
}

/// Recorder that keeps entries in memory.
#[derive(Default)]
pub struct MemoryRecorder {
    entries: RwLock<Vec<QueryLogEntry>>,
}

impl MemoryRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<QueryLogEntry> {
        self.entries.read().unwrap().clone()
    }
}

impl AnalyticsRecorder for MemoryRecorder {
    fn record(&self, entry: QueryLogEntry) {
        self.entries.write().unwrap().push(entry);
    }
}
