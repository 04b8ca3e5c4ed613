//! Core data models used throughout Docs Assistant.
//!
//! These types represent the documents, search results, conversation turns,
//! and query log entries that flow through the retrieval-augmented
//! generation pipeline.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::error::RagError;

/// A document in the corpus.
///
/// Documents are owned by the persistence layer; the retriever only reads
/// them. `content_hash` tracks the body the stored vector was computed from,
/// so an update with a different hash must re-embed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub title: String,
    pub body: String,
    /// Web-browsable source URL. Empty when the document has none.
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    pub content_hash: String,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Caller-supplied fields for creating or replacing a document.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DocumentInput {
    pub title: String,
    #[serde(alias = "content")]
    pub body: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl DocumentInput {
    pub fn validate(&self) -> Result<(), RagError> {
        if self.title.trim().is_empty() {
            return Err(RagError::Validation("title must not be empty".into()));
        }
        if self.body.trim().is_empty() {
            return Err(RagError::Validation("body must not be empty".into()));
        }
        Ok(())
    }
}

impl Document {
    /// Build a fresh document with a new UUID and current timestamps.
    pub fn new(input: DocumentInput) -> Self {
        let now = Utc::now().timestamp();
        Self {
            id: Uuid::new_v4().to_string(),
            content_hash: body_hash(&input.body),
            title: input.title,
            body: input.body,
            url: input.url,
            category: input.category,
            tags: normalize_tags(input.tags),
            created_at: now,
            updated_at: now,
        }
    }

    /// Apply an update, keeping identity and creation time.
    ///
    /// Returns `true` when the body changed, meaning the stored vector no
    /// longer describes this document.
    pub fn apply(&mut self, input: DocumentInput) -> bool {
        let new_hash = body_hash(&input.body);
        let body_changed = new_hash != self.content_hash;
        self.title = input.title;
        self.body = input.body;
        self.url = input.url;
        self.category = input.category;
        self.tags = normalize_tags(input.tags);
        self.content_hash = new_hash;
        self.updated_at = Utc::now().timestamp();
        body_changed
    }
}

/// SHA-256 of a document body, hex encoded.
pub fn body_hash(body: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(body.as_bytes());
    format!("{:x}", hasher.finalize())
}

fn normalize_tags(tags: Vec<String>) -> BTreeSet<String> {
    tags.into_iter()
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .collect()
}

/// A retrieved document paired with its distance to the query.
///
/// `distance` is cosine distance: lower is more similar, and result lists
/// are always ordered ascending.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchResult {
    pub document: Document,
    pub distance: f64,
}

/// Author of a conversation turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = RagError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "system" => Ok(Role::System),
            "user" => Ok(Role::User),
            "assistant" => Ok(Role::Assistant),
            other => Err(RagError::Validation(format!(
                "invalid role '{}': must be user, assistant, or system",
                other
            ))),
        }
    }
}

/// One message in a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub role: Role,
    pub content: String,
}

impl ConversationTurn {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    /// Build a turn from untyped wire fields, validating the role.
    pub fn parse(role: &str, content: impl Into<String>) -> Result<Self, RagError> {
        Ok(Self::new(role.parse()?, content))
    }
}

/// Record of one completed interaction. Append-only.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryLogEntry {
    pub id: String,
    pub query: String,
    pub response: String,
    pub sources: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl QueryLogEntry {
    pub fn new(query: impl Into<String>, response: impl Into<String>, sources: Vec<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            query: query.into(),
            response: response.into(),
            sources,
            created_at: Utc::now(),
        }
    }
}
