//! Core data model: sessions, messages, index records, and the on-disk
//! envelope.
//!
//! On-disk field names are camelCase (see the serde attributes); in-memory
//! types follow Rust conventions. Timestamps are epoch-milliseconds on the
//! wire and `DateTime<Utc>` in memory.

use crate::error::Result;
use crate::error::StoreError;
use chrono::DateTime;
use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;
use std::collections::HashMap;
use std::path::PathBuf;
use tracing::warn;
use uuid::Uuid;

/// Schema version written by this build.
pub const CURRENT_SCHEMA_VERSION: &str = "1.0.0";

/// Linear migration chain, oldest supported first.
pub const SCHEMA_VERSION_CHAIN: [&str; 4] = ["0.7.0", "0.8.0", "0.9.0", "1.0.0"];

/// Max characters kept for the index preview (first user message).
pub const PREVIEW_MAX_CHARS: usize = 100;

/// Max characters kept for the index last-message excerpt.
pub const LAST_MESSAGE_MAX_CHARS: usize = 50;

/// Token accounting for a session.
///
/// `total >= input + output` is a soft invariant: violations log a warning
/// but never fail validation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenCount {
    pub total: u64,
    pub input: u64,
    pub output: u64,
}

impl TokenCount {
    pub fn check_soft_invariant(&self, id: Uuid) {
        if self.total < self.input + self.output {
            warn!(
                session = %id,
                total = self.total,
                input = self.input,
                output = self.output,
                "token count total is less than input + output"
            );
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
    System,
    Tool,
}

/// One block of structured message content.
///
/// Unknown block shapes round-trip unchanged through the `Other` variant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ContentBlock {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "tool_result")]
    ToolResult { content: String },
    #[serde(untagged)]
    Other(serde_json::Value),
}

/// Message content: either a bare string or an ordered list of blocks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Blocks(Vec<ContentBlock>),
}

impl MessageContent {
    /// Concatenated visible text, used for previews and content search.
    pub fn visible_text(&self) -> String {
        match self {
            Self::Text(text) => text.clone(),
            Self::Blocks(blocks) => {
                let mut parts = Vec::new();
                for block in blocks {
                    match block {
                        ContentBlock::Text { text } => parts.push(text.as_str()),
                        ContentBlock::ToolResult { content } => parts.push(content.as_str()),
                        ContentBlock::Other(_) => {}
                    }
                }
                parts.join(" ")
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCall {
    pub name: String,
    #[serde(default)]
    pub arguments: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolResultPayload {
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub role: MessageRole,
    pub content: MessageContent,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_results: Option<Vec<ToolResultPayload>>,
}

impl Message {
    pub fn new(id: impl Into<String>, role: MessageRole, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            role,
            content: MessageContent::Text(text.into()),
            timestamp: now_ms(),
            tool_calls: None,
            tool_results: None,
        }
    }
}

/// The primary entity: one durable conversation record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: Uuid,
    pub version: String,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created: DateTime<Utc>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub last_modified: DateTime<Utc>,
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    pub workspace_root: PathBuf,
    pub token_count: TokenCount,
    pub files_accessed: Vec<PathBuf>,
    pub messages: Vec<Message>,
    pub context_files: Vec<PathBuf>,
    pub tags: Vec<String>,
    pub title: Option<String>,
    pub notes: Option<String>,
}

impl Session {
    /// Validate required fields and invariants against the current schema.
    ///
    /// The token-count relation is a soft invariant: it logs a warning
    /// instead of failing.
    pub fn validate(&self) -> Result<()> {
        if self.id.get_version_num() != 4 {
            return Err(StoreError::Validation(format!(
                "session id {} is not a UUIDv4",
                self.id
            )));
        }
        if self.version.is_empty() {
            return Err(StoreError::Validation("missing schema version".into()));
        }
        if self.created > self.last_modified {
            return Err(StoreError::Validation(format!(
                "created ({}) is later than lastModified ({})",
                self.created.timestamp_millis(),
                self.last_modified.timestamp_millis()
            )));
        }
        if self.model.is_empty() {
            return Err(StoreError::Validation("missing model".into()));
        }
        for (idx, message) in self.messages.iter().enumerate() {
            if message.id.is_empty() {
                return Err(StoreError::Validation(format!(
                    "message at index {idx} has an empty id"
                )));
            }
        }
        self.token_count.check_soft_invariant(self.id);
        Ok(())
    }

    pub fn is_valid(&self) -> bool {
        self.validate().is_ok()
    }

    /// First user message text, for the index preview.
    pub fn preview_text(&self) -> Option<String> {
        self.messages
            .iter()
            .find(|m| m.role == MessageRole::User)
            .map(|m| truncate_chars(&m.content.visible_text(), PREVIEW_MAX_CHARS))
    }

    /// Last message text, for the index excerpt.
    pub fn last_message_text(&self) -> Option<String> {
        self.messages
            .last()
            .map(|m| truncate_chars(&m.content.visible_text(), LAST_MESSAGE_MAX_CHARS))
    }
}

/// Index record derived from a [`Session`].
///
/// If index and session file ever disagree, the session file is
/// authoritative and the index is rebuilt from it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionMetadata {
    pub id: Uuid,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created: DateTime<Utc>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub last_modified: DateTime<Utc>,
    pub model: String,
    pub message_count: usize,
    pub token_count: TokenCount,
    pub workspace_root: PathBuf,
    pub context_files: Vec<PathBuf>,
    pub tags: Vec<String>,
    pub title: Option<String>,
    pub preview: Option<String>,
    pub last_message: Option<String>,
}

impl SessionMetadata {
    pub fn from_session(session: &Session) -> Self {
        Self {
            id: session.id,
            created: session.created,
            last_modified: session.last_modified,
            model: session.model.clone(),
            message_count: session.messages.len(),
            token_count: session.token_count,
            workspace_root: session.workspace_root.clone(),
            context_files: session.context_files.clone(),
            tags: session.tags.clone(),
            title: session.title.clone(),
            preview: session.preview_text(),
            last_message: session.last_message_text(),
        }
    }
}

/// Secondary index mapping session IDs to summary metadata.
///
/// Stored as a single `index.json` in the sessions directory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionIndex {
    pub version: String,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub last_updated: DateTime<Utc>,
    pub sessions: HashMap<Uuid, SessionMetadata>,
}

impl SessionIndex {
    pub fn new() -> Self {
        Self {
            version: CURRENT_SCHEMA_VERSION.to_string(),
            last_updated: now_ms(),
            sessions: HashMap::new(),
        }
    }

    pub fn upsert(&mut self, metadata: SessionMetadata) {
        self.sessions.insert(metadata.id, metadata);
        self.last_updated = now_ms();
    }

    pub fn remove(&mut self, id: &Uuid) -> Option<SessionMetadata> {
        let removed = self.sessions.remove(id);
        if removed.is_some() {
            self.last_updated = now_ms();
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

impl Default for SessionIndex {
    fn default() -> Self {
        Self::new()
    }
}

/// On-disk wrapper around a serialized session.
///
/// `data` is the session object itself, or a base64 gzip blob of the
/// canonical session JSON when `compressed` is true. `checksum` is the hex
/// SHA-256 of the uncompressed canonical JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionedSession {
    pub version: String,
    pub compressed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
    pub data: serde_json::Value,
}

/// Current time at the engine's timestamp resolution.
pub fn now_ms() -> DateTime<Utc> {
    truncate_to_millis(Utc::now())
}

/// Timestamps persist as epoch-milliseconds; in-memory values keep the same
/// resolution so a written session compares equal to its reloaded form.
pub fn truncate_to_millis(ts: DateTime<Utc>) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ts.timestamp_millis()).unwrap_or(ts)
}

/// Char-boundary-safe truncation (no ellipsis).
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        text.to_string()
    } else {
        text.chars().take(max_chars).collect()
    }
}
