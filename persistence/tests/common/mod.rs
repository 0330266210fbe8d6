#![allow(dead_code)]

use chrono::DateTime;
use chrono::Utc;
use quill_persistence::CreateSessionOptions;
use quill_persistence::EngineConfig;
use quill_persistence::Message;
use quill_persistence::MessageRole;
use quill_persistence::Session;
use quill_persistence::SessionManager;
use quill_persistence::TokenCount;
use quill_persistence::types::CURRENT_SCHEMA_VERSION;
use std::path::Path;
use std::path::PathBuf;
use uuid::Uuid;

pub fn engine_config(dir: &Path) -> EngineConfig {
    EngineConfig {
        sessions_dir: dir.join("sessions"),
        auto_save_enabled: false,
        ..EngineConfig::default()
    }
}

pub async fn manager_in(dir: &Path) -> SessionManager {
    SessionManager::new(engine_config(dir))
        .await
        .expect("manager should construct")
}

pub fn create_options(model: &str) -> CreateSessionOptions {
    CreateSessionOptions {
        model: model.to_string(),
        workspace_root: PathBuf::from("/w"),
        ..CreateSessionOptions::default()
    }
}

pub fn user_message(id: &str, text: &str) -> Message {
    Message::new(id, MessageRole::User, text)
}

pub fn assistant_message(id: &str, text: &str) -> Message {
    Message::new(id, MessageRole::Assistant, text)
}

/// A hand-built session with explicit timestamps, for storage-level setup
/// that must not go through the manager's timestamp bumping.
pub fn session_at(last_modified: DateTime<Utc>, messages: Vec<Message>) -> Session {
    let last_modified = quill_persistence::types::truncate_to_millis(last_modified);
    Session {
        id: Uuid::new_v4(),
        version: CURRENT_SCHEMA_VERSION.to_string(),
        created: last_modified,
        last_modified,
        model: "gpt-4o".to_string(),
        provider: None,
        workspace_root: PathBuf::from("/w"),
        token_count: TokenCount::default(),
        files_accessed: Vec::new(),
        messages,
        context_files: Vec::new(),
        tags: Vec::new(),
        title: None,
        notes: None,
    }
}
