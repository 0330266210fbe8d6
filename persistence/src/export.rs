//! Session export and import.
//!
//! Exports wrap a session (or its metadata) in a small envelope with
//! deterministic field ordering; re-exporting the same session with the
//! same options differs only in the `exported` timestamp. Imports accept
//! strict parsing or a repair mode that fills defaults and warns.

use crate::error::Result;
use crate::error::StoreError;
use crate::sanitizer::SanitizerConfig;
use crate::sanitizer::SensitiveDataFilter;
use crate::sanitizer::collapse_path;
use crate::types::CURRENT_SCHEMA_VERSION;
use crate::types::ContentBlock;
use crate::types::MessageContent;
use crate::types::Session;
use crate::types::SessionMetadata;
use crate::types::ToolResultPayload;
use chrono::DateTime;
use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;
use serde_json::json;
use std::path::PathBuf;
use uuid::Uuid;

/// Literal substituted for message bodies when content is excluded.
pub const CONTENT_REMOVED: &str = "[Content removed]";

/// Literal substituted for the workspace path when it is not preserved.
pub const WORKSPACE_REMOVED: &str = "[Workspace path removed]";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    /// Alias for the pretty format; the default human-facing output.
    Json,
    JsonPretty,
    JsonCompact,
}

#[derive(Debug, Clone)]
pub struct ExportOptions {
    pub format: ExportFormat,
    pub sanitize: bool,
    pub include_content: bool,
    pub metadata_only: bool,
    pub custom_sanitization_patterns: Vec<String>,
    pub preserve_workspace_paths: bool,
}

impl Default for ExportOptions {
    fn default() -> Self {
        Self {
            format: ExportFormat::Json,
            sanitize: true,
            include_content: true,
            metadata_only: false,
            custom_sanitization_patterns: Vec::new(),
            preserve_workspace_paths: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportEnvelope {
    #[serde(rename = "type")]
    pub kind: String,
    pub version: String,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub exported: DateTime<Utc>,
    pub original_workspace: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

#[derive(Debug, Clone)]
pub struct ExportOutput {
    pub content: String,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct ImportOptions {
    /// Reject anything that does not parse as a full export; no repair.
    pub strict: bool,
    pub generate_new_id: bool,
    pub preserve_timestamps: bool,
    pub workspace_root_override: Option<PathBuf>,
}

impl Default for ImportOptions {
    fn default() -> Self {
        Self {
            strict: false,
            generate_new_id: true,
            preserve_timestamps: false,
            workspace_root_override: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ParsedImport {
    pub session: Session,
    pub new_id_generated: bool,
    pub original_id: Option<String>,
    pub warnings: Vec<String>,
}

/// Render a session (or its metadata) into the export envelope.
pub fn export_session(
    session: &Session,
    options: &ExportOptions,
    exported: DateTime<Utc>,
) -> Result<ExportOutput> {
    let mut warnings = Vec::new();
    let strip_workspace = options.sanitize && !options.preserve_workspace_paths;

    let mut prepared = session.clone();
    if !options.include_content {
        elide_content(&mut prepared);
    }
    if strip_workspace {
        prepared.workspace_root = PathBuf::from(WORKSPACE_REMOVED);
        prepared.context_files = prepared
            .context_files
            .iter()
            .map(|p| PathBuf::from(collapse_path(p)))
            .collect();
        prepared.files_accessed = prepared
            .files_accessed
            .iter()
            .map(|p| PathBuf::from(collapse_path(p)))
            .collect();
    }

    let (kind, session_value, metadata_value) = if options.metadata_only {
        let metadata = SessionMetadata::from_session(&prepared);
        (
            "session-metadata",
            None,
            Some(serde_json::to_value(metadata)?),
        )
    } else {
        ("session-full", Some(serde_json::to_value(&prepared)?), None)
    };

    let mut payload = ExportEnvelope {
        kind: kind.to_string(),
        version: CURRENT_SCHEMA_VERSION.to_string(),
        exported,
        original_workspace: if strip_workspace {
            WORKSPACE_REMOVED.to_string()
        } else {
            session.workspace_root.to_string_lossy().into_owned()
        },
        session: session_value,
        metadata: metadata_value,
    };

    if options.sanitize {
        let filter = SensitiveDataFilter::new(&SanitizerConfig {
            custom_patterns: options.custom_sanitization_patterns.clone(),
            preserve_paths: options.preserve_workspace_paths,
            ..SanitizerConfig::default()
        });
        warnings.extend(filter.warnings().iter().cloned());
        if let Some(session) = payload.session.as_mut() {
            filter.sanitize_value(session);
        }
        if let Some(metadata) = payload.metadata.as_mut() {
            filter.sanitize_value(metadata);
        }
        if !warnings.is_empty() {
            warnings.push("sanitization applied with warnings".to_string());
        }
    }

    let value = serde_json::to_value(&payload)?;
    let content = match options.format {
        ExportFormat::Json | ExportFormat::JsonPretty => serde_json::to_string_pretty(&value)?,
        ExportFormat::JsonCompact => serde_json::to_string(&value)?,
    };
    Ok(ExportOutput { content, warnings })
}

fn elide_content(session: &mut Session) {
    for message in &mut session.messages {
        message.content = match &message.content {
            MessageContent::Text(_) => MessageContent::Text(CONTENT_REMOVED.to_string()),
            MessageContent::Blocks(blocks) => MessageContent::Blocks(
                blocks
                    .iter()
                    .map(|block| match block {
                        ContentBlock::Text { .. } => ContentBlock::Text {
                            text: CONTENT_REMOVED.to_string(),
                        },
                        ContentBlock::ToolResult { .. } => ContentBlock::ToolResult {
                            content: CONTENT_REMOVED.to_string(),
                        },
                        other @ ContentBlock::Other(_) => other.clone(),
                    })
                    .collect(),
            ),
        };
        if let Some(results) = &mut message.tool_results {
            for result in results {
                *result = ToolResultPayload {
                    content: CONTENT_REMOVED.to_string(),
                };
            }
        }
    }
}

/// Parse an exported document back into a session.
///
/// Strict mode rejects any structural deviation. Repair mode fills missing
/// fields with defaults (fresh message IDs, current timestamps, empty
/// collections) and records a warning per repair.
pub fn parse_import(content: &str, options: &ImportOptions) -> Result<ParsedImport> {
    let document: Value = serde_json::from_str(content)
        .map_err(|e| StoreError::CorruptedData(format!("import is not valid JSON: {e}")))?;

    let mut warnings = Vec::new();
    let has_envelope = document.get("type").is_some() && document.get("version").is_some();
    if !has_envelope {
        if options.strict {
            return Err(StoreError::Validation(
                "import is missing the export envelope (type/version)".into(),
            ));
        }
        warnings.push("import lacks an export envelope; treating it as a bare session".into());
    }

    if document.get("type").and_then(Value::as_str) == Some("session-metadata") {
        return Err(StoreError::Validation(
            "metadata-only exports cannot be imported as sessions".into(),
        ));
    }

    let mut raw = if has_envelope {
        document
            .get("session")
            .cloned()
            .ok_or_else(|| StoreError::Validation("export envelope has no session".into()))?
    } else {
        document
    };

    let original_id = raw
        .get("id")
        .and_then(Value::as_str)
        .map(str::to_string);

    let session: Session = if options.strict {
        serde_json::from_value(raw)
            .map_err(|e| StoreError::Validation(format!("import fails the session schema: {e}")))?
    } else {
        repair_session_value(&mut raw, &mut warnings);
        serde_json::from_value(raw)
            .map_err(|e| StoreError::Validation(format!("import is unrepairable: {e}")))?
    };

    let mut session = session;
    let mut new_id_generated = false;
    if options.generate_new_id {
        session.id = Uuid::new_v4();
        new_id_generated = true;
    }

    if options.preserve_timestamps {
        if session.created > session.last_modified {
            if options.strict {
                return Err(StoreError::Validation(
                    "imported session has created after lastModified".into(),
                ));
            }
            session.last_modified = session.created;
            warnings.push("clamped lastModified to created".into());
        }
    } else {
        let now = crate::types::now_ms();
        session.created = now;
        session.last_modified = now;
    }

    if let Some(root) = &options.workspace_root_override {
        session.workspace_root = root.clone();
    } else if session.workspace_root == PathBuf::from(WORKSPACE_REMOVED) {
        warnings.push("imported session has no workspace path".into());
    }
    session.version = CURRENT_SCHEMA_VERSION.to_string();
    session.validate()?;

    Ok(ParsedImport {
        session,
        new_id_generated,
        original_id,
        warnings,
    })
}

/// Fill structural gaps so the value deserializes as a current session.
fn repair_session_value(raw: &mut Value, warnings: &mut Vec<String>) {
    let Some(obj) = raw.as_object_mut() else {
        return;
    };
    let now = Utc::now().timestamp_millis();

    let valid_id = obj
        .get("id")
        .and_then(Value::as_str)
        .and_then(|s| Uuid::parse_str(s).ok())
        .is_some();
    if !valid_id {
        obj.insert("id".into(), json!(Uuid::new_v4().to_string()));
        warnings.push("assigned a fresh session id".into());
    }
    if !obj.get("version").is_some_and(Value::is_string) {
        obj.insert("version".into(), json!(CURRENT_SCHEMA_VERSION));
    }
    for field in ["created", "lastModified"] {
        if !obj.get(field).is_some_and(Value::is_i64) {
            obj.insert(field.into(), json!(now));
            warnings.push(format!("defaulted {field} to the current time"));
        }
    }
    if !obj.get("model").is_some_and(Value::is_string) {
        obj.insert("model".into(), json!("unknown"));
        warnings.push("defaulted model to \"unknown\"".into());
    }
    if !obj.get("workspaceRoot").is_some_and(Value::is_string) {
        obj.insert("workspaceRoot".into(), json!(WORKSPACE_REMOVED));
    }
    if !obj.get("tokenCount").is_some_and(Value::is_object) {
        obj.insert(
            "tokenCount".into(),
            json!({"total": 0, "input": 0, "output": 0}),
        );
    }
    for field in ["filesAccessed", "messages", "contextFiles", "tags"] {
        if !obj.get(field).is_some_and(Value::is_array) {
            obj.insert(field.into(), json!([]));
        }
    }
    for field in ["title", "notes"] {
        if !obj.contains_key(field) {
            obj.insert(field.into(), Value::Null);
        }
    }

    if let Some(messages) = obj.get_mut("messages").and_then(Value::as_array_mut) {
        for (idx, message) in messages.iter_mut().enumerate() {
            let Some(message) = message.as_object_mut() else {
                continue;
            };
            let missing_id = !message
                .get("id")
                .and_then(Value::as_str)
                .is_some_and(|s| !s.is_empty());
            if missing_id {
                message.insert("id".into(), json!(format!("msg-{}", Uuid::new_v4())));
                warnings.push(format!("assigned a fresh id to message {idx}"));
            }
            if !message.get("timestamp").is_some_and(Value::is_i64) {
                message.insert("timestamp".into(), json!(now));
            }
            if !message.get("role").is_some_and(Value::is_string) {
                message.insert("role".into(), json!("user"));
            }
            if message.get("content").is_none() {
                message.insert("content".into(), json!(""));
            }
        }
    }
}
