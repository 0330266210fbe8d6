//! Index validator: detects divergence between the index and the session
//! files and heals it.
//!
//! An *orphaned entry* is an index record whose file is missing; an
//! *orphaned file* is a session file the index does not list. The validator
//! always writes a timestamped index backup before touching the index, and
//! can restore from the most recent backup.

use crate::error::Result;
use crate::error::StoreError;
use crate::storage::SessionStorage;
use crate::storage::StorageBackend;
use crate::types::CURRENT_SCHEMA_VERSION;
use crate::types::Session;
use chrono::Utc;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing::warn;
use uuid::Uuid;

/// Outcome of probing one session file.
#[derive(Debug, Clone, Default)]
pub struct SessionFileReport {
    pub exists: bool,
    pub readable: bool,
    pub structural_ok: bool,
    pub errors: Vec<String>,
}

impl SessionFileReport {
    pub fn is_healthy(&self) -> bool {
        self.exists && self.readable && self.structural_ok
    }
}

/// Outcome of an orphan sweep.
#[derive(Debug, Clone, Default)]
pub struct OrphanCleanupReport {
    pub orphaned_entries_removed: Vec<Uuid>,
    /// Session files the index does not list. Reported, not deleted; the
    /// recovery layer decides whether to adopt or drop them.
    pub orphaned_files: Vec<PathBuf>,
    pub backup_created: Option<PathBuf>,
}

pub struct IndexValidator {
    storage: Arc<SessionStorage>,
}

impl IndexValidator {
    pub fn new(storage: Arc<SessionStorage>) -> Self {
        Self { storage }
    }

    /// Probe a session file without mutating anything.
    ///
    /// A file on an older schema version counts as structurally sound as
    /// long as its envelope decodes; migration happens on read, not here.
    pub async fn validate_session_file(&self, id: Uuid) -> SessionFileReport {
        let mut report = SessionFileReport::default();
        let path = self.storage.session_path(id);

        report.exists = self.storage.fs().file_exists(&path).await;
        if !report.exists {
            report.errors.push(format!("{} does not exist", path.display()));
            return report;
        }

        let bytes = match self.storage.fs().safe_read_file(&path).await {
            Ok(bytes) => bytes,
            Err(err) => {
                report.errors.push(err.to_string());
                return report;
            }
        };
        report.readable = true;

        match self.storage.decode_envelope(&bytes) {
            Ok((version, payload)) => {
                if version == CURRENT_SCHEMA_VERSION {
                    match serde_json::from_value::<Session>(payload) {
                        Ok(session) => match session.validate() {
                            Ok(()) => report.structural_ok = true,
                            Err(err) => report.errors.push(err.to_string()),
                        },
                        Err(err) => report
                            .errors
                            .push(format!("payload fails the current schema: {err}")),
                    }
                } else if payload.is_object() {
                    report.structural_ok = true;
                } else {
                    report
                        .errors
                        .push("payload is not a JSON object".to_string());
                }
            }
            Err(err) => report.errors.push(err.to_string()),
        }
        report
    }

    /// Write `index.json.backup.<timestamp>` with the current index content.
    pub async fn create_index_backup(&self) -> Result<PathBuf> {
        // Materializes the index first so there is always content to back up.
        self.storage.get_index().await?;
        let index_path = self.storage.index_path();
        let bytes = self.storage.fs().safe_read_file(&index_path).await?;
        let stamp = Utc::now().format("%Y-%m-%dT%H-%M-%S-%3fZ");
        let backup = self
            .storage
            .fs()
            .root()
            .join(format!("index.json.backup.{stamp}"));
        self.storage
            .fs()
            .atomic_write_file(&backup, &bytes, false)
            .await?;
        info!(backup = %backup.display(), "created index backup");
        Ok(backup)
    }

    /// Remove index entries whose files are gone and report unindexed files.
    pub async fn cleanup_orphaned_entries(&self) -> Result<OrphanCleanupReport> {
        let mut report = OrphanCleanupReport::default();
        let mut index = self.storage.get_index().await?;
        let files = self.storage.fs().list_session_files().await?;
        let on_disk: HashSet<Uuid> = files.iter().map(|(id, _)| *id).collect();

        let orphaned_entries: Vec<Uuid> = index
            .sessions
            .keys()
            .filter(|id| !on_disk.contains(id))
            .copied()
            .collect();
        report.orphaned_files = files
            .iter()
            .filter(|(id, _)| !index.sessions.contains_key(id))
            .map(|(_, path)| path.clone())
            .collect();

        if !orphaned_entries.is_empty() {
            report.backup_created = Some(self.create_index_backup().await?);
            for id in &orphaned_entries {
                index.remove(id);
                warn!(session = %id, "removed orphaned index entry");
            }
            self.storage.replace_index(&index, false).await?;
            report.orphaned_entries_removed = orphaned_entries;
        }

        Ok(report)
    }

    /// Replace the index with the most recent timestamped backup.
    pub async fn restore_index_from_backup(&self) -> Result<PathBuf> {
        let backups = self.storage.list_index_backups().await?;
        let latest = backups
            .last()
            .cloned()
            .ok_or_else(|| StoreError::PathNotFound(self.storage.index_path()))?;
        let bytes = self.storage.fs().safe_read_file(&latest).await?;
        let index = serde_json::from_slice(&bytes).map_err(|e| {
            StoreError::CorruptedData(format!(
                "index backup {} is not valid: {e}",
                latest.display()
            ))
        })?;
        self.storage.replace_index(&index, false).await?;
        info!(backup = %latest.display(), "restored index from backup");
        Ok(latest)
    }
}
