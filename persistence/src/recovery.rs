//! Safe-session wrapper: per-session failure tracking and recovery.
//!
//! Restoration failures are counted per session; past the threshold the
//! session is *problematic* and further attempts fail fast with recovery
//! options instead of retrying a broken file forever.

use crate::error::RecoveryOption;
use crate::error::Result;
use crate::error::StoreError;
use crate::manager::SessionManager;
use crate::storage::StorageBackend;
use crate::types::Session;
use crate::types::SessionMetadata;
use crate::validator::IndexValidator;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;
use tracing::warn;
use uuid::Uuid;

/// Restoration failures after which a session is blocked.
pub const DEFAULT_PROBLEMATIC_THRESHOLD: u32 = 3;

#[derive(Debug, Clone, Default)]
pub struct FailureRecord {
    pub failure_count: u32,
    pub last_error: Option<String>,
    pub problematic: bool,
}

/// Cleaned view of the sessions directory after a safety sweep.
#[derive(Debug, Clone, Default)]
pub struct AvailableSessionsReport {
    pub valid_sessions: Vec<SessionMetadata>,
    pub invalid_sessions: Vec<Uuid>,
    pub cleanup_performed: bool,
    pub warnings: Vec<String>,
}

pub struct SafeSessionManager {
    inner: Arc<SessionManager>,
    validator: IndexValidator,
    failures: RwLock<HashMap<Uuid, FailureRecord>>,
    threshold: u32,
}

impl SafeSessionManager {
    pub fn new(inner: Arc<SessionManager>) -> Self {
        let validator = IndexValidator::new(inner.storage());
        Self {
            inner,
            validator,
            failures: RwLock::new(HashMap::new()),
            threshold: DEFAULT_PROBLEMATIC_THRESHOLD,
        }
    }

    pub const fn with_threshold(mut self, threshold: u32) -> Self {
        self.threshold = threshold;
        self
    }

    pub fn manager(&self) -> &SessionManager {
        &self.inner
    }

    /// Recovery choices to surface for a failed restoration.
    pub const fn recovery_options(err: &StoreError) -> &'static [RecoveryOption] {
        err.recovery_options()
    }

    /// Restore with failure accounting. Problematic sessions fail fast.
    pub async fn restore_session_safely(&self, id: Uuid) -> Result<Session> {
        if self
            .failures
            .read()
            .await
            .get(&id)
            .is_some_and(|record| record.problematic)
        {
            return Err(StoreError::Problematic(id));
        }

        match self.inner.restore_session(id).await {
            Ok(session) => {
                self.failures.write().await.remove(&id);
                Ok(session)
            }
            Err(err) => {
                self.record_failure(id, &err).await;
                Err(err)
            }
        }
    }

    pub async fn mark_problematic(&self, id: Uuid, reason: &str) {
        let mut failures = self.failures.write().await;
        let record = failures.entry(id).or_default();
        record.problematic = true;
        record.last_error = Some(reason.to_string());
        warn!(session = %id, reason, "session marked problematic");
    }

    /// Forget a session's failure history (e.g. after the user picks
    /// `retry`).
    pub async fn clear_failures(&self, id: Uuid) {
        self.failures.write().await.remove(&id);
    }

    pub async fn failure_record(&self, id: Uuid) -> Option<FailureRecord> {
        self.failures.read().await.get(&id).cloned()
    }

    async fn record_failure(&self, id: Uuid, err: &StoreError) {
        let mut failures = self.failures.write().await;
        let record = failures.entry(id).or_default();
        record.failure_count += 1;
        record.last_error = Some(err.to_string());
        if record.failure_count >= self.threshold {
            record.problematic = true;
            warn!(
                session = %id,
                failures = record.failure_count,
                "session exceeded the failure threshold"
            );
        }
    }

    /// Sweep the directory: heal index orphans, adopt readable unindexed
    /// files, drop unreadable ones, and return the cleaned view.
    pub async fn detect_available_sessions_safely(&self) -> Result<AvailableSessionsReport> {
        let mut report = AvailableSessionsReport::default();
        let storage = self.inner.storage();

        let orphan_sweep = self.validator.cleanup_orphaned_entries().await?;
        if !orphan_sweep.orphaned_entries_removed.is_empty() {
            report.cleanup_performed = true;
            for id in &orphan_sweep.orphaned_entries_removed {
                report
                    .warnings
                    .push(format!("removed index entry for missing session {id}"));
            }
        }

        for path in &orphan_sweep.orphaned_files {
            let Some(id) = path
                .file_stem()
                .and_then(|s| s.to_str())
                .and_then(|s| Uuid::parse_str(s).ok())
            else {
                continue;
            };
            let probe = self.validator.validate_session_file(id).await;
            if probe.structural_ok {
                // Adoptable: the file is fine, only the index forgot it.
                match storage.read_session(id).await {
                    Ok(session) => {
                        storage
                            .update_index(SessionMetadata::from_session(&session))
                            .await?;
                        report.cleanup_performed = true;
                        report
                            .warnings
                            .push(format!("re-indexed unlisted session {id}"));
                    }
                    Err(err) => {
                        report
                            .warnings
                            .push(format!("unlisted session {id} failed to load: {err}"));
                        report.invalid_sessions.push(id);
                    }
                }
            } else {
                storage.fs().delete_if_exists(path).await?;
                report.cleanup_performed = true;
                report.invalid_sessions.push(id);
                report
                    .warnings
                    .push(format!("removed unreadable session file {}", path.display()));
            }
        }

        // Validate everything the index lists.
        let mut index = storage.get_index().await?;
        let mut corrupted = Vec::new();
        for (id, metadata) in &index.sessions {
            let probe = self.validator.validate_session_file(*id).await;
            if probe.is_healthy() {
                report.valid_sessions.push(metadata.clone());
            } else {
                corrupted.push(*id);
                for error in probe.errors {
                    report.warnings.push(format!("session {id}: {error}"));
                }
            }
        }

        if !corrupted.is_empty() {
            self.validator.create_index_backup().await?;
            for id in &corrupted {
                index.remove(id);
                storage
                    .fs()
                    .delete_if_exists(&storage.session_path(*id))
                    .await?;
                self.mark_problematic(*id, "failed validation during detection")
                    .await;
            }
            storage.replace_index(&index, false).await?;
            report.cleanup_performed = true;
            report.invalid_sessions.extend(corrupted);
        }

        report
            .valid_sessions
            .sort_by(|a, b| b.last_modified.cmp(&a.last_modified));
        info!(
            valid = report.valid_sessions.len(),
            invalid = report.invalid_sessions.len(),
            cleaned = report.cleanup_performed,
            "session detection sweep finished"
        );
        Ok(report)
    }
}
