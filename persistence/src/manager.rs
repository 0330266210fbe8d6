//! High-level session management: lifecycle, auto-save, listing, cleanup,
//! and the host-facing API surface.
//!
//! The manager owns the single "current session" slot. UI concerns reach
//! the engine only through the injected collaborator handlers.

use crate::audit::AuditConfig;
use crate::audit::AuditLogger;
use crate::cache::CacheConfig;
use crate::cache::MetadataCache;
use crate::config::EngineConfig;
use crate::error::Result;
use crate::error::StoreError;
use crate::export;
use crate::export::ExportOptions;
use crate::export::ExportOutput;
use crate::export::ImportOptions;
use crate::fsio::FsConfig;
use crate::fsio::FsLayer;
use crate::search::FilterCriteria;
use crate::search::SearchEngine;
use crate::search::SearchOptions;
use crate::search::SearchResult;
use crate::storage::SessionStorage;
use crate::storage::StorageBackend;
use crate::storage::StorageConfig;
use crate::storage::StorageStats;
use crate::storage::select_cleanup_victims;
use crate::tasks::BackgroundTask;
use crate::tasks::BackgroundTaskManager;
use crate::tasks::TaskKind;
use crate::types::CURRENT_SCHEMA_VERSION;
use crate::types::Session;
use crate::types::SessionIndex;
use crate::types::SessionMetadata;
use crate::types::TokenCount;
use chrono::Utc;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::sync::RwLock;
use tracing::error;
use tracing::info;
use tracing::warn;
use uuid::Uuid;

/// Cap on the auto-save retry backoff.
const AUTO_SAVE_BACKOFF_CAP: Duration = Duration::from_secs(30);

/// Retry budget used when auto-save is configured from [`EngineConfig`].
const AUTO_SAVE_DEFAULT_RETRIES: u32 = 3;

/// Host-provided prompt for destructive operations.
pub trait ConfirmationHandler: Send + Sync {
    fn confirm(&self, message: &str, details: &str) -> bool;
}

/// Host-provided sink for non-fatal notifications.
pub trait NotificationHandler: Send + Sync {
    fn notify(&self, message: &str);
}

/// External collaborators injected by the host.
#[derive(Clone, Default)]
pub struct Collaborators {
    pub confirmation: Option<Arc<dyn ConfirmationHandler>>,
    pub notifications: Option<Arc<dyn NotificationHandler>>,
    /// Workspace supplying migration defaults; falls back to the process
    /// working directory.
    pub workspace_root: Option<PathBuf>,
}

#[derive(Debug, Clone, Default)]
pub struct CreateSessionOptions {
    pub model: String,
    pub workspace_root: PathBuf,
    pub provider: Option<String>,
    pub title: Option<String>,
    pub tags: Vec<String>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct LoadOptions {
    pub validate_integrity: bool,
    pub update_timestamp: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortBy {
    Created,
    LastModified,
    MessageCount,
    TokenCount,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Asc,
    Desc,
}

#[derive(Debug, Clone)]
pub struct ListOptions {
    pub sort_by: SortBy,
    pub sort_order: SortOrder,
    pub limit: Option<usize>,
    pub offset: usize,
    /// Exact model filter.
    pub model: Option<String>,
    /// Session matches when it carries any of these tags.
    pub tags: Option<Vec<String>>,
}

impl Default for ListOptions {
    fn default() -> Self {
        Self {
            sort_by: SortBy::LastModified,
            sort_order: SortOrder::Desc,
            limit: None,
            offset: 0,
            model: None,
            tags: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CleanupOptions {
    pub max_count: usize,
    pub max_age: Duration,
    pub create_backups: bool,
    pub show_notifications: bool,
    pub dry_run: bool,
}

#[derive(Debug, Clone, Default)]
pub struct CleanupReport {
    pub deleted_sessions: Vec<Uuid>,
    pub deleted_by_age: usize,
    pub deleted_by_count: usize,
    /// Estimated as `messages * 500 + tokens * 4` bytes per session.
    pub space_freed_bytes: u64,
    pub errors: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct AutoSaveConfig {
    pub enabled: bool,
    pub interval: Duration,
    pub max_retries: u32,
}

impl AutoSaveConfig {
    pub fn validate(&self) -> Result<()> {
        if self.interval.is_zero() {
            return Err(StoreError::ConfigInvalid(
                "auto-save interval must be positive".into(),
            ));
        }
        if self.interval < Duration::from_secs(1) {
            warn!(
                interval_ms = self.interval.as_millis() as u64,
                "auto-save interval below one second"
            );
        }
        Ok(())
    }
}

/// Context-file partition produced by [`SessionManager::restore_session_with_context`].
#[derive(Debug, Clone, Default)]
pub struct ContextReport {
    pub found: Vec<PathBuf>,
    pub missing: Vec<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct ImportReport {
    pub session: Session,
    pub new_id_generated: bool,
    pub original_id: Option<String>,
    pub warnings: Vec<String>,
    pub missing_context_files: Vec<PathBuf>,
}

pub struct SessionManager {
    config: EngineConfig,
    storage: Arc<SessionStorage>,
    search: SearchEngine,
    cache: Option<Arc<MetadataCache>>,
    audit: Option<Arc<AuditLogger>>,
    current: Arc<RwLock<Option<Session>>>,
    collaborators: Collaborators,
    auto_save_task: Mutex<Option<tokio::task::JoinHandle<()>>>,
    auto_save_active: Arc<AtomicBool>,
}

impl SessionManager {
    pub async fn new(config: EngineConfig) -> Result<Self> {
        Self::with_collaborators(config, Collaborators::default()).await
    }

    pub async fn with_collaborators(
        config: EngineConfig,
        collaborators: Collaborators,
    ) -> Result<Self> {
        config.validate()?;

        let fs = FsLayer::new(
            &config.sessions_dir,
            FsConfig {
                max_read_size: config.max_file_size,
                ..FsConfig::default()
            },
        );
        let workspace_root = collaborators
            .workspace_root
            .clone()
            .or_else(|| std::env::current_dir().ok())
            .unwrap_or_default();
        let storage = Arc::new(
            SessionStorage::new(
                fs,
                StorageConfig {
                    compression_enabled: config.compression_enabled,
                    checksum_enabled: config.checksum_enabled,
                    create_backups: config.create_backups,
                },
                workspace_root,
            )
            .await?,
        );

        let audit = if config.audit_logging {
            Some(Arc::new(
                AuditLogger::new(
                    &config.sessions_dir,
                    AuditConfig {
                        level: config.audit_log_level,
                        ..AuditConfig::default()
                    },
                )
                .await?,
            ))
        } else {
            None
        };
        let cache = config
            .index_caching
            .then(|| Arc::new(MetadataCache::new(CacheConfig::default())));

        let manager = Self {
            search: SearchEngine::new(storage.clone()),
            storage,
            cache,
            audit,
            current: Arc::new(RwLock::new(None)),
            collaborators,
            auto_save_task: Mutex::new(None),
            auto_save_active: Arc::new(AtomicBool::new(false)),
            config,
        };

        if manager.config.auto_save_enabled {
            manager
                .configure_auto_save(AutoSaveConfig {
                    enabled: true,
                    interval: Duration::from_millis(manager.config.auto_save_interval_ms),
                    max_retries: AUTO_SAVE_DEFAULT_RETRIES,
                })
                .await?;
        }
        Ok(manager)
    }

    pub const fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn storage(&self) -> Arc<SessionStorage> {
        self.storage.clone()
    }

    pub async fn current_session(&self) -> Option<Session> {
        self.current.read().await.clone()
    }

    // ---- lifecycle ------------------------------------------------------

    pub async fn create_session(&self, options: CreateSessionOptions) -> Result<Session> {
        let now = crate::types::now_ms();
        let session = Session {
            id: Uuid::new_v4(),
            version: CURRENT_SCHEMA_VERSION.to_string(),
            created: now,
            last_modified: now,
            model: options.model,
            provider: options.provider,
            workspace_root: options.workspace_root,
            token_count: TokenCount::default(),
            files_accessed: Vec::new(),
            messages: Vec::new(),
            context_files: Vec::new(),
            tags: options.tags,
            title: options.title,
            notes: options.notes,
        };

        let id = session.id;
        self.audited("create_session", Some(id), || async {
            let metadata = self.storage.write_session(&session).await?;
            self.cache_metadata(metadata);
            Ok(())
        })
        .await?;

        *self.current.write().await = Some(session.clone());
        info!(session = %id, model = %session.model, "created session");
        Ok(session)
    }

    /// Persist a session, advancing `lastModified` strictly past its prior
    /// value (by one millisecond when the clock has not moved).
    pub async fn save_session(&self, mut session: Session) -> Result<Session> {
        let now = crate::types::now_ms();
        session.last_modified = if now > session.last_modified {
            now
        } else {
            session.last_modified + chrono::Duration::milliseconds(1)
        };

        let id = session.id;
        self.audited("save_session", Some(id), || async {
            let metadata = self.storage.write_session(&session).await?;
            self.cache_metadata(metadata);
            Ok(())
        })
        .await?;

        let mut current = self.current.write().await;
        if current.as_ref().is_some_and(|c| c.id == id) {
            *current = Some(session.clone());
        }
        Ok(session)
    }

    pub async fn load_session(&self, id: Uuid, options: LoadOptions) -> Result<Session> {
        let session = self
            .audited("load_session", Some(id), || async {
                self.storage.read_session(id).await
            })
            .await?;
        if options.validate_integrity {
            session.validate()?;
        }
        let session = if options.update_timestamp {
            self.save_session(session).await?
        } else {
            self.cache_metadata(SessionMetadata::from_session(&session));
            session
        };
        Ok(session)
    }

    /// Delete unconditionally; errors when the session does not exist.
    pub async fn delete_session(&self, id: Uuid) -> Result<()> {
        self.audited("delete_session", Some(id), || async {
            self.storage.delete_session(id).await
        })
        .await?;

        let mut current = self.current.write().await;
        if current.as_ref().is_some_and(|c| c.id == id) {
            *current = None;
        }
        drop(current);
        if let Some(cache) = &self.cache {
            cache.invalidate(id);
            cache.invalidate_index();
        }
        Ok(())
    }

    /// Confirmed delete. Without `force`, the decision goes through the
    /// confirmation handler; no handler means no deletion.
    pub async fn delete_session_with_confirmation(&self, id: Uuid, force: bool) -> Result<bool> {
        if !force {
            let Some(handler) = &self.collaborators.confirmation else {
                warn!(session = %id, "no confirmation handler; refusing unforced delete");
                return Ok(false);
            };
            let details = match self.get_session_metadata(id).await {
                Ok(metadata) => format!(
                    "{} messages, last modified {}",
                    metadata.message_count, metadata.last_modified
                ),
                Err(_) => String::new(),
            };
            if !handler.confirm(&format!("Delete session {id}?"), &details) {
                return Ok(false);
            }
        }
        self.storage.create_backup(id).await?;
        self.delete_session(id).await?;
        Ok(true)
    }

    /// Load with integrity validation and a timestamp bump, then make the
    /// session current.
    pub async fn restore_session(&self, id: Uuid) -> Result<Session> {
        let session = self
            .load_session(
                id,
                LoadOptions {
                    validate_integrity: true,
                    update_timestamp: true,
                },
            )
            .await?;
        *self.current.write().await = Some(session.clone());
        info!(session = %id, "restored session");
        Ok(session)
    }

    /// Restore plus a found/missing partition of the context files.
    pub async fn restore_session_with_context(
        &self,
        id: Uuid,
    ) -> Result<(Session, ContextReport)> {
        let session = self.restore_session(id).await?;
        let mut report = ContextReport::default();
        for file in &session.context_files {
            if tokio::fs::try_exists(file).await.unwrap_or(false) {
                report.found.push(file.clone());
            } else {
                report.missing.push(file.clone());
            }
        }
        Ok((session, report))
    }

    /// Boolean integrity check; [`Session::validate`] is the throwing form.
    pub fn validate_session_integrity(&self, session: &Session) -> bool {
        session.is_valid()
    }

    pub async fn get_session_metadata(&self, id: Uuid) -> Result<SessionMetadata> {
        if let Some(current) = self.current.read().await.as_ref()
            && current.id == id
        {
            return Ok(SessionMetadata::from_session(current));
        }
        if let Some(cache) = &self.cache
            && let Some(metadata) = cache.get(id)
        {
            return Ok(metadata);
        }
        let index = self.load_index().await?;
        index
            .sessions
            .get(&id)
            .cloned()
            .ok_or(StoreError::NotFound(id))
    }

    // ---- auto-save ------------------------------------------------------

    /// (Re)configure the auto-save timer; stops any running task first.
    pub async fn configure_auto_save(&self, config: AutoSaveConfig) -> Result<()> {
        config.validate()?;
        self.stop_auto_save().await;
        if !config.enabled {
            return Ok(());
        }

        self.auto_save_active.store(true, Ordering::SeqCst);
        let storage = self.storage.clone();
        let current = self.current.clone();
        let cache = self.cache.clone();
        let notifications = self.collaborators.notifications.clone();
        let active = self.auto_save_active.clone();

        let handle = tokio::spawn(async move {
            let mut retry = 0u32;
            loop {
                let delay = if retry == 0 {
                    config.interval
                } else {
                    (config.interval * 2u32.saturating_pow(retry - 1)).min(AUTO_SAVE_BACKOFF_CAP)
                };
                tokio::time::sleep(delay).await;
                if !active.load(Ordering::SeqCst) {
                    break;
                }

                match Self::autosave_once(&storage, &current, cache.as_deref()).await {
                    Ok(()) => retry = 0,
                    Err(err) => {
                        retry += 1;
                        warn!(%err, retry, "auto-save failed");
                        if retry > config.max_retries {
                            error!("auto-save disabled after exhausting retries");
                            active.store(false, Ordering::SeqCst);
                            if let Some(notifications) = &notifications {
                                notifications.notify(&format!(
                                    "Auto-save disabled after {} failed attempts: {err}",
                                    config.max_retries
                                ));
                            }
                            break;
                        }
                    }
                }
            }
        });
        *self.auto_save_task.lock().await = Some(handle);
        Ok(())
    }

    pub async fn stop_auto_save(&self) {
        self.auto_save_active.store(false, Ordering::SeqCst);
        if let Some(handle) = self.auto_save_task.lock().await.take() {
            handle.abort();
        }
    }

    pub fn auto_save_running(&self) -> bool {
        self.auto_save_active.load(Ordering::SeqCst)
    }

    /// Persist the current session immediately.
    pub async fn force_auto_save(&self) -> Result<()> {
        if self.current.read().await.is_none() {
            return Err(StoreError::AutoSaveFailed(
                "no current session to save".into(),
            ));
        }
        Self::autosave_once(&self.storage, &self.current, self.cache.as_deref()).await
    }

    async fn autosave_once(
        storage: &SessionStorage,
        current: &RwLock<Option<Session>>,
        cache: Option<&MetadataCache>,
    ) -> Result<()> {
        let snapshot = current.read().await.clone();
        let Some(mut session) = snapshot else {
            return Ok(());
        };
        let now = crate::types::now_ms();
        session.last_modified = if now > session.last_modified {
            now
        } else {
            session.last_modified + chrono::Duration::milliseconds(1)
        };
        let metadata = storage.write_session(&session).await?;
        if let Some(cache) = cache {
            cache.insert(metadata);
            cache.invalidate_index();
        }

        let mut slot = current.write().await;
        if slot.as_ref().is_some_and(|c| c.id == session.id) {
            *slot = Some(session);
        }
        Ok(())
    }

    // ---- listing and retention ------------------------------------------

    pub async fn list_sessions(&self, options: &ListOptions) -> Result<Vec<SessionMetadata>> {
        let index = self.load_index().await?;
        let mut sessions: Vec<SessionMetadata> = index
            .sessions
            .values()
            .filter(|metadata| {
                let model_ok = options
                    .model
                    .as_ref()
                    .is_none_or(|model| metadata.model == *model);
                let tags_ok = options.tags.as_ref().is_none_or(|tags| {
                    tags.iter().any(|tag| metadata.tags.contains(tag))
                });
                model_ok && tags_ok
            })
            .cloned()
            .collect();

        sessions.sort_by(|a, b| {
            let ordering = match options.sort_by {
                SortBy::Created => a.created.cmp(&b.created),
                SortBy::LastModified => a.last_modified.cmp(&b.last_modified),
                SortBy::MessageCount => a.message_count.cmp(&b.message_count),
                SortBy::TokenCount => a.token_count.total.cmp(&b.token_count.total),
            }
            .then_with(|| a.id.cmp(&b.id));
            match options.sort_order {
                SortOrder::Asc => ordering,
                SortOrder::Desc => ordering.reverse(),
            }
        });

        let sessions: Vec<SessionMetadata> = sessions
            .into_iter()
            .skip(options.offset)
            .take(options.limit.unwrap_or(usize::MAX))
            .collect();
        Ok(sessions)
    }

    /// Retention sweep. Dry runs report victims without touching disk.
    pub async fn cleanup_old_sessions(&self, options: &CleanupOptions) -> Result<CleanupReport> {
        let index = self.storage.get_index().await?;
        let victims =
            select_cleanup_victims(&index, options.max_count, options.max_age, Utc::now());
        let mut report = CleanupReport::default();

        let estimate = |id: &Uuid| -> u64 {
            index.sessions.get(id).map_or(0, |m| {
                m.message_count as u64 * 500 + m.token_count.total * 4
            })
        };

        if options.dry_run {
            report.deleted_sessions = victims.all();
            report.deleted_by_age = victims.by_age.len();
            report.deleted_by_count = victims.by_count.len();
            report.space_freed_bytes = report.deleted_sessions.iter().map(estimate).sum();
            return Ok(report);
        }

        for id in victims.all() {
            if options.create_backups
                && let Err(err) = self.storage.create_backup(id).await
            {
                report.errors.push(format!("backup of {id} failed: {err}"));
            }
            match self.storage.delete_session(id).await {
                Ok(()) => {
                    report.space_freed_bytes += estimate(&id);
                    report.deleted_sessions.push(id);
                    if let Some(cache) = &self.cache {
                        cache.invalidate(id);
                    }
                }
                Err(err) => report.errors.push(format!("delete of {id} failed: {err}")),
            }
        }
        report.deleted_by_age = victims
            .by_age
            .iter()
            .filter(|id| report.deleted_sessions.contains(id))
            .count();
        report.deleted_by_count = victims
            .by_count
            .iter()
            .filter(|id| report.deleted_sessions.contains(id))
            .count();
        if let Some(cache) = &self.cache {
            cache.invalidate_index();
        }

        if options.show_notifications
            && let Some(notifications) = &self.collaborators.notifications
        {
            let mut message = format!(
                "Cleaned up {} sessions (~{} KiB freed)",
                report.deleted_sessions.len(),
                report.space_freed_bytes / 1024
            );
            if let Ok(stats) = self.storage.stats().await {
                let advisory_limit = self.config.max_file_size * self.config.max_sessions as u64;
                if stats.total_size_bytes > advisory_limit {
                    message.push_str("; session storage is still over the advisory limit");
                }
            }
            notifications.notify(&message);
        }

        if let Some(audit) = &self.audit {
            let mut entry = audit.success("cleanup_old_sessions", None);
            entry.context = Some(serde_json::json!({
                "deleted": report.deleted_sessions.len(),
                "byAge": report.deleted_by_age,
                "byCount": report.deleted_by_count,
            }));
            if let Err(err) = audit.log(entry).await {
                warn!(%err, "failed to audit cleanup");
            }
        }
        Ok(report)
    }

    // ---- search / export ------------------------------------------------

    pub async fn search_sessions(
        &self,
        query: &str,
        options: &SearchOptions,
    ) -> Result<Vec<SearchResult>> {
        self.search.search_sessions(query, options).await
    }

    pub async fn filter_sessions(
        &self,
        criteria: &FilterCriteria,
    ) -> Result<Vec<SessionMetadata>> {
        self.search.filter_sessions(criteria).await
    }

    /// Export options seeded from the engine configuration.
    pub fn default_export_options(&self) -> ExportOptions {
        ExportOptions {
            sanitize: self.config.sanitize_exports,
            ..ExportOptions::default()
        }
    }

    pub async fn export_session(
        &self,
        id: Uuid,
        options: &ExportOptions,
    ) -> Result<ExportOutput> {
        self.audited("export_session", Some(id), || async {
            let session = self.storage.read_session(id).await?;
            export::export_session(&session, options, Utc::now())
        })
        .await
    }

    pub async fn import_session(
        &self,
        content: &str,
        options: &ImportOptions,
    ) -> Result<ImportReport> {
        let parsed = export::parse_import(content, options)?;
        let mut session = parsed.session;
        let mut warnings = parsed.warnings;
        let mut new_id_generated = parsed.new_id_generated;

        if !new_id_generated && self.storage.session_exists(session.id).await? {
            if options.strict {
                return Err(StoreError::AlreadyExists(session.id));
            }
            let old = session.id;
            session.id = Uuid::new_v4();
            new_id_generated = true;
            warnings.push(format!("session {old} already exists; assigned a new id"));
        }

        let id = session.id;
        self.audited("import_session", Some(id), || async {
            let metadata = self.storage.write_session(&session).await?;
            self.cache_metadata(metadata);
            Ok(())
        })
        .await?;

        let mut missing_context_files = Vec::new();
        for file in &session.context_files {
            if !tokio::fs::try_exists(file).await.unwrap_or(false) {
                missing_context_files.push(file.clone());
            }
        }

        Ok(ImportReport {
            session,
            new_id_generated,
            original_id: parsed.original_id,
            warnings,
            missing_context_files,
        })
    }

    // ---- maintenance ----------------------------------------------------

    /// Queue periodic maintenance on `tasks`: a retention sweep driven by
    /// the configured `max_sessions`/`max_age_ms` when `background_cleanup`
    /// is on, and cache expiry when the metadata cache is enabled.
    pub async fn schedule_maintenance(&self, tasks: &BackgroundTaskManager) {
        if self.config.background_cleanup {
            let storage = self.storage.clone();
            let max_count = self.config.max_sessions;
            let max_age = Duration::from_millis(self.config.max_age_ms);
            tasks
                .submit(
                    BackgroundTask::new("retention-sweep", TaskKind::Cleanup, 3, move || {
                        let storage = storage.clone();
                        async move {
                            let deleted =
                                storage.cleanup_old_sessions(max_count, max_age).await?;
                            if !deleted.is_empty() {
                                info!(deleted = deleted.len(), "background retention sweep");
                            }
                            Ok(())
                        }
                    })
                    .with_retries(1),
                )
                .await;
        }
        if let Some(cache) = &self.cache {
            let cache = cache.clone();
            tasks
                .submit(BackgroundTask::new(
                    "cache-maintenance",
                    TaskKind::CacheMaintenance,
                    1,
                    move || {
                        let cache = cache.clone();
                        async move {
                            cache.maintenance();
                            Ok(())
                        }
                    },
                ))
                .await;
        }
    }

    pub async fn stats(&self) -> Result<StorageStats> {
        self.storage.stats().await
    }

    pub async fn repair_permissions(&self) -> Result<u32> {
        self.storage.fs().repair_permissions().await
    }

    /// Stop the auto-save task and flush the current session.
    pub async fn shutdown(&self) -> Result<()> {
        self.stop_auto_save().await;
        if self.current.read().await.is_some() {
            Self::autosave_once(&self.storage, &self.current, self.cache.as_deref()).await?;
        }
        info!("session manager shut down");
        Ok(())
    }

    async fn load_index(&self) -> Result<SessionIndex> {
        if let Some(cache) = &self.cache {
            if let Some(index) = cache.get_index() {
                return Ok(index);
            }
            let index = self.storage.get_index().await?;
            cache.put_index(index.clone());
            return Ok(index);
        }
        self.storage.get_index().await
    }

    fn cache_metadata(&self, metadata: SessionMetadata) {
        if let Some(cache) = &self.cache {
            cache.insert(metadata);
            cache.invalidate_index();
        }
    }

    async fn audited<T, F, Fut>(&self, operation: &str, id: Option<Uuid>, f: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        match &self.audit {
            Some(audit) => audit.log_operation(operation, id, f).await,
            None => f().await,
        }
    }
}
