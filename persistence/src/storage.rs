//! Session file and index storage.
//!
//! One `<UUIDv4>.json` per session (VersionedSession envelope) plus a single
//! `index.json` secondary index. All mutations go through a per-process
//! write lock, so session-file and index updates are serialized; the index
//! is rebuilt from session files whenever it is missing or unparseable.

use crate::codec;
use crate::error::MigrationErrorKind;
use crate::error::Result;
use crate::error::StoreError;
use crate::fsio::FsLayer;
use crate::fsio::backup_path;
use crate::migration::MigrationManager;
use crate::types::SCHEMA_VERSION_CHAIN;
use crate::types::Session;
use crate::types::SessionIndex;
use crate::types::SessionMetadata;
use crate::types::VersionedSession;
use async_trait::async_trait;
use chrono::DateTime;
use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::sync::MutexGuard;
use tracing::debug;
use tracing::info;
use tracing::warn;
use uuid::Uuid;

/// How many timestamped index backups to keep on disk.
const INDEX_BACKUP_KEEP: usize = 20;

#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub compression_enabled: bool,
    pub checksum_enabled: bool,
    pub create_backups: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            compression_enabled: true,
            checksum_enabled: true,
            create_backups: true,
        }
    }
}

/// Aggregate on-disk footprint, surfaced as an advisory signal.
#[derive(Debug, Clone, Copy, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageStats {
    pub session_count: usize,
    pub total_size_bytes: u64,
    pub index_size_bytes: u64,
}

/// Sessions picked for deletion by the retention policy.
#[derive(Debug, Clone, Default)]
pub struct CleanupVictims {
    pub by_age: Vec<Uuid>,
    pub by_count: Vec<Uuid>,
}

impl CleanupVictims {
    pub fn all(&self) -> Vec<Uuid> {
        let mut all = self.by_age.clone();
        all.extend(&self.by_count);
        all
    }

    pub fn is_empty(&self) -> bool {
        self.by_age.is_empty() && self.by_count.is_empty()
    }
}

/// Storage seam consumed by the manager and the safe wrapper.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    async fn write_session(&self, session: &Session) -> Result<SessionMetadata>;
    async fn read_session(&self, id: Uuid) -> Result<Session>;
    async fn delete_session(&self, id: Uuid) -> Result<()>;
    async fn session_exists(&self, id: Uuid) -> Result<bool>;
    async fn get_index(&self) -> Result<SessionIndex>;
    async fn update_index(&self, metadata: SessionMetadata) -> Result<()>;
    async fn rebuild_index(&self) -> Result<SessionIndex>;
    async fn create_backup(&self, id: Uuid) -> Result<PathBuf>;
    async fn cleanup_old_sessions(&self, max_count: usize, max_age: Duration) -> Result<Vec<Uuid>>;
}

/// Production file-backed storage.
pub struct SessionStorage {
    fs: FsLayer,
    config: StorageConfig,
    migrator: MigrationManager,
    write_lock: Mutex<()>,
}

impl SessionStorage {
    /// Open (creating if needed) the sessions directory.
    ///
    /// `workspace_root` feeds migration defaults for pre-0.8.0 sessions.
    pub async fn new(
        fs: FsLayer,
        config: StorageConfig,
        workspace_root: PathBuf,
    ) -> Result<Self> {
        fs.ensure_sessions_directory().await?;
        let migrator = MigrationManager::new(fs.clone(), workspace_root)?;
        Ok(Self {
            fs,
            config,
            migrator,
            write_lock: Mutex::new(()),
        })
    }

    pub const fn fs(&self) -> &FsLayer {
        &self.fs
    }

    pub const fn migrator(&self) -> &MigrationManager {
        &self.migrator
    }

    pub fn session_path(&self, id: Uuid) -> PathBuf {
        self.fs.root().join(format!("{id}.json"))
    }

    pub fn index_path(&self) -> PathBuf {
        self.fs.root().join("index.json")
    }

    /// Serialize a session into its on-disk envelope.
    ///
    /// Compression is applied only when the base64 gzip blob is strictly
    /// smaller than the canonical JSON it replaces.
    pub fn encode_session(&self, session: &Session) -> Result<Vec<u8>> {
        session.validate()?;
        let value = serde_json::to_value(session)?;
        let canonical = serde_json::to_string(&value)?;
        let checksum = self
            .config
            .checksum_enabled
            .then(|| codec::sha256_hex(canonical.as_bytes()));

        let (compressed, data) = if self.config.compression_enabled {
            let encoded = codec::compress_to_base64(canonical.as_bytes())?;
            if encoded.len() < canonical.len() {
                (true, Value::String(encoded))
            } else {
                (false, value)
            }
        } else {
            (false, value)
        };

        let envelope = VersionedSession {
            version: session.version.clone(),
            compressed,
            checksum,
            data,
        };
        Ok(serde_json::to_vec(&envelope)?)
    }

    /// Parse an envelope and recover the inner session payload.
    ///
    /// Returns the embedded schema version and the payload object; callers
    /// decide whether migration is needed.
    pub fn decode_envelope(&self, bytes: &[u8]) -> Result<(String, Value)> {
        let envelope: VersionedSession = serde_json::from_slice(bytes)
            .map_err(|e| StoreError::CorruptedData(format!("invalid session envelope: {e}")))?;

        if !SCHEMA_VERSION_CHAIN.contains(&envelope.version.as_str()) {
            return Err(StoreError::Migration {
                kind: MigrationErrorKind::UnsupportedVersion,
                message: format!("unsupported schema version {}", envelope.version),
                rollback_available: false,
            });
        }

        let (payload, canonical) = if envelope.compressed {
            let Value::String(blob) = &envelope.data else {
                return Err(StoreError::CorruptedData(
                    "compressed envelope data is not a base64 string".into(),
                ));
            };
            let bytes = codec::decompress_from_base64(blob)?;
            let canonical = String::from_utf8(bytes).map_err(|e| {
                StoreError::CorruptedData(format!("session payload is not UTF-8: {e}"))
            })?;
            let payload: Value = serde_json::from_str(&canonical).map_err(|e| {
                StoreError::CorruptedData(format!("session payload is not valid JSON: {e}"))
            })?;
            (payload, canonical)
        } else {
            let canonical = serde_json::to_string(&envelope.data)?;
            (envelope.data, canonical)
        };

        if self.config.checksum_enabled
            && let Some(expected) = &envelope.checksum
            && !codec::verify_checksum(canonical.as_bytes(), expected)
        {
            return Err(StoreError::CorruptedData(format!(
                "checksum mismatch for schema version {}",
                envelope.version
            )));
        }

        Ok((envelope.version, payload))
    }

    /// Write the migrated form back to disk so the chain runs once.
    async fn persist_migrated(&self, session: &Session) -> Result<SessionMetadata> {
        let bytes = self.encode_session(session)?;
        let guard = self.write_lock.lock().await;
        self.fs
            .atomic_write_file(&self.session_path(session.id), &bytes, true)
            .await?;
        let metadata = SessionMetadata::from_session(session);
        self.update_index_locked(&guard, metadata.clone()).await?;
        Ok(metadata)
    }

    async fn update_index_locked(
        &self,
        _guard: &MutexGuard<'_, ()>,
        metadata: SessionMetadata,
    ) -> Result<()> {
        let mut index = self.load_index_or_rebuild_locked(_guard).await?;
        index.upsert(metadata);
        self.write_index_locked(_guard, &index, true).await
    }

    /// Load the index, rebuilding from session files when it is missing or
    /// corrupt. The session files are authoritative.
    async fn load_index_or_rebuild_locked(
        &self,
        guard: &MutexGuard<'_, ()>,
    ) -> Result<SessionIndex> {
        match self.fs.safe_read_file(&self.index_path()).await {
            Ok(bytes) => match serde_json::from_slice::<SessionIndex>(&bytes) {
                Ok(index) => Ok(index),
                Err(err) => {
                    warn!(%err, "session index is corrupt, rebuilding");
                    self.rebuild_index_locked(guard).await
                }
            },
            Err(StoreError::PathNotFound(_)) => self.rebuild_index_locked(guard).await,
            Err(err) => Err(err),
        }
    }

    async fn rebuild_index_locked(&self, _guard: &MutexGuard<'_, ()>) -> Result<SessionIndex> {
        let mut index = SessionIndex::new();
        for (id, path) in self.fs.list_session_files().await? {
            let bytes = match self.fs.safe_read_file(&path).await {
                Ok(bytes) => bytes,
                Err(err) => {
                    warn!(session = %id, %err, "skipping unreadable session during rebuild");
                    continue;
                }
            };
            let session = match self.decode_envelope(&bytes).and_then(|(_, payload)| {
                serde_json::from_value::<Session>(payload).map_err(StoreError::from)
            }) {
                Ok(session) => session,
                Err(err) => {
                    warn!(session = %id, %err, "skipping undecodable session during rebuild");
                    continue;
                }
            };
            index.upsert(SessionMetadata::from_session(&session));
        }
        // No timestamped backup during rebuild: the index was already lost
        // or absent, and cascading backup failures would mask the rebuild.
        self.write_index_locked(_guard, &index, false).await?;
        info!(sessions = index.len(), "rebuilt session index");
        Ok(index)
    }

    async fn write_index_locked(
        &self,
        _guard: &MutexGuard<'_, ()>,
        index: &SessionIndex,
        backup: bool,
    ) -> Result<()> {
        let path = self.index_path();
        if backup && self.fs.file_exists(&path).await {
            let prior = self.fs.safe_read_file(&path).await?;
            let stamp = Utc::now().format("%Y-%m-%dT%H-%M-%S-%3fZ");
            let backup_file = self.fs.root().join(format!("index.json.backup.{stamp}"));
            self.fs.atomic_write_file(&backup_file, &prior, false).await?;
            self.prune_index_backups().await?;
        }
        let bytes = serde_json::to_vec(index)?;
        self.fs.atomic_write_file(&path, &bytes, false).await
    }

    async fn prune_index_backups(&self) -> Result<()> {
        let mut backups = self.list_index_backups().await?;
        while backups.len() > INDEX_BACKUP_KEEP {
            if let Some(oldest) = backups.first().cloned() {
                self.fs.delete_if_exists(&oldest).await?;
                backups.remove(0);
            }
        }
        Ok(())
    }

    /// Overwrite the index wholesale. Used by the validator after orphan
    /// cleanup, which creates its own timestamped backup first.
    pub async fn replace_index(&self, index: &SessionIndex, backup: bool) -> Result<()> {
        let guard = self.write_lock.lock().await;
        self.write_index_locked(&guard, index, backup).await
    }

    /// Timestamped index backups, oldest first.
    pub async fn list_index_backups(&self) -> Result<Vec<PathBuf>> {
        let mut entries = tokio::fs::read_dir(self.fs.root()).await?;
        let mut backups = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            if name.to_string_lossy().starts_with("index.json.backup.") {
                backups.push(entry.path());
            }
        }
        backups.sort();
        Ok(backups)
    }

    pub async fn stats(&self) -> Result<StorageStats> {
        let files = self.fs.list_session_files().await?;
        let mut total = 0u64;
        for (_, path) in &files {
            if let Ok(metadata) = tokio::fs::metadata(path).await {
                total += metadata.len();
            }
        }
        let index_size = tokio::fs::metadata(self.index_path())
            .await
            .map(|m| m.len())
            .unwrap_or(0);
        Ok(StorageStats {
            session_count: files.len(),
            total_size_bytes: total,
            index_size_bytes: index_size,
        })
    }
}

#[async_trait]
impl StorageBackend for SessionStorage {
    /// Persist a session: validate, envelope-encode, atomically replace the
    /// file (with `.bak`), then update the index entry.
    async fn write_session(&self, session: &Session) -> Result<SessionMetadata> {
        let bytes = self.encode_session(session)?;
        let guard = self.write_lock.lock().await;
        self.fs
            .atomic_write_file(
                &self.session_path(session.id),
                &bytes,
                self.config.create_backups,
            )
            .await?;
        let metadata = SessionMetadata::from_session(session);
        self.update_index_locked(&guard, metadata.clone()).await?;
        debug!(session = %session.id, bytes = bytes.len(), "wrote session");
        Ok(metadata)
    }

    /// Read a session, transparently migrating older schema versions. A
    /// migrated session is written back so the chain runs only once.
    async fn read_session(&self, id: Uuid) -> Result<Session> {
        let path = self.session_path(id);
        let bytes = match self.fs.safe_read_file(&path).await {
            Ok(bytes) => bytes,
            Err(StoreError::PathNotFound(_)) => return Err(StoreError::NotFound(id)),
            Err(err) => return Err(err),
        };
        let (version, mut payload) = self.decode_envelope(&bytes)?;
        if let Some(obj) = payload.as_object_mut()
            && !obj.contains_key("version")
        {
            obj.insert("version".into(), Value::String(version.clone()));
        }

        if MigrationManager::needs_migration(&payload) {
            let outcome = self.migrator.migrate_session(id, payload, &bytes).await?;
            self.persist_migrated(&outcome.session).await?;
            return Ok(outcome.session);
        }

        let session: Session = serde_json::from_value(payload)
            .map_err(|e| StoreError::Validation(format!("session {id} fails the schema: {e}")))?;
        session.validate()?;
        if session.id != id {
            return Err(StoreError::Validation(format!(
                "session file {id} contains mismatched id {}",
                session.id
            )));
        }
        Ok(session)
    }

    /// Remove the session file and the index entry. Any `.bak` copy is left
    /// behind as the last line of defense against accidental deletion.
    async fn delete_session(&self, id: Uuid) -> Result<()> {
        let path = self.session_path(id);
        if !self.fs.file_exists(&path).await {
            return Err(StoreError::NotFound(id));
        }
        let guard = self.write_lock.lock().await;
        self.fs.safe_delete_file(&path).await?;
        let mut index = self.load_index_or_rebuild_locked(&guard).await?;
        if index.remove(&id).is_some() {
            self.write_index_locked(&guard, &index, true).await?;
        }
        info!(session = %id, "deleted session");
        Ok(())
    }

    async fn session_exists(&self, id: Uuid) -> Result<bool> {
        Ok(self.fs.file_exists(&self.session_path(id)).await)
    }

    async fn get_index(&self) -> Result<SessionIndex> {
        let guard = self.write_lock.lock().await;
        self.load_index_or_rebuild_locked(&guard).await
    }

    async fn update_index(&self, metadata: SessionMetadata) -> Result<()> {
        let guard = self.write_lock.lock().await;
        self.update_index_locked(&guard, metadata).await
    }

    async fn rebuild_index(&self) -> Result<SessionIndex> {
        let guard = self.write_lock.lock().await;
        self.rebuild_index_locked(&guard).await
    }

    /// Copy the current session file to `<id>.json.bak`.
    async fn create_backup(&self, id: Uuid) -> Result<PathBuf> {
        let path = self.session_path(id);
        let bytes = match self.fs.safe_read_file(&path).await {
            Ok(bytes) => bytes,
            Err(StoreError::PathNotFound(_)) => return Err(StoreError::NotFound(id)),
            Err(err) => return Err(err),
        };
        let backup = backup_path(&path);
        self.fs.atomic_write_file(&backup, &bytes, false).await?;
        Ok(backup)
    }

    /// Delete sessions older than `max_age`, then oldest-by-lastModified
    /// beyond `max_count`. Returns the IDs actually deleted.
    async fn cleanup_old_sessions(
        &self,
        max_count: usize,
        max_age: Duration,
    ) -> Result<Vec<Uuid>> {
        let index = self.get_index().await?;
        let victims = select_cleanup_victims(&index, max_count, max_age, Utc::now());
        let mut deleted = Vec::new();
        for id in victims.all() {
            match self.delete_session(id).await {
                Ok(()) => deleted.push(id),
                Err(StoreError::NotFound(_)) => {}
                Err(err) => warn!(session = %id, %err, "cleanup failed to delete session"),
            }
        }
        Ok(deleted)
    }
}

/// Retention victim selection: sessions past `max_age` first, then the
/// oldest of the remainder until at most `max_count` are left. The most
/// recently modified `max_count` sessions are never picked by count.
pub fn select_cleanup_victims(
    index: &SessionIndex,
    max_count: usize,
    max_age: Duration,
    now: DateTime<Utc>,
) -> CleanupVictims {
    let max_age =
        chrono::Duration::from_std(max_age).unwrap_or_else(|_| chrono::Duration::MAX);

    let mut by_age = Vec::new();
    let mut remainder: Vec<&SessionMetadata> = Vec::new();
    for metadata in index.sessions.values() {
        if now.signed_duration_since(metadata.last_modified) > max_age {
            by_age.push(metadata.id);
        } else {
            remainder.push(metadata);
        }
    }
    by_age.sort();

    remainder.sort_by_key(|m| (m.last_modified, m.id));
    let excess = remainder.len().saturating_sub(max_count);
    let by_count = remainder[..excess].iter().map(|m| m.id).collect();

    CleanupVictims { by_age, by_count }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fsio::FsConfig;
    use crate::types::CURRENT_SCHEMA_VERSION;
    use crate::types::Message;
    use crate::types::MessageRole;
    use crate::types::TokenCount;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    async fn storage(dir: &TempDir) -> SessionStorage {
        let fs = FsLayer::new(dir.path(), FsConfig::default());
        SessionStorage::new(fs, StorageConfig::default(), PathBuf::from("/workspace"))
            .await
            .unwrap()
    }

    fn session_with(messages: Vec<Message>) -> Session {
        let now = crate::types::now_ms();
        Session {
            id: Uuid::new_v4(),
            version: CURRENT_SCHEMA_VERSION.to_string(),
            created: now,
            last_modified: now,
            model: "gpt-4o".into(),
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

    #[tokio::test]
    async fn write_then_read_roundtrips() {
        let dir = TempDir::new().unwrap();
        let storage = storage(&dir).await;
        let session = session_with(vec![
            Message::new("m1", MessageRole::User, "hello"),
            Message::new("m2", MessageRole::Assistant, "hi"),
        ]);

        storage.write_session(&session).await.unwrap();
        let loaded = storage.read_session(session.id).await.unwrap();
        assert_eq!(session, loaded);
    }

    #[tokio::test]
    async fn compression_is_transparent() {
        let dir = TempDir::new().unwrap();
        let fs = FsLayer::new(dir.path(), FsConfig::default());
        let storage = SessionStorage::new(
            fs,
            StorageConfig {
                compression_enabled: true,
                ..StorageConfig::default()
            },
            PathBuf::from("/w"),
        )
        .await
        .unwrap();

        let compressible = session_with(vec![Message::new(
            "m1",
            MessageRole::User,
            "repetition ".repeat(400),
        )]);
        let tiny = session_with(vec![Message::new("m1", MessageRole::User, "x")]);

        for session in [&compressible, &tiny] {
            storage.write_session(session).await.unwrap();
            let loaded = storage.read_session(session.id).await.unwrap();
            assert_eq!(*session, loaded);
        }

        let envelope: VersionedSession = serde_json::from_slice(
            &std::fs::read(storage.session_path(compressible.id)).unwrap(),
        )
        .unwrap();
        assert!(envelope.compressed);
    }

    #[tokio::test]
    async fn corrupted_payload_fails_with_corrupted_data() {
        let dir = TempDir::new().unwrap();
        let storage = storage(&dir).await;
        let session = session_with(vec![Message::new(
            "m1",
            MessageRole::User,
            "corruption target ".repeat(200),
        )]);
        storage.write_session(&session).await.unwrap();

        let path = storage.session_path(session.id);
        let mut envelope: Value =
            serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        let blob = envelope["data"].as_str().unwrap().to_string();
        let mut chars: Vec<char> = blob.chars().collect();
        let mid = chars.len() / 2;
        chars[mid] = if chars[mid] == 'A' { 'B' } else { 'A' };
        envelope["data"] = Value::String(chars.into_iter().collect());
        std::fs::write(&path, serde_json::to_vec(&envelope).unwrap()).unwrap();

        let err = storage.read_session(session.id).await.unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::CorruptedData);
    }

    #[tokio::test]
    async fn checksum_mismatch_on_inline_data() {
        let dir = TempDir::new().unwrap();
        let fs = FsLayer::new(dir.path(), FsConfig::default());
        let storage = SessionStorage::new(
            fs,
            StorageConfig {
                compression_enabled: false,
                ..StorageConfig::default()
            },
            PathBuf::from("/w"),
        )
        .await
        .unwrap();
        let session = session_with(vec![Message::new("m1", MessageRole::User, "hello")]);
        storage.write_session(&session).await.unwrap();

        let path = storage.session_path(session.id);
        let mut envelope: Value =
            serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        envelope["data"]["model"] = Value::String("tampered".into());
        std::fs::write(&path, serde_json::to_vec(&envelope).unwrap()).unwrap();

        let err = storage.read_session(session.id).await.unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::CorruptedData);
    }

    #[tokio::test]
    async fn index_tracks_writes_and_deletes() {
        let dir = TempDir::new().unwrap();
        let storage = storage(&dir).await;
        let a = session_with(vec![Message::new("m1", MessageRole::User, "a")]);
        let b = session_with(vec![Message::new("m1", MessageRole::User, "b")]);
        storage.write_session(&a).await.unwrap();
        storage.write_session(&b).await.unwrap();

        let index = storage.get_index().await.unwrap();
        assert_eq!(index.len(), 2);
        assert!(index.sessions.contains_key(&a.id));

        storage.delete_session(a.id).await.unwrap();
        let index = storage.get_index().await.unwrap();
        assert_eq!(index.len(), 1);
        assert!(!index.sessions.contains_key(&a.id));
        assert!(!storage.session_exists(a.id).await.unwrap());
    }

    #[tokio::test]
    async fn missing_index_is_rebuilt_from_files() {
        let dir = TempDir::new().unwrap();
        let storage = storage(&dir).await;
        let session = session_with(vec![Message::new("m1", MessageRole::User, "hello")]);
        storage.write_session(&session).await.unwrap();

        std::fs::remove_file(storage.index_path()).unwrap();
        let index = storage.get_index().await.unwrap();
        assert_eq!(index.len(), 1);
        assert_eq!(
            index.sessions[&session.id].preview.as_deref(),
            Some("hello")
        );
    }

    #[tokio::test]
    async fn corrupt_index_is_rebuilt_silently() {
        let dir = TempDir::new().unwrap();
        let storage = storage(&dir).await;
        let session = session_with(vec![Message::new("m1", MessageRole::User, "hello")]);
        storage.write_session(&session).await.unwrap();

        std::fs::write(storage.index_path(), b"{ not json").unwrap();
        let index = storage.get_index().await.unwrap();
        assert_eq!(index.len(), 1);
    }

    #[tokio::test]
    async fn rebuild_matches_written_metadata() {
        let dir = TempDir::new().unwrap();
        let storage = storage(&dir).await;
        let session = session_with(vec![
            Message::new("m1", MessageRole::User, "hello"),
            Message::new("m2", MessageRole::Assistant, "hi"),
        ]);
        let written = storage.write_session(&session).await.unwrap();

        let rebuilt = storage.rebuild_index().await.unwrap();
        assert_eq!(rebuilt.sessions[&session.id], written);
    }

    #[tokio::test]
    async fn index_mutation_leaves_timestamped_backup() {
        let dir = TempDir::new().unwrap();
        let storage = storage(&dir).await;
        let a = session_with(vec![Message::new("m1", MessageRole::User, "a")]);
        storage.write_session(&a).await.unwrap();

        // Second mutation must back up the index state left by the first.
        let b = session_with(vec![Message::new("m1", MessageRole::User, "b")]);
        storage.write_session(&b).await.unwrap();

        let backups = storage.list_index_backups().await.unwrap();
        assert!(!backups.is_empty());
        let latest: SessionIndex =
            serde_json::from_slice(&std::fs::read(backups.last().unwrap()).unwrap()).unwrap();
        assert!(latest.sessions.contains_key(&a.id));
        assert!(!latest.sessions.contains_key(&b.id));
    }

    #[tokio::test]
    async fn old_schema_file_is_migrated_on_read() {
        let dir = TempDir::new().unwrap();
        let storage = storage(&dir).await;
        let id = Uuid::new_v4();
        let payload = serde_json::json!({
            "id": id.to_string(),
            "version": "0.7.0",
            "created": 1_700_000_000_000_i64,
            "lastModified": 1_700_000_001_000_i64,
            "model": "gpt-4o",
            "tokenCount": {"total": 0, "input": 0, "output": 0},
            "messages": [],
        });
        let envelope = serde_json::json!({
            "version": "0.7.0",
            "compressed": false,
            "data": payload,
        });
        std::fs::write(
            storage.session_path(id),
            serde_json::to_vec(&envelope).unwrap(),
        )
        .unwrap();

        let session = storage.read_session(id).await.unwrap();
        assert_eq!(session.version, CURRENT_SCHEMA_VERSION);
        assert_eq!(session.workspace_root, PathBuf::from("/workspace"));

        // Migration backup exists and the rewritten file is current.
        let has_backup = std::fs::read_dir(dir.path()).unwrap().any(|e| {
            e.unwrap()
                .file_name()
                .to_string_lossy()
                .starts_with(&format!("{id}.migration-backup."))
        });
        assert!(has_backup);
        let reread = storage.read_session(id).await.unwrap();
        assert_eq!(reread.version, CURRENT_SCHEMA_VERSION);
        let index = storage.get_index().await.unwrap();
        assert!(index.sessions.contains_key(&id));
    }

    #[test]
    fn victim_selection_age_then_count() {
        let now = Utc::now();
        let mut index = SessionIndex::new();
        let ages_days: [i64; 10] = [0, 1, 2, 3, 4, 35, 40, 50, 5, 6];
        let mut ids = Vec::new();
        for age in ages_days {
            let mut session = session_with(vec![]);
            session.last_modified = now - chrono::Duration::days(age);
            session.created = session.last_modified;
            ids.push((session.id, age));
            index.upsert(SessionMetadata::from_session(&session));
        }

        // Three sessions are past the 30-day limit; of the remaining seven,
        // the two oldest (6 and 5 days) go by count to get down to five.
        let victims =
            select_cleanup_victims(&index, 5, Duration::from_secs(30 * 86_400), now);
        assert_eq!(victims.by_age.len(), 3);
        assert_eq!(victims.by_count.len(), 2);
        for (id, age) in &ids {
            let in_age = victims.by_age.contains(id);
            let in_count = victims.by_count.contains(id);
            match *age {
                35 | 40 | 50 => assert!(in_age && !in_count),
                5 | 6 => assert!(in_count && !in_age),
                _ => assert!(!in_age && !in_count),
            }
        }
    }

    #[tokio::test]
    async fn stats_reflect_directory_contents() {
        let dir = TempDir::new().unwrap();
        let storage = storage(&dir).await;
        let session = session_with(vec![Message::new("m1", MessageRole::User, "hello")]);
        storage.write_session(&session).await.unwrap();

        let stats = storage.stats().await.unwrap();
        assert_eq!(stats.session_count, 1);
        assert!(stats.total_size_bytes > 0);
        assert!(stats.index_size_bytes > 0);
    }
}
