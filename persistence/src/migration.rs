//! Schema migration framework.
//!
//! Sessions are migrated along a declared linear chain of schema versions
//! (`0.7.0 → 0.8.0 → 0.9.0 → 1.0.0`). Each step transforms the raw session
//! JSON, bumps the embedded version, and runs an optional post-check. A
//! timestamped backup is written before the first step so a failed chain can
//! be rolled back. Downgrades are unsupported.

use crate::error::MigrationErrorKind;
use crate::error::Result;
use crate::error::StoreError;
use crate::fsio::FsLayer;
use crate::types::CURRENT_SCHEMA_VERSION;
use crate::types::SCHEMA_VERSION_CHAIN;
use crate::types::Session;
use chrono::Utc;
use serde_json::Value;
use serde_json::json;
use std::path::Path;
use std::path::PathBuf;
use tracing::info;
use tracing::warn;
use uuid::Uuid;

type ApplyFn = Box<dyn Fn(&mut Value) -> Result<()> + Send + Sync>;

/// One step in the migration chain.
pub struct Migration {
    pub from: &'static str,
    pub to: &'static str,
    pub description: &'static str,
    pub reversible: bool,
    apply: ApplyFn,
    post_check: Option<fn(&Value) -> bool>,
}

impl std::fmt::Debug for Migration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Migration")
            .field("from", &self.from)
            .field("to", &self.to)
            .field("description", &self.description)
            .field("reversible", &self.reversible)
            .finish()
    }
}

/// Result of a successful chain run.
#[derive(Debug)]
pub struct MigrationOutcome {
    pub session: Session,
    pub from_version: String,
    /// `None` when the pre-migration backup could not be written, in which
    /// case rollback is impossible.
    pub backup_path: Option<PathBuf>,
    pub steps_applied: Vec<String>,
}

pub struct MigrationManager {
    fs: FsLayer,
    migrations: Vec<Migration>,
}

impl MigrationManager {
    /// Build the manager with the built-in chain and self-validate it.
    ///
    /// `workspace_root` supplies the default `workspaceRoot` for sessions
    /// predating schema 0.8.0.
    pub fn new(fs: FsLayer, workspace_root: PathBuf) -> Result<Self> {
        let manager = Self {
            fs,
            migrations: built_in_migrations(&workspace_root),
        };
        manager.validate_chain()?;
        Ok(manager)
    }

    /// Embedded schema version of a raw session, defaulting to the oldest
    /// supported version when absent.
    pub fn get_data_version(raw: &Value) -> String {
        raw.get("version")
            .and_then(Value::as_str)
            .unwrap_or(SCHEMA_VERSION_CHAIN[0])
            .to_string()
    }

    pub fn needs_migration(raw: &Value) -> bool {
        Self::get_data_version(raw) != CURRENT_SCHEMA_VERSION
    }

    /// Run the chain from the session's embedded version to current.
    ///
    /// `original_file` is the pre-migration file content, preserved at
    /// `<id>.migration-backup.<timestamp>.json`. Backup failure does not
    /// abort the migration, it only makes rollback unavailable.
    pub async fn migrate_session(
        &self,
        id: Uuid,
        mut raw: Value,
        original_file: &[u8],
    ) -> Result<MigrationOutcome> {
        let from_version = Self::get_data_version(&raw);
        let steps = self.path_from(&from_version, None)?;

        let backup_path = match self.write_backup(id, original_file).await {
            Ok(path) => Some(path),
            Err(err) => {
                warn!(session = %id, %err, "migration backup failed; rollback unavailable");
                None
            }
        };
        let rollback_available = backup_path.is_some();

        let mut steps_applied = Vec::with_capacity(steps.len());
        for step in steps {
            (step.apply)(&mut raw).map_err(|err| StoreError::Migration {
                kind: MigrationErrorKind::MigrationFailed,
                message: format!("{} -> {}: {err}", step.from, step.to),
                rollback_available,
            })?;
            raw["version"] = json!(step.to);
            if let Some(check) = step.post_check
                && !check(&raw)
            {
                return Err(StoreError::Migration {
                    kind: MigrationErrorKind::ValidationFailed,
                    message: format!("post-check failed after {} -> {}", step.from, step.to),
                    rollback_available,
                });
            }
            steps_applied.push(step.description.to_string());
        }

        let session: Session =
            serde_json::from_value(raw).map_err(|err| StoreError::Migration {
                kind: MigrationErrorKind::ValidationFailed,
                message: format!("migrated session does not match the current schema: {err}"),
                rollback_available,
            })?;
        session.validate().map_err(|err| StoreError::Migration {
            kind: MigrationErrorKind::ValidationFailed,
            message: err.to_string(),
            rollback_available,
        })?;

        info!(
            session = %id,
            from = %from_version,
            steps = steps_applied.len(),
            "migrated session to current schema"
        );
        Ok(MigrationOutcome {
            session,
            from_version,
            backup_path,
            steps_applied,
        })
    }

    /// Atomically replace the session file with the backup contents.
    pub async fn rollback_migration(&self, id: Uuid, backup_path: &Path) -> Result<()> {
        let contents = self
            .fs
            .safe_read_file(backup_path)
            .await
            .map_err(|err| StoreError::Migration {
                kind: MigrationErrorKind::RollbackFailed,
                message: format!("cannot read backup {}: {err}", backup_path.display()),
                rollback_available: false,
            })?;
        let target = self.fs.root().join(format!("{id}.json"));
        self.fs
            .atomic_write_file(&target, &contents, false)
            .await
            .map_err(|err| StoreError::Migration {
                kind: MigrationErrorKind::RollbackFailed,
                message: err.to_string(),
                rollback_available: false,
            })?;
        info!(session = %id, backup = %backup_path.display(), "rolled back migration");
        Ok(())
    }

    /// Ordered steps from `from` up to `to` (current when `None`).
    fn path_from(&self, from: &str, to: Option<&str>) -> Result<Vec<&Migration>> {
        let to = to.unwrap_or(CURRENT_SCHEMA_VERSION);
        let from_idx = SCHEMA_VERSION_CHAIN
            .iter()
            .position(|v| *v == from)
            .ok_or_else(|| StoreError::Migration {
                kind: MigrationErrorKind::UnsupportedVersion,
                message: format!("unknown schema version {from}"),
                rollback_available: false,
            })?;
        let to_idx = SCHEMA_VERSION_CHAIN
            .iter()
            .position(|v| *v == to)
            .ok_or_else(|| StoreError::Migration {
                kind: MigrationErrorKind::NoMigrationPath,
                message: format!("unknown target version {to}"),
                rollback_available: false,
            })?;
        if from_idx > to_idx {
            return Err(StoreError::Migration {
                kind: MigrationErrorKind::NoMigrationPath,
                message: format!("downgrade {from} -> {to} is unsupported"),
                rollback_available: false,
            });
        }

        let mut steps = Vec::with_capacity(to_idx - from_idx);
        for window in SCHEMA_VERSION_CHAIN[from_idx..=to_idx].windows(2) {
            let step = self
                .migrations
                .iter()
                .find(|m| m.from == window[0] && m.to == window[1])
                .ok_or_else(|| StoreError::Migration {
                    kind: MigrationErrorKind::NoMigrationPath,
                    message: format!("no migration registered for {} -> {}", window[0], window[1]),
                    rollback_available: false,
                })?;
            steps.push(step);
        }
        Ok(steps)
    }

    /// Startup self-check: the chain must cover the full declared version
    /// list, end at the current version, and register every adjacent step.
    fn validate_chain(&self) -> Result<()> {
        if SCHEMA_VERSION_CHAIN.len() != self.migrations.len() + 1 {
            return Err(StoreError::ConfigInvalid(format!(
                "migration chain covers {} versions but {} steps are registered",
                SCHEMA_VERSION_CHAIN.len(),
                self.migrations.len()
            )));
        }
        let last = SCHEMA_VERSION_CHAIN[SCHEMA_VERSION_CHAIN.len() - 1];
        if last != CURRENT_SCHEMA_VERSION {
            return Err(StoreError::ConfigInvalid(format!(
                "migration chain ends at {last}, expected {CURRENT_SCHEMA_VERSION}"
            )));
        }
        for older in &SCHEMA_VERSION_CHAIN[..SCHEMA_VERSION_CHAIN.len() - 1] {
            self.path_from(older, None)?;
        }
        Ok(())
    }

    async fn write_backup(&self, id: Uuid, original_file: &[u8]) -> Result<PathBuf> {
        let path = self
            .fs
            .root()
            .join(format!("{id}.migration-backup.{}.json", Utc::now().timestamp_millis()));
        self.fs
            .atomic_write_file(&path, original_file, false)
            .await
            .map_err(|err| StoreError::Migration {
                kind: MigrationErrorKind::BackupFailed,
                message: err.to_string(),
                rollback_available: false,
            })?;
        Ok(path)
    }
}

fn built_in_migrations(workspace_root: &Path) -> Vec<Migration> {
    let default_workspace = workspace_root.to_string_lossy().into_owned();

    vec![
        Migration {
            from: "0.7.0",
            to: "0.8.0",
            description: "add workspaceRoot defaulting to the current workspace",
            reversible: true,
            apply: Box::new(move |raw| {
                let obj = as_object(raw)?;
                obj.entry("workspaceRoot")
                    .or_insert_with(|| json!(default_workspace.clone()));
                Ok(())
            }),
            post_check: Some(|raw| raw.get("workspaceRoot").is_some_and(Value::is_string)),
        },
        Migration {
            from: "0.8.0",
            to: "0.9.0",
            description: "add empty contextFiles and tags arrays",
            reversible: true,
            apply: Box::new(|raw| {
                let obj = as_object(raw)?;
                obj.entry("contextFiles").or_insert_with(|| json!([]));
                obj.entry("tags").or_insert_with(|| json!([]));
                Ok(())
            }),
            post_check: Some(|raw| {
                raw.get("contextFiles").is_some_and(Value::is_array)
                    && raw.get("tags").is_some_and(Value::is_array)
            }),
        },
        Migration {
            from: "0.9.0",
            to: "1.0.0",
            description: "add filesAccessed plus null title and notes",
            reversible: true,
            apply: Box::new(|raw| {
                let obj = as_object(raw)?;
                obj.entry("filesAccessed").or_insert_with(|| json!([]));
                obj.entry("title").or_insert(Value::Null);
                obj.entry("notes").or_insert(Value::Null);
                Ok(())
            }),
            post_check: Some(|raw| raw.get("filesAccessed").is_some_and(Value::is_array)),
        },
    ]
}

fn as_object(raw: &mut Value) -> Result<&mut serde_json::Map<String, Value>> {
    raw.as_object_mut().ok_or_else(|| {
        StoreError::CorruptedData("session payload is not a JSON object".to_string())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fsio::FsConfig;
    use tempfile::TempDir;

    fn manager(dir: &TempDir) -> MigrationManager {
        let fs = FsLayer::new(dir.path(), FsConfig::default());
        MigrationManager::new(fs, PathBuf::from("/workspace")).unwrap()
    }

    fn v070_session(id: Uuid) -> Value {
        json!({
            "id": id.to_string(),
            "version": "0.7.0",
            "created": 1_700_000_000_000_i64,
            "lastModified": 1_700_000_001_000_i64,
            "model": "gpt-4o",
            "tokenCount": {"total": 0, "input": 0, "output": 0},
            "messages": [],
        })
    }

    #[test]
    fn chain_self_validates() {
        let dir = TempDir::new().unwrap();
        manager(&dir);
    }

    #[test]
    fn missing_version_defaults_to_oldest() {
        assert_eq!(MigrationManager::get_data_version(&json!({})), "0.7.0");
        assert!(MigrationManager::needs_migration(&json!({})));
        assert!(!MigrationManager::needs_migration(
            &json!({"version": CURRENT_SCHEMA_VERSION})
        ));
    }

    #[tokio::test]
    async fn migrates_oldest_to_current() {
        let dir = TempDir::new().unwrap();
        let mgr = manager(&dir);
        let id = Uuid::new_v4();
        let raw = v070_session(id);
        let original = serde_json::to_vec(&raw).unwrap();

        let outcome = mgr.migrate_session(id, raw, &original).await.unwrap();
        assert_eq!(outcome.from_version, "0.7.0");
        assert_eq!(outcome.steps_applied.len(), 3);
        assert_eq!(outcome.session.version, CURRENT_SCHEMA_VERSION);
        assert_eq!(outcome.session.workspace_root, PathBuf::from("/workspace"));
        assert!(outcome.session.context_files.is_empty());
        assert!(outcome.session.title.is_none());

        let backup = outcome.backup_path.unwrap();
        assert!(backup.exists());
        let name = backup.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with(&format!("{id}.migration-backup.")));
        assert!(name.ends_with(".json"));
    }

    #[tokio::test]
    async fn unknown_version_is_unsupported() {
        let dir = TempDir::new().unwrap();
        let mgr = manager(&dir);
        let id = Uuid::new_v4();
        let mut raw = v070_session(id);
        raw["version"] = json!("0.5.0");

        let err = mgr.migrate_session(id, raw, b"{}").await.unwrap_err();
        assert!(matches!(
            err,
            StoreError::Migration {
                kind: MigrationErrorKind::UnsupportedVersion,
                ..
            }
        ));
    }

    #[test]
    fn downgrade_has_no_path() {
        let dir = TempDir::new().unwrap();
        let mgr = manager(&dir);
        let err = mgr.path_from("1.0.0", Some("0.8.0")).unwrap_err();
        assert!(matches!(
            err,
            StoreError::Migration {
                kind: MigrationErrorKind::NoMigrationPath,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn rollback_restores_original_file() {
        let dir = TempDir::new().unwrap();
        let mgr = manager(&dir);
        let id = Uuid::new_v4();
        let raw = v070_session(id);
        let original = serde_json::to_vec(&raw).unwrap();

        let outcome = mgr.migrate_session(id, raw, &original).await.unwrap();
        let backup = outcome.backup_path.unwrap();

        mgr.rollback_migration(id, &backup).await.unwrap();
        let restored = std::fs::read(dir.path().join(format!("{id}.json"))).unwrap();
        assert_eq!(restored, original);
    }

    #[tokio::test]
    async fn corrupt_payload_fails_validation() {
        let dir = TempDir::new().unwrap();
        let mgr = manager(&dir);
        let id = Uuid::new_v4();
        // model is required by the final schema check
        let raw = json!({
            "id": id.to_string(),
            "version": "0.9.0",
            "created": 1_700_000_000_000_i64,
            "lastModified": 1_700_000_001_000_i64,
            "tokenCount": {"total": 0, "input": 0, "output": 0},
            "messages": [],
        });

        let err = mgr.migrate_session(id, raw, b"{}").await.unwrap_err();
        assert!(matches!(
            err,
            StoreError::Migration {
                kind: MigrationErrorKind::ValidationFailed,
                ..
            }
        ));
    }
}
