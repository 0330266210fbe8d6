//! Append-only rotating audit log.
//!
//! Entries are JSONL under `<sessions-dir>/logs/audit.log`. When the file
//! exceeds the size cap it is renamed to `audit-<ms>.log` and a fresh file
//! is started; the oldest rotated files are pruned to stay within
//! `max_files`. Writes are serialized through a single lock.

use crate::error::Result;
use crate::fsio::DIR_MODE;
use chrono::DateTime;
use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;
use std::path::Path;
use std::path::PathBuf;
use std::time::Instant;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::warn;
use uuid::Uuid;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum AuditLevel {
    Info,
    Warn,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditResult {
    Success,
    Failure,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEntry {
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub timestamp: DateTime<Utc>,
    pub level: AuditLevel,
    pub operation: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<Uuid>,
    pub actor: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub result: AuditResult,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct AuditConfig {
    /// Entries below this level are dropped.
    pub level: AuditLevel,
    pub max_file_size: u64,
    pub max_files: usize,
    pub actor: String,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            level: AuditLevel::Info,
            max_file_size: 10 * 1024 * 1024,
            max_files: 5,
            actor: "engine".to_string(),
        }
    }
}

pub struct AuditLogger {
    logs_dir: PathBuf,
    config: AuditConfig,
    write_lock: Mutex<()>,
}

impl AuditLogger {
    /// Create the `logs/` directory under the sessions dir.
    pub async fn new(sessions_dir: &Path, config: AuditConfig) -> Result<Self> {
        let logs_dir = sessions_dir.join("logs");
        tokio::fs::create_dir_all(&logs_dir).await?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tokio::fs::set_permissions(&logs_dir, std::fs::Permissions::from_mode(DIR_MODE))
                .await?;
        }
        Ok(Self {
            logs_dir,
            config,
            write_lock: Mutex::new(()),
        })
    }

    pub fn log_path(&self) -> PathBuf {
        self.logs_dir.join("audit.log")
    }

    fn entry(
        &self,
        level: AuditLevel,
        operation: &str,
        session_id: Option<Uuid>,
        result: AuditResult,
    ) -> AuditEntry {
        AuditEntry {
            timestamp: Utc::now(),
            level,
            operation: operation.to_string(),
            session_id,
            actor: self.config.actor.clone(),
            context: None,
            error: None,
            result,
            duration_ms: None,
        }
    }

    pub fn success(&self, operation: &str, session_id: Option<Uuid>) -> AuditEntry {
        self.entry(AuditLevel::Info, operation, session_id, AuditResult::Success)
    }

    pub fn failure(&self, operation: &str, session_id: Option<Uuid>, error: &str) -> AuditEntry {
        let mut entry = self.entry(AuditLevel::Error, operation, session_id, AuditResult::Failure);
        entry.error = Some(error.to_string());
        entry
    }

    /// Append one entry; entries below the configured level are dropped.
    pub async fn log(&self, entry: AuditEntry) -> Result<()> {
        if entry.level < self.config.level {
            return Ok(());
        }
        let _guard = self.write_lock.lock().await;
        self.rotate_if_needed().await?;

        let mut line = serde_json::to_vec(&entry)?;
        line.push(b'\n');

        let mut options = tokio::fs::OpenOptions::new();
        options.create(true).append(true);
        #[cfg(unix)]
        options.mode(0o600);
        let mut file = options.open(self.log_path()).await?;
        file.write_all(&line).await?;
        file.flush().await?;
        Ok(())
    }

    /// Time `f`, then log success or failure. Audit-write failures are
    /// swallowed with a warning so they never change the operation outcome.
    pub async fn log_operation<T, F, Fut>(
        &self,
        operation: &str,
        session_id: Option<Uuid>,
        f: F,
    ) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let started = Instant::now();
        let outcome = f().await;
        let duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

        let mut entry = match &outcome {
            Ok(_) => self.success(operation, session_id),
            Err(err) => self.failure(operation, session_id, &err.to_string()),
        };
        entry.duration_ms = Some(duration_ms);
        if let Err(err) = self.log(entry).await {
            warn!(operation, %err, "failed to write audit entry");
        }
        outcome
    }

    async fn rotate_if_needed(&self) -> Result<()> {
        let path = self.log_path();
        let size = match tokio::fs::metadata(&path).await {
            Ok(metadata) => metadata.len(),
            Err(_) => return Ok(()),
        };
        if size <= self.config.max_file_size {
            return Ok(());
        }

        let rotated = self
            .logs_dir
            .join(format!("audit-{}.log", Utc::now().timestamp_millis()));
        tokio::fs::rename(&path, &rotated).await?;
        self.prune_rotated().await
    }

    async fn prune_rotated(&self) -> Result<()> {
        let mut rotated = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.logs_dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with("audit-") && name.ends_with(".log") {
                rotated.push(entry.path());
            }
        }
        rotated.sort();

        // The live file plus rotated history stays within max_files.
        let keep = self.config.max_files.saturating_sub(1);
        while rotated.len() > keep {
            let oldest = rotated.remove(0);
            if let Err(err) = tokio::fs::remove_file(&oldest).await {
                warn!(path = %oldest.display(), %err, "failed to prune rotated audit log");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;
    use tempfile::TempDir;

    async fn logger(dir: &TempDir, config: AuditConfig) -> AuditLogger {
        AuditLogger::new(dir.path(), config).await.unwrap()
    }

    fn read_lines(path: &Path) -> Vec<Value> {
        std::fs::read_to_string(path)
            .unwrap_or_default()
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect()
    }

    #[tokio::test]
    async fn entries_append_as_jsonl() {
        let dir = TempDir::new().unwrap();
        let logger = logger(&dir, AuditConfig::default()).await;
        let id = Uuid::new_v4();

        logger.log(logger.success("save_session", Some(id))).await.unwrap();
        logger
            .log(logger.failure("delete_session", Some(id), "boom"))
            .await
            .unwrap();

        let lines = read_lines(&logger.log_path());
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["operation"], "save_session");
        assert_eq!(lines[0]["result"], "success");
        assert_eq!(lines[1]["result"], "failure");
        assert_eq!(lines[1]["error"], "boom");
        assert_eq!(lines[1]["sessionId"], id.to_string());
    }

    #[tokio::test]
    async fn level_threshold_filters_entries() {
        let dir = TempDir::new().unwrap();
        let logger = logger(
            &dir,
            AuditConfig {
                level: AuditLevel::Error,
                ..AuditConfig::default()
            },
        )
        .await;

        logger.log(logger.success("listed", None)).await.unwrap();
        logger.log(logger.failure("broke", None, "x")).await.unwrap();

        let lines = read_lines(&logger.log_path());
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0]["operation"], "broke");
    }

    #[tokio::test]
    async fn log_operation_times_and_propagates() {
        let dir = TempDir::new().unwrap();
        let logger = logger(&dir, AuditConfig::default()).await;

        let value = logger
            .log_operation("compute", None, || async { Ok::<_, StoreError>(41 + 1) })
            .await
            .unwrap();
        assert_eq!(value, 42);

        let err = logger
            .log_operation("explode", None, || async {
                Err::<(), _>(StoreError::Cancelled)
            })
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Cancelled));

        let lines = read_lines(&logger.log_path());
        assert_eq!(lines.len(), 2);
        assert!(lines[0]["durationMs"].is_u64());
        assert_eq!(lines[1]["result"], "failure");
    }

    #[tokio::test]
    async fn oversized_log_rotates_and_prunes() {
        let dir = TempDir::new().unwrap();
        let logger = logger(
            &dir,
            AuditConfig {
                max_file_size: 256,
                max_files: 2,
                ..AuditConfig::default()
            },
        )
        .await;

        for _ in 0..30 {
            logger.log(logger.success("fill", None)).await.unwrap();
        }

        let names: Vec<String> = std::fs::read_dir(dir.path().join("logs"))
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        let rotated = names.iter().filter(|n| n.starts_with("audit-")).count();
        assert!(rotated >= 1, "expected rotation, saw {names:?}");
        assert!(rotated <= 1, "pruning should cap rotated files, saw {names:?}");
        assert!(names.iter().any(|n| n == "audit.log"));
    }
}
