//! Filesystem layer: atomic writes, guarded reads, permission enforcement.
//!
//! All session files are created 0600 and directories 0700. Writes go
//! through a same-directory temp file plus rename, so a crash at any point
//! leaves either the prior content or the full new content under the target
//! path, never a partial mix.

use crate::error::Result;
use crate::error::StoreError;
use std::io;
use std::io::Write;
use std::path::Path;
use std::path::PathBuf;
use std::time::Duration;
use tokio::time::sleep;
use tracing::debug;
use tracing::warn;
use uuid::Uuid;

/// Owner-only file mode for session data.
pub const FILE_MODE: u32 = 0o600;

/// Owner-only directory mode for the sessions directory.
pub const DIR_MODE: u32 = 0o700;

#[derive(Debug, Clone)]
pub struct FsConfig {
    /// Read guard against runaway files (default 10 MiB).
    pub max_read_size: u64,
    /// Retry budget for transient filesystem errors.
    pub max_retries: u32,
    /// Base delay for exponential backoff (`retry_delay * 2^attempt`).
    pub retry_delay: Duration,
    /// Check file modes on every read.
    pub validate_on_read: bool,
    /// Repair wrong modes transparently instead of failing.
    pub auto_repair: bool,
}

impl Default for FsConfig {
    fn default() -> Self {
        Self {
            max_read_size: 10 * 1024 * 1024,
            max_retries: 3,
            retry_delay: Duration::from_millis(50),
            validate_on_read: true,
            auto_repair: true,
        }
    }
}

/// Handle on the sessions directory.
#[derive(Debug, Clone)]
pub struct FsLayer {
    root: PathBuf,
    config: FsConfig,
}

impl FsLayer {
    pub fn new(root: impl Into<PathBuf>, config: FsConfig) -> Self {
        Self {
            root: root.into(),
            config,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub const fn config(&self) -> &FsConfig {
        &self.config
    }

    /// Create the sessions directory (0700) if it does not exist.
    pub async fn ensure_sessions_directory(&self) -> Result<()> {
        tokio::fs::create_dir_all(&self.root).await?;
        set_mode(&self.root, DIR_MODE)?;
        Ok(())
    }

    /// Atomically replace `path` with `data`.
    ///
    /// When `create_backup` is set and the target exists, the prior content
    /// is copied to `<path>.bak` before replacement.
    pub async fn atomic_write_file(
        &self,
        path: &Path,
        data: &[u8],
        create_backup: bool,
    ) -> Result<()> {
        let mut attempt = 0u32;
        loop {
            match write_once(path, data, create_backup) {
                Ok(()) => return Ok(()),
                Err(err) if StoreError::is_retryable_io(&err) && attempt < self.config.max_retries => {
                    let delay = self.config.retry_delay * 2u32.saturating_pow(attempt);
                    debug!(path = %path.display(), attempt, "transient write failure, retrying");
                    sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(err.into()),
            }
        }
    }

    /// Read `path`, enforcing the size guard and (optionally) file modes.
    pub async fn safe_read_file(&self, path: &Path) -> Result<Vec<u8>> {
        let metadata = match tokio::fs::metadata(path).await {
            Ok(metadata) => metadata,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Err(StoreError::PathNotFound(path.to_path_buf()));
            }
            Err(err) => return Err(err.into()),
        };
        if metadata.len() > self.config.max_read_size {
            return Err(StoreError::CorruptedData(format!(
                "{} is {} bytes, over the {} byte read limit",
                path.display(),
                metadata.len(),
                self.config.max_read_size
            )));
        }
        if self.config.validate_on_read {
            self.check_file_mode(path)?;
        }

        let mut attempt = 0u32;
        loop {
            match tokio::fs::read(path).await {
                Ok(data) => return Ok(data),
                Err(err) if StoreError::is_retryable_io(&err) && attempt < self.config.max_retries => {
                    let delay = self.config.retry_delay * 2u32.saturating_pow(attempt);
                    sleep(delay).await;
                    attempt += 1;
                }
                Err(err) if err.kind() == io::ErrorKind::NotFound => {
                    return Err(StoreError::PathNotFound(path.to_path_buf()));
                }
                Err(err) => return Err(err.into()),
            }
        }
    }

    /// Delete `path`; missing files are an error.
    pub async fn safe_delete_file(&self, path: &Path) -> Result<()> {
        match tokio::fs::remove_file(path).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                Err(StoreError::PathNotFound(path.to_path_buf()))
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Delete `path` if present; returns whether anything was removed.
    pub async fn delete_if_exists(&self, path: &Path) -> Result<bool> {
        match tokio::fs::remove_file(path).await {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(err.into()),
        }
    }

    pub async fn file_exists(&self, path: &Path) -> bool {
        tokio::fs::try_exists(path).await.unwrap_or(false)
    }

    /// Session files in the root: `<UUIDv4>.json` only. Index files, `.bak`
    /// copies, and migration backups never have a bare UUID stem, so the
    /// stem filter excludes them.
    pub async fn list_session_files(&self) -> Result<Vec<(Uuid, PathBuf)>> {
        let mut entries = match tokio::fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };
        let mut files = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            if let Ok(id) = Uuid::parse_str(stem) {
                files.push((id, path));
            }
        }
        files.sort_by_key(|(id, _)| *id);
        Ok(files)
    }

    /// Re-apply 0700/0600 across the sessions directory. Returns the number
    /// of entries repaired.
    pub async fn repair_permissions(&self) -> Result<u32> {
        let mut repaired = 0u32;
        if fix_mode_if_needed(&self.root, DIR_MODE)? {
            repaired += 1;
        }
        let mut entries = tokio::fs::read_dir(&self.root).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let expected = if entry.file_type().await?.is_dir() {
                DIR_MODE
            } else {
                FILE_MODE
            };
            if fix_mode_if_needed(&path, expected)? {
                repaired += 1;
            }
        }
        if repaired > 0 {
            warn!(repaired, root = %self.root.display(), "repaired filesystem permissions");
        }
        Ok(repaired)
    }

    fn check_file_mode(&self, path: &Path) -> Result<()> {
        let Some(mode) = mode_of(path)? else {
            return Ok(());
        };
        if mode == FILE_MODE {
            return Ok(());
        }
        if self.config.auto_repair {
            warn!(path = %path.display(), mode = format!("{mode:o}"), "repairing file mode");
            set_mode(path, FILE_MODE)?;
            Ok(())
        } else {
            Err(StoreError::PermissionDenied(format!(
                "{} has mode {mode:o}, expected {FILE_MODE:o}",
                path.display()
            )))
        }
    }
}

/// `<path>.bak` sibling for pre-replacement backups.
pub fn backup_path(path: &Path) -> PathBuf {
    let mut os = path.as_os_str().to_os_string();
    os.push(".bak");
    PathBuf::from(os)
}

fn write_once(path: &Path, data: &[u8], create_backup: bool) -> io::Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "path has no parent"))?;

    if create_backup && path.exists() {
        let backup = backup_path(path);
        std::fs::copy(path, &backup)?;
        set_mode_io(&backup, FILE_MODE)?;
    }

    let mut tmp = tempfile::NamedTempFile::new_in(parent)?;
    tmp.write_all(data)?;
    tmp.as_file().sync_all()?;
    set_mode_io(tmp.path(), FILE_MODE)?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

#[cfg(unix)]
fn mode_of(path: &Path) -> Result<Option<u32>> {
    use std::os::unix::fs::PermissionsExt;
    match std::fs::metadata(path) {
        Ok(metadata) => Ok(Some(metadata.permissions().mode() & 0o777)),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err.into()),
    }
}

#[cfg(not(unix))]
fn mode_of(_path: &Path) -> Result<Option<u32>> {
    Ok(None)
}

fn set_mode(path: &Path, mode: u32) -> Result<()> {
    set_mode_io(path, mode).map_err(StoreError::from)
}

#[cfg(unix)]
fn set_mode_io(path: &Path, mode: u32) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))
}

#[cfg(not(unix))]
fn set_mode_io(_path: &Path, _mode: u32) -> io::Result<()> {
    Ok(())
}

#[cfg(unix)]
fn fix_mode_if_needed(path: &Path, expected: u32) -> Result<bool> {
    if let Some(mode) = mode_of(path)?
        && mode != expected
    {
        set_mode(path, expected)?;
        return Ok(true);
    }
    Ok(false)
}

#[cfg(not(unix))]
fn fix_mode_if_needed(_path: &Path, _expected: u32) -> Result<bool> {
    Ok(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn layer(dir: &TempDir) -> FsLayer {
        FsLayer::new(dir.path(), FsConfig::default())
    }

    #[tokio::test]
    async fn atomic_write_then_read() {
        let dir = TempDir::new().unwrap();
        let fs = layer(&dir);
        fs.ensure_sessions_directory().await.unwrap();
        let path = dir.path().join("data.json");

        fs.atomic_write_file(&path, b"first", false).await.unwrap();
        assert_eq!(fs.safe_read_file(&path).await.unwrap(), b"first");

        fs.atomic_write_file(&path, b"second", true).await.unwrap();
        assert_eq!(fs.safe_read_file(&path).await.unwrap(), b"second");
    }

    #[tokio::test]
    async fn backup_holds_prior_content() {
        let dir = TempDir::new().unwrap();
        let fs = layer(&dir);
        let path = dir.path().join("data.json");

        fs.atomic_write_file(&path, b"old", false).await.unwrap();
        fs.atomic_write_file(&path, b"new", true).await.unwrap();

        let backup = backup_path(&path);
        assert_eq!(fs.safe_read_file(&backup).await.unwrap(), b"old");
    }

    #[tokio::test]
    async fn read_missing_file_is_not_found() {
        let dir = TempDir::new().unwrap();
        let fs = layer(&dir);
        let err = fs
            .safe_read_file(&dir.path().join("absent.json"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn oversized_file_is_rejected() {
        let dir = TempDir::new().unwrap();
        let mut config = FsConfig::default();
        config.max_read_size = 8;
        let fs = FsLayer::new(dir.path(), config);
        let path = dir.path().join("big.json");
        fs.atomic_write_file(&path, b"way more than eight bytes", false)
            .await
            .unwrap();
        let err = fs.safe_read_file(&path).await.unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::CorruptedData);
    }

    #[tokio::test]
    async fn list_session_files_skips_non_session_entries() {
        let dir = TempDir::new().unwrap();
        let fs = layer(&dir);
        let id = Uuid::new_v4();
        fs.atomic_write_file(&dir.path().join(format!("{id}.json")), b"{}", false)
            .await
            .unwrap();
        fs.atomic_write_file(&dir.path().join("index.json"), b"{}", false)
            .await
            .unwrap();
        fs.atomic_write_file(
            &dir.path().join(format!("{id}.migration-backup.123.json")),
            b"{}",
            false,
        )
        .await
        .unwrap();
        fs.atomic_write_file(&dir.path().join(format!("{id}.json.bak")), b"{}", false)
            .await
            .unwrap();

        let files = fs.list_session_files().await.unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].0, id);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn wrong_mode_is_repaired_on_read() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        let fs = layer(&dir);
        let path = dir.path().join("data.json");
        fs.atomic_write_file(&path, b"x", false).await.unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o644)).unwrap();

        fs.safe_read_file(&path).await.unwrap();
        let mode = std::fs::metadata(&path).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o600);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn wrong_mode_fails_without_auto_repair() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        let mut config = FsConfig::default();
        config.auto_repair = false;
        let fs = FsLayer::new(dir.path(), config);
        let path = dir.path().join("data.json");
        fs.atomic_write_file(&path, b"x", false).await.unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o644)).unwrap();

        let err = fs.safe_read_file(&path).await.unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::PermissionDenied);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn repair_permissions_counts_fixes() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        let fs = layer(&dir);
        fs.ensure_sessions_directory().await.unwrap();
        let path = dir.path().join("data.json");
        fs.atomic_write_file(&path, b"x", false).await.unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o666)).unwrap();

        let repaired = fs.repair_permissions().await.unwrap();
        assert_eq!(repaired, 1);
        assert_eq!(fs.repair_permissions().await.unwrap(), 0);
    }
}
