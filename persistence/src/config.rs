//! Engine configuration.

use crate::audit::AuditLevel;
use crate::error::Result;
use crate::error::StoreError;
use serde::Deserialize;
use serde::Serialize;
use std::path::PathBuf;

/// Lower bound for the auto-save cadence.
pub const AUTO_SAVE_INTERVAL_MIN_MS: u64 = 5_000;

/// Upper bound for the auto-save cadence.
pub const AUTO_SAVE_INTERVAL_MAX_MS: u64 = 300_000;

/// Configuration recognized by the engine.
///
/// Hosts deserialize this from their own config layer; [`EngineConfig::validate`]
/// rejects out-of-range values before any component is constructed.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EngineConfig {
    pub sessions_dir: PathBuf,
    pub max_sessions: usize,
    pub max_age_ms: u64,
    pub compression_enabled: bool,
    pub checksum_enabled: bool,
    pub create_backups: bool,
    pub max_file_size: u64,
    pub auto_save_enabled: bool,
    pub auto_save_interval_ms: u64,
    pub sanitize_exports: bool,
    pub audit_logging: bool,
    pub audit_log_level: AuditLevel,
    pub index_caching: bool,
    pub background_cleanup: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        let sessions_dir = dirs::home_dir()
            .map(|home| home.join(".quill/sessions"))
            .unwrap_or_else(|| PathBuf::from(".quill/sessions"));

        Self {
            sessions_dir,
            max_sessions: 100,
            max_age_ms: 30 * 86_400 * 1_000,
            compression_enabled: true,
            checksum_enabled: true,
            create_backups: true,
            max_file_size: 10 * 1024 * 1024,
            auto_save_enabled: true,
            auto_save_interval_ms: 30_000,
            sanitize_exports: true,
            audit_logging: true,
            audit_log_level: AuditLevel::Info,
            index_caching: true,
            background_cleanup: true,
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<()> {
        if self.sessions_dir.as_os_str().is_empty() {
            return Err(StoreError::ConfigInvalid("sessions_dir is empty".into()));
        }
        if self.max_sessions == 0 {
            return Err(StoreError::ConfigInvalid(
                "max_sessions must be at least 1".into(),
            ));
        }
        if self.max_age_ms == 0 {
            return Err(StoreError::ConfigInvalid(
                "max_age_ms must be positive".into(),
            ));
        }
        if self.max_file_size < 1024 {
            return Err(StoreError::ConfigInvalid(format!(
                "max_file_size {} is below the 1 KiB floor",
                self.max_file_size
            )));
        }
        if self.auto_save_interval_ms < AUTO_SAVE_INTERVAL_MIN_MS
            || self.auto_save_interval_ms > AUTO_SAVE_INTERVAL_MAX_MS
        {
            return Err(StoreError::ConfigInvalid(format!(
                "auto_save_interval_ms {} outside [{AUTO_SAVE_INTERVAL_MIN_MS}, {AUTO_SAVE_INTERVAL_MAX_MS}]",
                self.auto_save_interval_ms
            )));
        }
        Ok(())
    }
}
