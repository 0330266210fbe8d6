//! Startup sequence: detect available sessions, heal what can be healed,
//! and report engine health before any session is exposed to the host.

use crate::error::Result;
use crate::manager::ListOptions;
use crate::recovery::SafeSessionManager;
use crate::types::SessionMetadata;
use tracing::info;
use tracing::warn;
use uuid::Uuid;

#[derive(Debug, Clone, Copy)]
pub struct StartupOptions {
    /// Run the validator sweep before listing sessions.
    pub run_validator: bool,
    /// Restore the most recently modified valid session.
    pub restore_most_recent: bool,
}

impl Default for StartupOptions {
    fn default() -> Self {
        Self {
            run_validator: true,
            restore_most_recent: false,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct StartupReport {
    /// True when no sessions were lost or flagged during startup.
    pub healthy: bool,
    pub session_count: usize,
    pub available_sessions: Vec<SessionMetadata>,
    pub invalid_sessions: Vec<Uuid>,
    pub restored: Option<Uuid>,
    pub warnings: Vec<String>,
}

/// Bring the engine up and return its health.
///
/// Restoration failures never abort startup; a fresh session is always a
/// valid fallback for the host.
pub async fn initialize(
    safe: &SafeSessionManager,
    options: &StartupOptions,
) -> Result<StartupReport> {
    let mut report = StartupReport::default();

    if options.run_validator {
        let detection = safe.detect_available_sessions_safely().await?;
        report.available_sessions = detection.valid_sessions;
        report.invalid_sessions = detection.invalid_sessions;
        report.warnings = detection.warnings;
    } else {
        report.available_sessions = safe
            .manager()
            .list_sessions(&ListOptions::default())
            .await?;
    }
    report.session_count = report.available_sessions.len();

    if options.restore_most_recent
        && let Some(most_recent) = report.available_sessions.first().cloned()
    {
        match safe.restore_session_safely(most_recent.id).await {
            Ok(session) => report.restored = Some(session.id),
            Err(err) => {
                warn!(session = %most_recent.id, %err, "startup restoration failed");
                report
                    .warnings
                    .push(format!("could not restore {}: {err}", most_recent.id));
            }
        }
    }

    report.healthy = report.invalid_sessions.is_empty() && report.warnings.is_empty();
    info!(
        sessions = report.session_count,
        healthy = report.healthy,
        restored = ?report.restored,
        "startup complete"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::manager::CreateSessionOptions;
    use crate::manager::SessionManager;
    use std::path::PathBuf;
    use std::sync::Arc;
    use tempfile::TempDir;

    async fn safe_manager(dir: &TempDir) -> SafeSessionManager {
        let config = EngineConfig {
            sessions_dir: dir.path().join("sessions"),
            auto_save_enabled: false,
            ..EngineConfig::default()
        };
        SafeSessionManager::new(Arc::new(SessionManager::new(config).await.unwrap()))
    }

    #[tokio::test]
    async fn empty_directory_is_healthy() {
        let dir = TempDir::new().unwrap();
        let safe = safe_manager(&dir).await;
        let report = initialize(&safe, &StartupOptions::default()).await.unwrap();
        assert!(report.healthy);
        assert_eq!(report.session_count, 0);
        assert!(report.restored.is_none());
    }

    #[tokio::test]
    async fn restores_most_recent_session() {
        let dir = TempDir::new().unwrap();
        let safe = safe_manager(&dir).await;
        let _older = safe
            .manager()
            .create_session(CreateSessionOptions {
                model: "gpt-4o".into(),
                workspace_root: PathBuf::from("/w"),
                ..CreateSessionOptions::default()
            })
            .await
            .unwrap();
        // Index timestamps are millisecond-precision; keep the two creates
        // from landing in the same tick.
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        let newer = safe
            .manager()
            .create_session(CreateSessionOptions {
                model: "gpt-4o".into(),
                workspace_root: PathBuf::from("/w"),
                ..CreateSessionOptions::default()
            })
            .await
            .unwrap();

        let report = initialize(
            &safe,
            &StartupOptions {
                restore_most_recent: true,
                ..StartupOptions::default()
            },
        )
        .await
        .unwrap();

        assert_eq!(report.session_count, 2);
        assert_eq!(report.restored, Some(newer.id));
        assert_eq!(
            safe.manager().current_session().await.unwrap().id,
            newer.id
        );
    }

    #[tokio::test]
    async fn corrupted_session_degrades_health_but_not_startup() {
        let dir = TempDir::new().unwrap();
        let safe = safe_manager(&dir).await;
        let good = safe
            .manager()
            .create_session(CreateSessionOptions {
                model: "gpt-4o".into(),
                workspace_root: PathBuf::from("/w"),
                ..CreateSessionOptions::default()
            })
            .await
            .unwrap();
        let bad = safe
            .manager()
            .create_session(CreateSessionOptions {
                model: "gpt-4o".into(),
                workspace_root: PathBuf::from("/w"),
                ..CreateSessionOptions::default()
            })
            .await
            .unwrap();
        std::fs::write(
            safe.manager().storage().session_path(bad.id),
            b"not an envelope",
        )
        .unwrap();

        let report = initialize(&safe, &StartupOptions::default()).await.unwrap();
        assert!(!report.healthy);
        assert_eq!(report.invalid_sessions, vec![bad.id]);
        assert_eq!(report.session_count, 1);
        assert_eq!(report.available_sessions[0].id, good.id);
    }
}
