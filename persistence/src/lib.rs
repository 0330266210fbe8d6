//! Session persistence engine for Quill.
//!
//! Durable, crash-safe storage for conversation sessions: atomic writes
//! with backups, a self-healing secondary index, schema-versioned files
//! with automatic forward migration, content search, policy-driven
//! retention, sanitized export/import, and an audit trail. A single
//! process owns the sessions directory; hosts consume the engine through
//! [`SessionManager`] and the [`SafeSessionManager`] wrapper.

pub mod audit;
pub mod cache;
pub mod codec;
pub mod config;
pub mod error;
pub mod export;
pub mod fsio;
pub mod lazy;
pub mod manager;
pub mod migration;
pub mod recovery;
pub mod sanitizer;
pub mod search;
pub mod startup;
pub mod storage;
pub mod tasks;
pub mod types;
pub mod validator;

pub use audit::AuditConfig;
pub use audit::AuditEntry;
pub use audit::AuditLevel;
pub use audit::AuditLogger;
pub use cache::CacheConfig;
pub use cache::CacheStats;
pub use cache::MetadataCache;
pub use config::EngineConfig;
pub use error::ErrorKind;
pub use error::MigrationErrorKind;
pub use error::RecoveryOption;
pub use error::Result;
pub use error::StoreError;
pub use export::ExportFormat;
pub use export::ExportOptions;
pub use export::ImportOptions;
pub use fsio::FsConfig;
pub use fsio::FsLayer;
pub use lazy::LazyLoaderConfig;
pub use lazy::LazySessionLoader;
pub use manager::AutoSaveConfig;
pub use manager::CleanupOptions;
pub use manager::CleanupReport;
pub use manager::Collaborators;
pub use manager::ConfirmationHandler;
pub use manager::CreateSessionOptions;
pub use manager::ImportReport;
pub use manager::ListOptions;
pub use manager::LoadOptions;
pub use manager::NotificationHandler;
pub use manager::SessionManager;
pub use manager::SortBy;
pub use manager::SortOrder;
pub use migration::MigrationManager;
pub use recovery::AvailableSessionsReport;
pub use recovery::SafeSessionManager;
pub use sanitizer::SanitizerConfig;
pub use sanitizer::SensitiveDataFilter;
pub use search::FilterCriteria;
pub use search::SearchEngine;
pub use search::SearchOptions;
pub use search::SearchResult;
pub use startup::StartupOptions;
pub use startup::StartupReport;
pub use storage::SessionStorage;
pub use storage::StorageBackend;
pub use storage::StorageConfig;
pub use tasks::BackgroundTask;
pub use tasks::BackgroundTaskConfig;
pub use tasks::BackgroundTaskManager;
pub use tasks::TaskKind;
pub use types::CURRENT_SCHEMA_VERSION;
pub use types::Message;
pub use types::MessageContent;
pub use types::MessageRole;
pub use types::SCHEMA_VERSION_CHAIN;
pub use types::Session;
pub use types::SessionIndex;
pub use types::SessionMetadata;
pub use types::TokenCount;
pub use types::VersionedSession;
pub use validator::IndexValidator;
