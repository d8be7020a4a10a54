//! # Error Types
//!
//! Domain-specific error types for brm-core.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Error Types                                     │
//! │                                                                         │
//! │  brm-core errors (this file)                                           │
//! │  └── CoreError        - Path, document and model lookup failures       │
//! │                                                                         │
//! │  brm-sync errors (separate crate)                                      │
//! │  ├── MediatorError    - What the REST client reports                   │
//! │  └── SyncError        - Everything the sync client can fail with       │
//! │                                                                         │
//! │  Flow: CoreError → SyncError → logged / remediation                    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use thiserror::Error;

/// Result alias for brm-core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Pure model errors.
///
/// None of these are retryable: they describe a request that cannot be
/// built or a document that cannot be read, not a transient condition.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CoreError {
    /// A configuration path is not shaped like `/S:brm/backup-manager/<n>/...`.
    #[error("Invalid configuration path: {0}")]
    InvalidPath(String),

    /// The remote document could not be parsed.
    #[error("Malformed configuration document: {0}")]
    MalformedDocument(String),

    /// The backup manager is not part of the local model.
    ///
    /// ## When This Occurs
    /// - A domain event names a manager that was removed meanwhile
    /// - An inbound notification references a manager created remotely
    #[error("Backup manager not found: {0}")]
    UnknownBackupManager(String),

    /// The backup is not registered under the given manager.
    #[error("Backup {backup} not found in backup manager {manager}")]
    UnknownBackup { manager: String, backup: String },

    /// A periodic event is not registered under the given manager.
    #[error("Periodic event {event} not found in backup manager {manager}")]
    UnknownPeriodicEvent { manager: String, event: String },
}
