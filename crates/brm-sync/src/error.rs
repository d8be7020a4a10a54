//! # Sync Error Types
//!
//! Error types for mediator sync operations.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Sync Error Categories                             │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────┐ │
//! │  │  Configuration  │  │   Mediator      │  │     Engine              │ │
//! │  │                 │  │                 │  │                         │ │
//! │  │  InvalidConfig  │  │  NotFound       │  │  Interrupted            │ │
//! │  │  InvalidUrl     │  │  Conflict       │  │  MissingBackupManager   │ │
//! │  │  ConfigLoad...  │  │  Status         │  │  TokenUnavailable       │ │
//! │  │                 │  │  Connectivity   │  │                         │ │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────────────┘ │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐                              │
//! │  │    Data         │  │    Internal     │                              │
//! │  │                 │  │                 │                              │
//! │  │  Serialization  │  │  ShuttingDown   │                              │
//! │  │  Core (model)   │  │  ChannelError   │                              │
//! │  └─────────────────┘  └─────────────────┘                              │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use brm_core::CoreError;
use thiserror::Error;

/// Result type alias for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Marker the mediator puts in a conflict body when the presented ETag is stale.
pub const STALE_TOKEN_MARKER: &str = "ETag value not current";

// =============================================================================
// Mediator Errors
// =============================================================================

/// What a call to the mediator can fail with.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MediatorError {
    /// 404.
    #[error("Resource not found: {resource}")]
    NotFound { resource: String },

    /// 409.
    #[error("Conflict: {message}")]
    Conflict { message: String },

    /// Any other non-2xx status.
    #[error("HTTP {status}: {message}")]
    Status { status: u16, message: String },

    /// No answer: connection refused, timeout, TLS failure.
    #[error("Mediator unreachable: {0}")]
    Connectivity(String),

    /// The answer could not be decoded.
    #[error("Invalid mediator response: {0}")]
    Decode(String),
}

impl MediatorError {
    pub fn is_connectivity(&self) -> bool {
        matches!(self, MediatorError::Connectivity(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, MediatorError::NotFound { .. })
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, MediatorError::Conflict { .. })
    }

    /// A conflict caused by a stale version token.
    pub fn is_stale_token(&self) -> bool {
        match self {
            MediatorError::Conflict { message } => message.contains(STALE_TOKEN_MARKER),
            _ => false,
        }
    }

    /// The mediator says the patched path does not exist.
    ///
    /// It answers 404 for a missing resource and 400 for a patch whose path
    /// cannot be resolved.
    pub fn indicates_missing_path(&self) -> bool {
        matches!(
            self,
            MediatorError::NotFound { .. } | MediatorError::Status { status: 400, .. }
        )
    }

    /// True for an HTTP error answer (as opposed to no answer).
    pub fn is_http_error(&self) -> bool {
        matches!(
            self,
            MediatorError::NotFound { .. }
                | MediatorError::Conflict { .. }
                | MediatorError::Status { .. }
        )
    }
}

impl From<reqwest::Error> for MediatorError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            MediatorError::Decode(err.to_string())
        } else {
            MediatorError::Connectivity(err.to_string())
        }
    }
}

// =============================================================================
// Sync Errors
// =============================================================================

/// Sync error type covering all possible sync failures.
#[derive(Debug, Error)]
pub enum SyncError {
    // =========================================================================
    // Configuration Errors
    // =========================================================================
    /// Invalid sync configuration.
    #[error("Invalid sync configuration: {0}")]
    InvalidConfig(String),

    /// Invalid mediator URL.
    #[error("Invalid mediator URL: {0}")]
    InvalidUrl(String),

    /// Failed to load config file.
    #[error("Failed to load config: {0}")]
    ConfigLoadFailed(String),

    /// Failed to save config file.
    #[error("Failed to save config: {0}")]
    ConfigSaveFailed(String),

    // =========================================================================
    // Mediator Errors
    // =========================================================================
    #[error(transparent)]
    Mediator(#[from] MediatorError),

    // =========================================================================
    // Engine Errors
    // =========================================================================
    /// A sleep was cut short by shutdown.
    #[error("Interrupted by shutdown")]
    Interrupted,

    /// A non-ADD patch names a backup manager the mediator does not have.
    #[error("Backup Manager is missing in the mediator for path {path}")]
    MissingBackupManager { path: String },

    /// The mediator did not return a version token.
    #[error("Version token unavailable for {resource}")]
    TokenUnavailable { resource: String },

    // =========================================================================
    // Data Errors
    // =========================================================================
    /// Failed to serialize a body.
    #[error("Serialization failed: {0}")]
    SerializationFailed(String),

    /// Failed to deserialize a body.
    #[error("Deserialization failed: {0}")]
    DeserializationFailed(String),

    /// Model lookup or document parsing failed.
    #[error(transparent)]
    Core(#[from] CoreError),

    // =========================================================================
    // Internal Errors
    // =========================================================================
    /// Internal sync client error.
    #[error("Internal error: {0}")]
    Internal(String),

    /// Client is shutting down.
    #[error("Sync client is shutting down")]
    ShuttingDown,

    /// Channel send/receive failed.
    #[error("Channel error: {0}")]
    ChannelError(String),
}

// =============================================================================
// Error Conversions
// =============================================================================

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        SyncError::SerializationFailed(err.to_string())
    }
}

impl From<url::ParseError> for SyncError {
    fn from(err: url::ParseError) -> Self {
        SyncError::InvalidUrl(err.to_string())
    }
}

impl From<std::io::Error> for SyncError {
    fn from(err: std::io::Error) -> Self {
        SyncError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::de::Error> for SyncError {
    fn from(err: toml::de::Error) -> Self {
        SyncError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::ser::Error> for SyncError {
    fn from(err: toml::ser::Error) -> Self {
        SyncError::ConfigSaveFailed(err.to_string())
    }
}

impl From<reqwest::Error> for SyncError {
    fn from(err: reqwest::Error) -> Self {
        SyncError::Mediator(err.into())
    }
}

// =============================================================================
// Error Categorization (for retry logic)
// =============================================================================

impl SyncError {
    /// Returns true if the operation can be retried as is.
    ///
    /// ## Retryable Errors
    /// - Mediator unreachable
    /// - Stale version token
    /// - Version token not (yet) available
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Mediator(e) => e.is_connectivity() || e.is_stale_token(),
            SyncError::TokenUnavailable { .. } => true,
            _ => false,
        }
    }

    /// Returns true if this error indicates a configuration problem.
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            SyncError::InvalidConfig(_)
                | SyncError::InvalidUrl(_)
                | SyncError::ConfigLoadFailed(_)
                | SyncError::ConfigSaveFailed(_)
        )
    }

    /// The mediator error behind this error, if any.
    pub fn mediator(&self) -> Option<&MediatorError> {
        match self {
            SyncError::Mediator(e) => Some(e),
            _ => None,
        }
    }

    pub fn is_conflict(&self) -> bool {
        match self {
            SyncError::Mediator(e) => e.is_conflict(),
            SyncError::MissingBackupManager { .. } => true,
            _ => false,
        }
    }
}
