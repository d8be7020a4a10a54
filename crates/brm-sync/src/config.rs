//! # Sync Configuration
//!
//! Configuration management for the mediator sync client.
//!
//! ## Configuration Sources
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Configuration Priority                               │
//! │                                                                         │
//! │  1. Environment Variables (highest priority)                           │
//! │     BRM_SYNC_MEDIATOR_URL=https://cm-mediator:5004/cm/api/v1/          │
//! │     BRM_SYNC_ENABLED=false                                             │
//! │                                                                         │
//! │  2. TOML Config File                                                   │
//! │     ~/.config/sync/sync.toml (Linux)                                   │
//! │     ~/Library/Application Support/io.brm.sync/sync.toml (macOS)        │
//! │                                                                         │
//! │  3. Default Values (lowest priority)                                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Configuration File Format
//! ```toml
//! # sync.toml
//! [mediator]
//! url = "http://eric-cm-mediator:5003/cm/api/v1/"
//! schema_name = "backup-restore"
//!
//! [sync]
//! enabled = true
//! max_attempts = 10
//! initial_delay_ms = 100
//! max_delay_ms = 3000
//!
//! [subscription]
//! callback_url = "http://brm:7001/v2/notifications"
//! lease_seconds = 157680000
//!
//! [agent]
//! model_path = "/var/lib/brm/model.json"
//! ```

use std::path::PathBuf;
use std::time::Duration;

use backoff::ExponentialBackoff;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use url::Url;

use crate::error::{SyncError, SyncResult};

// =============================================================================
// Mediator Settings
// =============================================================================

/// Where the mediator lives and what to call our documents.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediatorSettings {
    /// Base URL of the mediator REST API.
    #[serde(default = "default_mediator_url")]
    pub url: String,

    /// Schema and configuration name.
    #[serde(default = "default_schema_name")]
    pub schema_name: String,

    /// Title of the configuration document.
    #[serde(default = "default_schema_title")]
    pub schema_title: String,

    /// JSON schema to upload. The bundled schema is used when unset.
    #[serde(default)]
    pub schema_path: Option<PathBuf>,

    /// Per-request timeout (seconds).
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// PEM file with the CA certificate to trust.
    #[serde(default)]
    pub ca_cert_path: Option<PathBuf>,

    /// PEM file with the client certificate.
    #[serde(default)]
    pub client_cert_path: Option<PathBuf>,

    /// PEM file with the client private key.
    #[serde(default)]
    pub client_key_path: Option<PathBuf>,
}

fn default_mediator_url() -> String {
    "http://eric-cm-mediator:5003/cm/api/v1/".to_string()
}

fn default_schema_name() -> String {
    brm_core::path::DEFAULT_SCHEMA_NAME.to_string()
}

fn default_schema_title() -> String {
    "Backup and Restore Orchestrator".to_string()
}

fn default_request_timeout() -> u64 {
    30
}

impl Default for MediatorSettings {
    fn default() -> Self {
        MediatorSettings {
            url: default_mediator_url(),
            schema_name: default_schema_name(),
            schema_title: default_schema_title(),
            schema_path: None,
            request_timeout_secs: default_request_timeout(),
            ca_cert_path: None,
            client_cert_path: None,
            client_key_path: None,
        }
    }
}

impl MediatorSettings {
    /// Parsed base URL, always ending in `/` so relative joins keep the path.
    pub fn base_url(&self) -> SyncResult<Url> {
        let raw = if self.url.ends_with('/') {
            self.url.clone()
        } else {
            format!("{}/", self.url)
        };
        Ok(Url::parse(&raw)?)
    }
}

// =============================================================================
// Sync Settings
// =============================================================================

/// Retry and pacing behavior of the request queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncSettings {
    /// Feature flag. When false every request is dropped.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Retry budget of requests that do not retry forever.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// First backoff delay after a connectivity failure (milliseconds).
    #[serde(default = "default_initial_delay")]
    pub initial_delay_ms: u64,

    /// Backoff ceiling (milliseconds).
    #[serde(default = "default_max_delay")]
    pub max_delay_ms: u64,

    /// Idle wake-up interval of the queue consumer (seconds).
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    /// Pause after any HTTP error answer (milliseconds).
    #[serde(default = "default_http_error_delay")]
    pub http_error_delay_ms: u64,

    /// Pause before fetching a version token (milliseconds).
    #[serde(default = "default_token_fetch_delay")]
    pub token_fetch_delay_ms: u64,

    /// First backoff delay before requeueing when no token is available
    /// (milliseconds). Doubles on each miss up to `max_delay_ms`.
    #[serde(default = "default_token_unavailable_delay")]
    pub token_unavailable_delay_ms: u64,

    /// Pause between reachability probes at startup (milliseconds).
    #[serde(default = "default_reachability_delay")]
    pub reachability_delay_ms: u64,
}

fn default_true() -> bool {
    true
}

fn default_max_attempts() -> u32 {
    10
}

fn default_initial_delay() -> u64 {
    100
}

fn default_max_delay() -> u64 {
    3000
}

fn default_poll_interval() -> u64 {
    5
}

fn default_http_error_delay() -> u64 {
    100
}

fn default_token_fetch_delay() -> u64 {
    500
}

fn default_token_unavailable_delay() -> u64 {
    1000
}

fn default_reachability_delay() -> u64 {
    1000
}

fn doubling(first: Duration, cap: Duration) -> ExponentialBackoff {
    ExponentialBackoff {
        initial_interval: first,
        current_interval: first,
        randomization_factor: 0.0,
        multiplier: 2.0,
        max_interval: cap,
        max_elapsed_time: None,
        ..Default::default()
    }
}

impl Default for SyncSettings {
    fn default() -> Self {
        SyncSettings {
            enabled: true,
            max_attempts: default_max_attempts(),
            initial_delay_ms: default_initial_delay(),
            max_delay_ms: default_max_delay(),
            poll_interval_secs: default_poll_interval(),
            http_error_delay_ms: default_http_error_delay(),
            token_fetch_delay_ms: default_token_fetch_delay(),
            token_unavailable_delay_ms: default_token_unavailable_delay(),
            reachability_delay_ms: default_reachability_delay(),
        }
    }
}

impl SyncSettings {
    /// Backoff for connectivity failures: doubling, capped, never gives up.
    pub fn backoff(&self) -> ExponentialBackoff {
        doubling(
            Duration::from_millis(self.initial_delay_ms),
            Duration::from_millis(self.max_delay_ms),
        )
    }

    /// Backoff while the mediator hands out no version token. Starts at
    /// `token_unavailable_delay_ms` and shares the connectivity ceiling.
    pub fn token_backoff(&self) -> ExponentialBackoff {
        let first = self.token_unavailable_delay();
        doubling(first, first.max(Duration::from_millis(self.max_delay_ms)))
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn http_error_delay(&self) -> Duration {
        Duration::from_millis(self.http_error_delay_ms)
    }

    pub fn token_fetch_delay(&self) -> Duration {
        Duration::from_millis(self.token_fetch_delay_ms)
    }

    pub fn token_unavailable_delay(&self) -> Duration {
        Duration::from_millis(self.token_unavailable_delay_ms)
    }

    pub fn reachability_delay(&self) -> Duration {
        Duration::from_millis(self.reachability_delay_ms)
    }
}

// =============================================================================
// Subscription Settings
// =============================================================================

/// Change-notification subscription and its lease.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscriptionSettings {
    /// URL the mediator posts notifications to.
    #[serde(default = "default_callback_url")]
    pub callback_url: String,

    /// Requested lease (seconds).
    #[serde(default = "default_lease_seconds")]
    pub lease_seconds: i64,

    /// How often the lease is checked (seconds).
    #[serde(default = "default_renewal_interval")]
    pub renewal_interval_secs: u64,

    /// Renew when fewer seconds than this remain.
    #[serde(default = "default_renewal_threshold")]
    pub renewal_threshold_secs: i64,
}

fn default_callback_url() -> String {
    "http://eric-ctrl-bro:7001/v2/notifications".to_string()
}

fn default_lease_seconds() -> i64 {
    157_680_000
}

fn default_renewal_interval() -> u64 {
    240
}

fn default_renewal_threshold() -> i64 {
    172_800
}

impl Default for SubscriptionSettings {
    fn default() -> Self {
        SubscriptionSettings {
            callback_url: default_callback_url(),
            lease_seconds: default_lease_seconds(),
            renewal_interval_secs: default_renewal_interval(),
            renewal_threshold_secs: default_renewal_threshold(),
        }
    }
}

impl SubscriptionSettings {
    pub fn renewal_interval(&self) -> Duration {
        Duration::from_secs(self.renewal_interval_secs)
    }
}

// =============================================================================
// Agent Settings
// =============================================================================

/// Settings of the agent binary.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentSettings {
    /// JSON snapshot of the backup managers to mirror.
    #[serde(default)]
    pub model_path: Option<PathBuf>,
}

// =============================================================================
// Main Sync Configuration
// =============================================================================

/// Complete sync configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyncConfig {
    #[serde(default)]
    pub mediator: MediatorSettings,

    #[serde(default)]
    pub sync: SyncSettings,

    #[serde(default)]
    pub subscription: SubscriptionSettings,

    #[serde(default)]
    pub agent: AgentSettings,
}

impl SyncConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads configuration from file, environment, and defaults.
    ///
    /// ## Load Order (later overrides earlier)
    /// 1. Default values
    /// 2. Config file (sync.toml)
    /// 3. Environment variables
    pub fn load(config_path: Option<PathBuf>) -> SyncResult<Self> {
        let mut config = Self::default();

        if let Some(path) = config_path.or_else(Self::default_config_path) {
            if path.exists() {
                info!(?path, "Loading sync config from file");
                let contents = std::fs::read_to_string(&path)?;
                config = toml::from_str(&contents)?;
            } else {
                debug!(?path, "Config file not found, using defaults");
            }
        }

        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    /// Loads config or returns default if load fails.
    pub fn load_or_default(config_path: Option<PathBuf>) -> Self {
        Self::load(config_path).unwrap_or_else(|e| {
            warn!("Failed to load sync config: {}. Using defaults.", e);
            Self::default()
        })
    }

    /// Saves configuration to file.
    pub fn save(&self, config_path: Option<PathBuf>) -> SyncResult<()> {
        let path = config_path
            .or_else(Self::default_config_path)
            .ok_or_else(|| SyncError::ConfigSaveFailed("No config path available".into()))?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let contents = toml::to_string_pretty(self)?;
        std::fs::write(&path, contents)?;

        info!(?path, "Sync config saved");
        Ok(())
    }

    /// Validates the configuration.
    pub fn validate(&self) -> SyncResult<()> {
        let url = self.mediator.base_url()?;
        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(SyncError::InvalidUrl(format!(
                "Mediator URL must start with http:// or https://, got: {}",
                self.mediator.url
            )));
        }

        if self.mediator.schema_name.trim().is_empty() {
            return Err(SyncError::InvalidConfig(
                "schema_name must not be empty".into(),
            ));
        }

        if self.sync.max_delay_ms < self.sync.initial_delay_ms {
            return Err(SyncError::InvalidConfig(
                "max_delay_ms must not be lower than initial_delay_ms".into(),
            ));
        }

        if self.subscription.renewal_interval_secs == 0 {
            return Err(SyncError::InvalidConfig(
                "renewal_interval_secs must be greater than 0".into(),
            ));
        }

        Ok(())
    }

    /// Applies `BRM_SYNC_*` environment variable overrides.
    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup("BRM_SYNC_MEDIATOR_URL") {
            debug!(url = %url, "Overriding mediator URL from environment");
            self.mediator.url = url;
        }

        if let Some(name) = lookup("BRM_SYNC_SCHEMA_NAME") {
            self.mediator.schema_name = name;
        }

        if let Some(enabled) = lookup("BRM_SYNC_ENABLED") {
            match enabled.to_lowercase().as_str() {
                "true" | "1" | "yes" => self.sync.enabled = true,
                "false" | "0" | "no" => self.sync.enabled = false,
                _ => warn!(value = %enabled, "Unknown BRM_SYNC_ENABLED value in environment"),
            }
        }

        if let Some(attempts) = lookup("BRM_SYNC_MAX_ATTEMPTS") {
            if let Ok(n) = attempts.parse::<u32>() {
                self.sync.max_attempts = n;
            }
        }

        if let Some(callback) = lookup("BRM_SYNC_CALLBACK_URL") {
            debug!(callback = %callback, "Overriding callback URL from environment");
            self.subscription.callback_url = callback;
        }

        if let Some(path) = lookup("BRM_SYNC_MODEL_PATH") {
            self.agent.model_path = Some(PathBuf::from(path));
        }
    }

    /// Returns the default config file path.
    fn default_config_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("io", "brm", "sync").map(|dirs| {
            let config_dir = dirs.config_dir();
            config_dir.join("sync.toml")
        })
    }

    // =========================================================================
    // Convenience Methods
    // =========================================================================

    pub fn schema_name(&self) -> &str {
        &self.mediator.schema_name
    }

    pub fn is_sync_enabled(&self) -> bool {
        self.sync.enabled
    }
}
