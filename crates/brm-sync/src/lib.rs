//! # brm-sync: Configuration Mediator Sync Client
//!
//! Keeps the configuration mediator's copy of the backup/restore model in
//! step with the local one, one request at a time, in submission order.
//!
//! ## Architecture Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Sync Client Architecture                         │
//! │                                                                         │
//! │  ┌──────────────────────────────────────────────────────────────────┐  │
//! │  │                 SyncOrchestrator (Main Orchestrator)              │  │
//! │  │                                                                  │  │
//! │  │  Startup push, access roles, subscription, lease renewal,        │  │
//! │  │  recovery worker, domain-event entry points                      │  │
//! │  └────────────────────────────┬─────────────────────────────────────┘  │
//! │                               │                                         │
//! │         ┌─────────────────────┼─────────────────────┐                  │
//! │         ▼                     ▼                     ▼                   │
//! │  ┌────────────────┐  ┌────────────────┐  ┌────────────────────────┐    │
//! │  │ RequestBuilder │  │ RequestQueue   │  │ NotificationHandler    │    │
//! │  │                │  │                │  │                        │    │
//! │  │ Events →       │─►│ Single consumer│  │ Gate on token and      │    │
//! │  │ typed requests │  │ FIFO + front   │  │ sequence, re-fetch,    │    │
//! │  │ + remediation  │  │ insertion      │  │ remote → local paths   │    │
//! │  └────────────────┘  └───────┬────────┘  └───────────┬────────────┘    │
//! │                              │                       │                  │
//! │                      ┌───────▼────────┐      ┌───────▼────────┐        │
//! │                      │ TransferEngine │─────►│ VersionTracker │        │
//! │                      │ ETag, retries, │      │ token, seq,    │        │
//! │                      │ index transl.  │      │ snapshot       │        │
//! │                      └───────┬────────┘      └────────────────┘        │
//! │                              │                                          │
//! │                      ┌───────▼────────┐                                 │
//! │                      │ MediatorClient │  reqwest, rustls                │
//! │                      └────────────────┘                                 │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//! - [`orchestrator`] - Main `SyncOrchestrator`
//! - [`builder`] - Domain events to requests
//! - [`queue`] - Ordered single-consumer request queue
//! - [`engine`] - Executes one request: token, translation, retry, remediation
//! - [`request`] - Request, retry budget and remediation tags
//! - [`version`] - Version token and notification sequence tracking
//! - [`inbound`] - Mediator change notifications
//! - [`client`] - REST client for the mediator
//! - [`config`] - Sync configuration
//! - [`error`] - Sync error types
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use brm_core::StaticModel;
//! use brm_sync::{HttpMediatorClient, SyncConfig, SyncOrchestrator};
//!
//! let config = SyncConfig::load_or_default(None);
//! let client = Arc::new(HttpMediatorClient::new(&config.mediator)?);
//! let model = Arc::new(StaticModel::new(vec![]));
//!
//! let orchestrator = SyncOrchestrator::new(config, client, model)?;
//! orchestrator.initialize().await?;
//! orchestrator.start_lease_renewal();
//!
//! orchestrator.add_backup("DEFAULT", "backup-1").await?;
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod builder;
pub mod client;
pub mod config;
pub mod engine;
pub mod error;
pub mod inbound;
pub mod orchestrator;
pub mod queue;
pub mod request;
pub mod version;

#[cfg(test)]
mod testing;

// =============================================================================
// Re-exports
// =============================================================================

pub use builder::{AccessRole, RequestBuilder};
pub use client::{HttpMediatorClient, MediatorClient, Versioned};
pub use config::{AgentSettings, MediatorSettings, SubscriptionSettings, SyncConfig, SyncSettings};
pub use engine::{SyncFlags, TransferEngine};
pub use error::{MediatorError, SyncError, SyncResult};
pub use inbound::{IntakeOutcome, Notification, NotificationHandler};
pub use orchestrator::{Population, SyncOrchestrator, SyncStatus};
pub use queue::{Disposition, Processor, RequestQueue, Shutdown};
pub use request::{Recovery, Remediation, Request, RetryBudget, Verb};
pub use version::{VersionState, VersionTracker};
