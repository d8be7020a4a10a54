//! # brm-core: Pure Configuration Model
//!
//! Everything the sync client needs to know about the mediator's document,
//! without talking to it.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        BRM Sync Architecture                            │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                    apps/brm-agent                               │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │   brm-sync: queue, transfer engine, REST client, orchestrator   │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │               ★ brm-core (THIS CRATE) ★                         │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────┐  ┌───────────┐  ┌───────────┐  ┌───────────┐  │   │
//! │  │   │   types   │  │   path    │  │ document  │  │   index   │  │   │
//! │  │   │  Patch    │  │ Resources │  │  remote   │  │ local ⇄   │  │   │
//! │  │   │  ops      │  │ positions │  │  snapshot │  │ remote    │  │   │
//! │  │   └───────────┘  └───────────┘  └───────────┘  └───────────┘  │   │
//! │  │                                                                 │   │
//! │  │   NO NETWORK • NO FILES • NO ASYNC                              │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`types`] - Patch operations and the mediator patch body
//! - [`path`] - Resource names, document paths, position rewriting
//! - [`model`] - Local domain entities and the [`ModelView`] accessor
//! - [`document`] - Parsed remote configuration snapshot
//! - [`index`] - Local/remote position translation
//! - [`error`] - Domain error types
//!
//! ## Example Usage
//!
//! ```rust
//! use brm_core::{ConfigurationDocument, IndexTranslator, Resources, StaticModel, BackupManager};
//!
//! let resources = Resources::new("backup-restore");
//! let model = StaticModel::new(vec![BackupManager::new("B"), BackupManager::new("A")]);
//! let doc = ConfigurationDocument::parse(
//!     r#"{"data": {"backup-restore:brm": {"backup-manager": [{"id": "A"}, {"id": "B"}]}}}"#,
//! ).unwrap();
//!
//! let translator = IndexTranslator::new(&model, Some(&doc));
//! let remote = translator.to_remote_path(&resources.scheduler_path(0));
//! assert_eq!(remote.as_deref(), Some("/backup-restore:brm/backup-manager/1/scheduler"));
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod document;
pub mod error;
pub mod index;
pub mod model;
pub mod path;
pub mod types;

// =============================================================================
// Re-exports for Convenience
// =============================================================================

pub use document::ConfigurationDocument;
pub use error::{CoreError, CoreResult};
pub use index::IndexTranslator;
pub use model::*;
pub use path::Resources;
pub use types::*;
