//! # Notification Intake
//!
//! Handles change notifications the mediator sends for the subscribed
//! configuration.
//!
//! ## Intake Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  { configName, event, baseETag, configETag, notifId, patch[] }          │
//! │                                                                         │
//! │  configName is not ours                     ──► IGNORED                 │
//! │  VersionTracker rejects (baseETag, notifId) ──► REJECTED                │
//! │  otherwise                                                              │
//! │    claim notifId as the last sequence (same lock as the check)          │
//! │    GET configurations/S  ──► record document + token                    │
//! │    patch paths: remote positions ──► local positions                    │
//! │                 (paths naming unknown entities are dropped)             │
//! │                                         ──► ACCEPTED(local patch)       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Applying the accepted patch to the domain model is up to the caller.

use std::sync::Arc;

use brm_core::{IndexTranslator, ModelView, PatchItem, Resources};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::client::MediatorClient;
use crate::error::{SyncError, SyncResult};
use crate::version::VersionTracker;

// =============================================================================
// Notification
// =============================================================================

/// Payload of a mediator change notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub config_name: String,
    #[serde(default)]
    pub event: String,
    #[serde(rename = "baseETag")]
    pub base_etag: String,
    #[serde(rename = "configETag", default)]
    pub config_etag: Option<String>,
    pub notif_id: i64,
    #[serde(default)]
    pub patch: Vec<PatchItem>,
}

impl Notification {
    pub fn from_json(raw: &str) -> SyncResult<Self> {
        serde_json::from_str(raw).map_err(|e| SyncError::DeserializationFailed(e.to_string()))
    }
}

/// What became of a notification.
#[derive(Debug, Clone, PartialEq)]
pub enum IntakeOutcome {
    /// Addressed to another configuration.
    Ignored,
    /// Stale, out of order, or based on a revision we never saw.
    Rejected,
    /// The patch with paths in local positions.
    Accepted { patch: Vec<PatchItem> },
}

// =============================================================================
// Notification Handler
// =============================================================================

pub struct NotificationHandler {
    client: Arc<dyn MediatorClient>,
    tracker: Arc<VersionTracker>,
    model: Arc<dyn ModelView>,
    resources: Resources,
}

impl NotificationHandler {
    pub fn new(
        client: Arc<dyn MediatorClient>,
        tracker: Arc<VersionTracker>,
        model: Arc<dyn ModelView>,
        resources: Resources,
    ) -> Self {
        NotificationHandler {
            client,
            tracker,
            model,
            resources,
        }
    }

    pub async fn handle(&self, notification: Notification) -> SyncResult<IntakeOutcome> {
        debug!(
            config = %notification.config_name,
            event = %notification.event,
            notif_id = notification.notif_id,
            "Processing notification"
        );

        if notification.config_name != self.resources.schema_name() {
            debug!(config = %notification.config_name, "Notification for another configuration");
            return Ok(IntakeOutcome::Ignored);
        }

        if !self
            .tracker
            .accept_notification(&notification.base_etag, notification.notif_id)
            .await
        {
            info!(notif_id = notification.notif_id, "Notification rejected");
            return Ok(IntakeOutcome::Rejected);
        }

        let fetched = self
            .client
            .get_with_version(&self.resources.configuration())
            .await?;
        let token = fetched.etag.or(notification.config_etag);
        self.tracker.record_fetch(fetched.body, token).await;

        let document = self.tracker.parsed_document().await;
        let translator = IndexTranslator::new(self.model.as_ref(), document.as_ref());
        let patch = notification
            .patch
            .into_iter()
            .filter_map(|item| match translator.to_local_path(&item.path) {
                Some(path) => Some(PatchItem { path, ..item }),
                None => {
                    warn!(path = %item.path, "Notification path names an unknown entity, dropped");
                    None
                }
            })
            .collect();

        info!(notif_id = notification.notif_id, "Notification accepted");
        Ok(IntakeOutcome::Accepted { patch })
    }
}
