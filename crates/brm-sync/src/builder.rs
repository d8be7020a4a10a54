//! # Request Builder
//!
//! Turns intents ("backup b1 was added under manager DEFAULT", "recreate the
//! subscription") into [`Request`]s with the right resource, verb, payload,
//! retry budget and remediation.
//!
//! ## Request Catalogue
//! ```text
//! ┌──────────────────────────────┬────────┬──────────────────────────┬───────────────────────────────┐
//! │ intent                       │ verb   │ resource                 │ remediation                   │
//! ├──────────────────────────────┼────────┼──────────────────────────┼───────────────────────────────┤
//! │ delete configuration         │ DELETE │ configurations/S         │ drop                          │
//! │ create empty configuration   │ POST   │ configurations           │ recreate empty configuration  │
//! │ put configuration            │ PUT    │ configurations/S         │ recreate configuration        │
//! │ upload schema                │ POST   │ schemas                  │ upload schema                 │
//! │ delete schema                │ DELETE │ schemas/S                │ delete schema                 │
//! │ add access role              │ PATCH  │ configurations/ietf-...  │ drop                          │
//! │ subscribe / unsubscribe      │ POST / │ subscriptions[/S]        │ resubscribe                   │
//! │                              │ DELETE │                          │                               │
//! │ renew subscription           │ PUT    │ subscriptions/S          │ drop                          │
//! │ domain add / delete patch    │ PATCH  │ configurations/S         │ drop                          │
//! │ domain update patch          │ PATCH  │ configurations/S         │ swap ADD/REPLACE on conflict  │
//! └──────────────────────────────┴────────┴──────────────────────────┴───────────────────────────────┘
//! ```
//!
//! Domain patches address entities by LOCAL position; the transfer engine
//! rewrites positions against the mediator's document right before sending.

use std::sync::Arc;

use brm_core::document::{configuration_body, empty_configuration_body, local_schema_version};
use brm_core::{
    BackupManager, ConfigurationPatch, CoreError, ModelView, PatchOperation, ProgressReport,
    Resources,
};
use serde::Serialize;
use serde_json::{json, Value};
use tracing::debug;

use crate::config::{SubscriptionSettings, SyncConfig};
use crate::error::{SyncError, SyncResult};
use crate::request::{Recovery, Remediation, Request, RetryBudget, Verb};

const BUNDLED_SCHEMA: &str = include_str!("../schema/backup-restore.json");

const CONFIG_UPDATED_EVENT: &str = "configUpdated";
const NOTIFICATION_FORMAT: &str = "patch";

// =============================================================================
// Access Roles
// =============================================================================

/// Access-control roles registered for the schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessRole {
    SystemAdmin,
    SystemReadOnly,
}

impl AccessRole {
    pub const ALL: [AccessRole; 2] = [AccessRole::SystemAdmin, AccessRole::SystemReadOnly];

    /// Rule-list position in the access-control document.
    pub fn position(&self) -> usize {
        match self {
            AccessRole::SystemAdmin => 1,
            AccessRole::SystemReadOnly => 2,
        }
    }

    pub fn name(&self, schema_name: &str) -> String {
        match self {
            AccessRole::SystemAdmin => format!("{schema_name}-1-system-admin"),
            AccessRole::SystemReadOnly => format!("{schema_name}-2-system-read-only"),
        }
    }

    fn group(&self) -> &'static str {
        match self {
            AccessRole::SystemAdmin => "system-admin",
            AccessRole::SystemReadOnly => "system-read-only",
        }
    }

    fn access_operations(&self) -> &'static str {
        match self {
            AccessRole::SystemAdmin => "*",
            AccessRole::SystemReadOnly => "read",
        }
    }

    /// Needle searched for in the whitespace-stripped access document.
    pub fn marker(&self, schema_name: &str) -> String {
        format!("\"name\":\"{}\"", self.name(schema_name))
    }
}

// =============================================================================
// Request Builder
// =============================================================================

pub struct RequestBuilder {
    resources: Resources,
    model: Arc<dyn ModelView>,
    schema_title: String,
    schema: Value,
    subscription: SubscriptionSettings,
    max_attempts: u32,
}

impl RequestBuilder {
    /// Builds from configuration. The schema is read from `schema_path` when
    /// set, otherwise the bundled schema is used.
    pub fn new(config: &SyncConfig, model: Arc<dyn ModelView>) -> SyncResult<Self> {
        let raw = match &config.mediator.schema_path {
            Some(path) => std::fs::read_to_string(path)?,
            None => BUNDLED_SCHEMA.to_string(),
        };
        let schema: Value = serde_json::from_str(&raw)?;
        debug!(version = ?local_schema_version(&schema), "Schema loaded");

        Ok(RequestBuilder {
            resources: Resources::new(config.schema_name()),
            model,
            schema_title: config.mediator.schema_title.clone(),
            schema,
            subscription: config.subscription.clone(),
            max_attempts: config.sync.max_attempts,
        })
    }

    pub fn resources(&self) -> &Resources {
        &self.resources
    }

    pub fn schema_version(&self) -> Option<String> {
        local_schema_version(&self.schema)
    }

    pub fn model(&self) -> &Arc<dyn ModelView> {
        &self.model
    }

    // -------------------------------------------------------------------------
    // Configuration
    // -------------------------------------------------------------------------

    pub fn delete_configuration(&self) -> Request {
        Request::new(Verb::Delete, self.resources.configuration()).labeled("delete configuration")
    }

    pub fn create_empty_configuration(&self) -> Request {
        let body = empty_configuration_body(self.resources.schema_name(), &self.schema_title);
        Request::new(Verb::Post, self.resources.configurations())
            .with_body(body)
            .with_remediation(Remediation::Recover(Recovery::RecreateEmptyConfiguration))
            .labeled("create empty configuration")
    }

    /// PUT of every manager in the model.
    pub fn put_configuration(&self) -> SyncResult<Request> {
        Ok(self
            .put_managers(&self.model.managers())?
            .with_remediation(Remediation::Recover(Recovery::RecreateConfiguration)))
    }

    /// PUT of the given managers only, without remediation.
    pub fn put_managers(&self, managers: &[BackupManager]) -> SyncResult<Request> {
        let body = configuration_body(
            self.resources.schema_name(),
            &self.schema_title,
            &self.resources.data_key(),
            managers,
        )?;
        Ok(Request::new(Verb::Put, self.resources.configuration())
            .with_body(body)
            .labeled("put configuration"))
    }

    // -------------------------------------------------------------------------
    // Schema
    // -------------------------------------------------------------------------

    pub fn upload_schema(&self) -> Request {
        let body = json!({
            "name": self.resources.schema_name(),
            "title": self.schema_title,
            "jsonSchema": self.schema,
        });
        Request::new(Verb::Post, self.resources.schemas())
            .with_body(body)
            .with_remediation(Remediation::Recover(Recovery::UploadSchema))
            .labeled("upload schema")
    }

    pub fn delete_schema(&self) -> Request {
        Request::new(Verb::Delete, self.resources.schema())
            .with_remediation(Remediation::Recover(Recovery::DeleteSchema))
            .labeled("delete schema")
    }

    // -------------------------------------------------------------------------
    // Access roles
    // -------------------------------------------------------------------------

    pub fn add_access_role(&self, role: AccessRole) -> Request {
        let schema_name = self.resources.schema_name();
        let name = role.name(schema_name);
        let value = json!({
            "name": name,
            "group": [role.group()],
            "rule": [{
                "name": name,
                "module-name": schema_name,
                "access-operations": role.access_operations(),
                "action": "permit",
            }],
        });
        let patch = ConfigurationPatch::new(
            PatchOperation::Add,
            self.resources.rule_list_path(role.position()),
            value,
        );
        Request::new(Verb::Patch, self.resources.access_control())
            .with_patch(patch)
            .labeled(format!("add role {name}"))
    }

    // -------------------------------------------------------------------------
    // Subscription
    // -------------------------------------------------------------------------

    pub fn subscription_body(&self) -> Value {
        let name = self.resources.schema_name();
        json!({
            "id": name,
            "configName": name,
            "event": [CONFIG_UPDATED_EVENT],
            "callback": self.subscription.callback_url,
            "updateNotificationFormat": NOTIFICATION_FORMAT,
            "leaseSeconds": self.subscription.lease_seconds,
        })
    }

    pub fn subscribe(&self, attempts: RetryBudget, startup: bool) -> Request {
        Request::new(Verb::Post, self.resources.subscriptions())
            .with_body(self.subscription_body())
            .with_remediation(Remediation::Recover(Recovery::Resubscribe { attempts, startup }))
            .labeled("subscribe")
    }

    /// Subscription without recovery, used by lease checks.
    pub fn subscribe_once(&self) -> Request {
        Request::new(Verb::Post, self.resources.subscriptions())
            .with_body(self.subscription_body())
            .labeled("subscribe")
    }

    pub fn renew_subscription(&self) -> Request {
        Request::new(Verb::Put, self.resources.subscription())
            .with_body(self.subscription_body())
            .labeled("renew subscription")
    }

    pub fn delete_subscription(&self, attempts: RetryBudget, startup: bool) -> Request {
        Request::new(Verb::Delete, self.resources.subscription())
            .with_remediation(Remediation::Recover(Recovery::Resubscribe { attempts, startup }))
            .labeled("delete subscription")
    }

    // -------------------------------------------------------------------------
    // Backup managers
    // -------------------------------------------------------------------------

    /// Appends a manager, or creates the list when the mediator has none.
    pub fn add_backup_manager(&self, manager_id: &str, remote_has_managers: bool) -> SyncResult<Request> {
        let (_, manager) = self.locate_manager(manager_id)?;
        let value = to_value(&manager)?;
        let patch = if remote_has_managers {
            ConfigurationPatch::new(PatchOperation::Add, self.resources.manager_append_path(), value)
        } else {
            ConfigurationPatch::new(
                PatchOperation::Add,
                self.resources.managers_path(),
                Value::Array(vec![value]),
            )
        };
        Ok(self.domain_patch(patch, format!("add manager {manager_id}")))
    }

    pub fn update_backup_manager(&self, manager_id: &str) -> SyncResult<Request> {
        let (index, manager) = self.locate_manager(manager_id)?;
        let fields = pick_fields(to_value(&manager)?, &["backup-domain", "backup-type"]);
        let patch = ConfigurationPatch::fields(
            PatchOperation::Replace,
            self.resources.manager_path(index),
            fields,
        );
        Ok(self.update_patch(patch, format!("update manager {manager_id}")))
    }

    // -------------------------------------------------------------------------
    // Backups
    // -------------------------------------------------------------------------

    /// Appends a backup. The first backup of a manager creates the list.
    pub fn add_backup(&self, manager_id: &str, backup_id: &str) -> SyncResult<Request> {
        let (manager_index, backup_index) = self.model.backup_location(manager_id, backup_id)?;
        let (_, manager) = self.locate_manager(manager_id)?;
        let value = to_value(&manager.backups[backup_index])?;

        let first = manager.backups.len() == 1;
        let patch = if first {
            ConfigurationPatch::new(
                PatchOperation::Add,
                self.resources.backups_path(manager_index),
                Value::Array(vec![value]),
            )
        } else {
            ConfigurationPatch::new(
                PatchOperation::Add,
                self.resources.backup_append_path(manager_index),
                value,
            )
        };
        Ok(self.domain_patch(patch, format!("add backup {backup_id}")))
    }

    pub fn update_backup(&self, manager_id: &str, backup_id: &str) -> SyncResult<Request> {
        let (manager_index, backup_index) = self.model.backup_location(manager_id, backup_id)?;
        let (_, manager) = self.locate_manager(manager_id)?;
        let fields = pick_fields(
            to_value(&manager.backups[backup_index])?,
            &["backup-name", "creation-time", "status", "creation-type"],
        );
        let patch = ConfigurationPatch::fields(
            PatchOperation::Replace,
            self.resources.backup_path(manager_index, backup_index),
            fields,
        );
        Ok(self.update_patch(patch, format!("update backup {backup_id}")))
    }

    /// Removes the backup at `backup_index`. The backup may already be gone
    /// from the model, so the position is given explicitly.
    pub fn delete_backup(&self, manager_id: &str, backup_index: usize) -> SyncResult<Request> {
        let (manager_index, _) = self.locate_manager(manager_id)?;
        let patch = ConfigurationPatch::remove(self.resources.backup_path(manager_index, backup_index));
        Ok(self.domain_patch(patch, format!("delete backup {manager_id}/{backup_index}")))
    }

    // -------------------------------------------------------------------------
    // Housekeeping and scheduler
    // -------------------------------------------------------------------------

    pub fn add_housekeeping(&self, manager_id: &str) -> SyncResult<Request> {
        let (index, manager) = self.locate_manager(manager_id)?;
        let patch = ConfigurationPatch::new(
            PatchOperation::Add,
            self.resources.housekeeping_path(index),
            to_value(&manager.housekeeping)?,
        );
        Ok(self.domain_patch(patch, format!("add housekeeping {manager_id}")))
    }

    pub fn update_housekeeping(&self, manager_id: &str) -> SyncResult<Request> {
        let (index, manager) = self.locate_manager(manager_id)?;
        let fields = pick_fields(
            to_value(&manager.housekeeping)?,
            &["max-stored-manual-backups", "auto-delete"],
        );
        let patch = ConfigurationPatch::fields(
            PatchOperation::Replace,
            self.resources.housekeeping_path(index),
            fields,
        );
        Ok(self.update_patch(patch, format!("update housekeeping {manager_id}")))
    }

    pub fn add_scheduler(&self, manager_id: &str) -> SyncResult<Request> {
        let (index, manager) = self.locate_manager(manager_id)?;
        let patch = ConfigurationPatch::new(
            PatchOperation::Add,
            self.resources.scheduler_path(index),
            to_value(&manager.scheduler)?,
        );
        Ok(self.domain_patch(patch, format!("add scheduler {manager_id}")))
    }

    pub fn update_scheduler(&self, manager_id: &str) -> SyncResult<Request> {
        let (index, manager) = self.locate_manager(manager_id)?;
        let fields = pick_fields(
            to_value(&manager.scheduler)?,
            &[
                "admin-state",
                "scheduled-backup-name",
                "most-recently-created-auto-backup",
                "next-scheduled-time",
            ],
        );
        let patch = ConfigurationPatch::fields(
            PatchOperation::Replace,
            self.resources.scheduler_path(index),
            fields,
        );
        Ok(self.update_patch(patch, format!("update scheduler {manager_id}")))
    }

    // -------------------------------------------------------------------------
    // Periodic events
    // -------------------------------------------------------------------------

    pub fn add_periodic_event(&self, manager_id: &str, event_id: &str) -> SyncResult<Request> {
        let (index, manager) = self.locate_manager(manager_id)?;
        let event = self.locate_event(&manager, event_id)?;
        let patch = ConfigurationPatch::new(
            PatchOperation::Add,
            self.resources.periodic_event_append_path(index),
            to_value(&manager.scheduler.periodic_events[event])?,
        );
        Ok(self.domain_patch(patch, format!("add periodic event {event_id}")))
    }

    pub fn update_periodic_event(&self, manager_id: &str, event_id: &str) -> SyncResult<Request> {
        let (index, manager) = self.locate_manager(manager_id)?;
        let event = self.locate_event(&manager, event_id)?;
        let patch = ConfigurationPatch::new(
            PatchOperation::Replace,
            self.resources.periodic_event_path(index, event),
            to_value(&manager.scheduler.periodic_events[event])?,
        );
        Ok(self.update_patch(patch, format!("update periodic event {event_id}")))
    }

    pub fn delete_periodic_event(&self, manager_id: &str, event_index: usize) -> SyncResult<Request> {
        let (index, _) = self.locate_manager(manager_id)?;
        let patch = ConfigurationPatch::remove(self.resources.periodic_event_path(index, event_index));
        Ok(self.domain_patch(patch, format!("delete periodic event {manager_id}/{event_index}")))
    }

    // -------------------------------------------------------------------------
    // Progress reports
    // -------------------------------------------------------------------------

    /// Local paths of the progress-report lists an action reports under.
    ///
    /// Restore and export report under the backup named `backup_name`,
    /// everything else under the manager. Scheduled actions also report
    /// under the scheduler.
    pub fn progress_paths(
        &self,
        manager_id: &str,
        report: &ProgressReport,
        backup_name: Option<&str>,
        scheduled: bool,
    ) -> SyncResult<Vec<String>> {
        let (index, manager) = self.locate_manager(manager_id)?;
        let under_backup = report.action_name.reports_under_backup();

        let mut paths = Vec::with_capacity(2);
        if under_backup {
            let name = backup_name.unwrap_or_default();
            let backup = manager
                .backup_index_by_name(name)
                .ok_or_else(|| CoreError::UnknownBackup {
                    manager: manager_id.to_string(),
                    backup: name.to_string(),
                })?;
            paths.push(self.resources.backup_progress_path(index, backup));
        } else {
            paths.push(self.resources.manager_progress_path(index));
        }
        if scheduled && !under_backup {
            paths.push(format!("{}/progress-report", self.resources.scheduler_path(index)));
        }
        Ok(paths)
    }

    /// Progress patches for one report.
    ///
    /// With `create_list` the first list is created with the report as its
    /// only element, otherwise position 0 is replaced field by field.
    pub fn progress_reports(
        &self,
        manager_id: &str,
        report: &ProgressReport,
        backup_name: Option<&str>,
        scheduled: bool,
        create_list: bool,
    ) -> SyncResult<Vec<Request>> {
        let value = to_value(report)?;
        let retry = if report.is_complete() {
            RetryBudget::Indefinite
        } else {
            RetryBudget::Remaining(self.max_attempts)
        };

        let paths = self.progress_paths(manager_id, report, backup_name, scheduled)?;
        let requests = paths
            .into_iter()
            .enumerate()
            .map(|(i, path)| {
                let patch = if i == 0 && create_list {
                    ConfigurationPatch::new(PatchOperation::Add, path, Value::Array(vec![value.clone()]))
                } else {
                    ConfigurationPatch::fields(
                        PatchOperation::Replace,
                        format!("{path}/0"),
                        pick_fields(value.clone(), &[]),
                    )
                };
                self.update_patch(
                    patch,
                    format!("progress {} {}%", report.action_id, report.progress_percentage),
                )
                .with_retry(retry)
            })
            .collect();
        Ok(requests)
    }

    // -------------------------------------------------------------------------
    // Helpers
    // -------------------------------------------------------------------------

    fn domain_patch(&self, patch: ConfigurationPatch, label: String) -> Request {
        Request::new(Verb::Patch, self.resources.configuration())
            .with_patch(patch)
            .labeled(label)
    }

    fn update_patch(&self, patch: ConfigurationPatch, label: String) -> Request {
        self.domain_patch(patch, label)
            .with_remediation(Remediation::SwapPatchOperation)
    }

    fn locate_manager(&self, manager_id: &str) -> SyncResult<(usize, BackupManager)> {
        self.model
            .managers()
            .into_iter()
            .enumerate()
            .find(|(_, m)| m.id == manager_id)
            .ok_or_else(|| CoreError::UnknownBackupManager(manager_id.to_string()).into())
    }

    fn locate_event(&self, manager: &BackupManager, event_id: &str) -> SyncResult<usize> {
        manager.periodic_event_index(event_id).ok_or_else(|| {
            SyncError::Core(CoreError::UnknownPeriodicEvent {
                manager: manager.id.clone(),
                event: event_id.to_string(),
            })
        })
    }
}

fn to_value<T: Serialize>(value: &T) -> SyncResult<Value> {
    serde_json::to_value(value).map_err(|e| SyncError::SerializationFailed(e.to_string()))
}

/// The named members of an object, in the given order. An empty `keys`
/// takes every member.
fn pick_fields(value: Value, keys: &[&str]) -> Vec<(String, Value)> {
    let Value::Object(mut object) = value else {
        return Vec::new();
    };
    if keys.is_empty() {
        return object.into_iter().collect();
    }
    keys.iter()
        .filter_map(|key| object.remove(*key).map(|v| (key.to_string(), v)))
        .collect()
}
