//! # Domain Model
//!
//! The backup/restore entities pushed to the mediator, and the read-only view
//! the sync client uses to look them up.
//!
//! ## Entity Tree
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  BackupManager (id: "DEFAULT", "configuration-data", ...)              │
//! │  ├── backup-domain / backup-type                                       │
//! │  ├── backup[]          ◄── Backup (id, backup-name, status, ...)       │
//! │  ├── housekeeping      ◄── max-stored-manual-backups, auto-delete      │
//! │  └── scheduler         ◄── admin-state, periodic-event[]               │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Identity vs Position
//! Entities are identified by their `id`. Their position in a list is only
//! meaningful for one document: the local ordering and the mediator's
//! ordering can differ, which is what [`crate::index::IndexTranslator`]
//! reconciles.

use std::sync::RwLock;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};

// =============================================================================
// Backup Manager
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct BackupManager {
    pub id: String,
    #[serde(default)]
    pub backup_domain: String,
    #[serde(default)]
    pub backup_type: String,
    #[serde(default, rename = "backup")]
    pub backups: Vec<Backup>,
    #[serde(default)]
    pub housekeeping: Housekeeping,
    #[serde(default)]
    pub scheduler: Scheduler,
}

impl BackupManager {
    pub fn new(id: impl Into<String>) -> Self {
        BackupManager {
            id: id.into(),
            backup_domain: String::new(),
            backup_type: String::new(),
            backups: Vec::new(),
            housekeeping: Housekeeping::default(),
            scheduler: Scheduler::default(),
        }
    }

    pub fn backup_index(&self, backup_id: &str) -> Option<usize> {
        self.backups.iter().position(|b| b.id == backup_id)
    }

    /// Position of a backup looked up by its name (restore/export targets).
    pub fn backup_index_by_name(&self, backup_name: &str) -> Option<usize> {
        self.backups.iter().position(|b| b.backup_name == backup_name)
    }

    pub fn periodic_event_index(&self, event_id: &str) -> Option<usize> {
        self.scheduler
            .periodic_events
            .iter()
            .position(|e| e.id == event_id)
    }
}

// =============================================================================
// Backup
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BackupStatus {
    BackupComplete,
    BackupIncomplete,
    BackupCorrupted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CreationType {
    Manual,
    Scheduled,
    SystemCreated,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Backup {
    pub id: String,
    pub backup_name: String,
    pub creation_time: DateTime<Utc>,
    pub status: BackupStatus,
    pub creation_type: CreationType,
}

// =============================================================================
// Housekeeping
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AutoDelete {
    Enabled,
    Disabled,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Housekeeping {
    pub max_stored_manual_backups: u32,
    pub auto_delete: AutoDelete,
}

impl Default for Housekeeping {
    fn default() -> Self {
        Housekeeping {
            max_stored_manual_backups: 1,
            auto_delete: AutoDelete::Enabled,
        }
    }
}

// =============================================================================
// Scheduler
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AdminState {
    Locked,
    Unlocked,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Scheduler {
    pub admin_state: AdminState,
    pub scheduled_backup_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub most_recently_created_auto_backup: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_scheduled_time: Option<DateTime<Utc>>,
    #[serde(default, rename = "periodic-event")]
    pub periodic_events: Vec<PeriodicEvent>,
}

impl Default for Scheduler {
    fn default() -> Self {
        Scheduler {
            admin_state: AdminState::Unlocked,
            scheduled_backup_name: "SCHEDULED_BACKUP".to_string(),
            most_recently_created_auto_backup: None,
            next_scheduled_time: None,
            periodic_events: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct PeriodicEvent {
    pub id: String,
    #[serde(default)]
    pub hours: u32,
    #[serde(default)]
    pub minutes: u32,
    #[serde(default)]
    pub days: u32,
    #[serde(default)]
    pub weeks: u32,
    pub start_time: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_time: Option<DateTime<Utc>>,
}

// =============================================================================
// Progress Report
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActionName {
    CreateBackup,
    DeleteBackup,
    Restore,
    Import,
    Export,
    HousekeepingDeleteBackup,
}

impl ActionName {
    /// Restore and export report under the backup they act on.
    pub fn reports_under_backup(&self) -> bool {
        matches!(self, ActionName::Restore | ActionName::Export)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ActionState {
    Running,
    Finished,
    Cancelling,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ActionResult {
    NotAvailable,
    Success,
    Failure,
}

/// Progress of one action, as shown in the configuration document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ProgressReport {
    pub action_id: String,
    pub action_name: ActionName,
    pub progress_percentage: u8,
    pub result: ActionResult,
    pub state: ActionState,
    #[serde(default)]
    pub result_info: String,
    #[serde(default)]
    pub additional_info: Vec<String>,
    pub time_action_started: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_action_completed: Option<DateTime<Utc>>,
    pub time_of_last_status_update: DateTime<Utc>,
}

impl ProgressReport {
    pub fn is_complete(&self) -> bool {
        self.progress_percentage >= 100
    }
}

// =============================================================================
// Model View
// =============================================================================

/// Read-only access to the local domain model.
///
/// Only [`ModelView::managers`] is required. The ordering it returns IS the
/// local ordering used for every position in a request path.
pub trait ModelView: Send + Sync {
    fn managers(&self) -> Vec<BackupManager>;

    fn manager_ids(&self) -> Vec<String> {
        self.managers().into_iter().map(|m| m.id).collect()
    }

    fn manager(&self, manager_id: &str) -> Option<BackupManager> {
        self.managers().into_iter().find(|m| m.id == manager_id)
    }

    fn manager_index(&self, manager_id: &str) -> Option<usize> {
        self.managers().iter().position(|m| m.id == manager_id)
    }

    /// Backup ids of the manager at local position `manager_index`.
    fn backup_ids(&self, manager_index: usize) -> Vec<String> {
        self.managers()
            .get(manager_index)
            .map(|m| m.backups.iter().map(|b| b.id.clone()).collect())
            .unwrap_or_default()
    }

    /// Local positions of a manager and one of its backups.
    fn backup_location(&self, manager_id: &str, backup_id: &str) -> CoreResult<(usize, usize)> {
        let managers = self.managers();
        let manager_index = managers
            .iter()
            .position(|m| m.id == manager_id)
            .ok_or_else(|| CoreError::UnknownBackupManager(manager_id.to_string()))?;
        let backup_index = managers[manager_index]
            .backup_index(backup_id)
            .ok_or_else(|| CoreError::UnknownBackup {
                manager: manager_id.to_string(),
                backup: backup_id.to_string(),
            })?;
        Ok((manager_index, backup_index))
    }
}

/// In-memory model, loaded from a JSON snapshot.
#[derive(Debug, Default)]
pub struct StaticModel {
    managers: RwLock<Vec<BackupManager>>,
}

impl StaticModel {
    pub fn new(managers: Vec<BackupManager>) -> Self {
        StaticModel {
            managers: RwLock::new(managers),
        }
    }

    /// Parses a JSON array of backup managers.
    pub fn from_json(json: &str) -> CoreResult<Self> {
        let managers: Vec<BackupManager> =
            serde_json::from_str(json).map_err(|e| CoreError::MalformedDocument(e.to_string()))?;
        Ok(StaticModel::new(managers))
    }

    pub fn set_managers(&self, managers: Vec<BackupManager>) {
        let mut guard = self.managers.write().unwrap_or_else(|e| e.into_inner());
        *guard = managers;
    }

    /// Applies `f` to the manager with `manager_id`.
    pub fn update_manager<F>(&self, manager_id: &str, f: F) -> CoreResult<()>
    where
        F: FnOnce(&mut BackupManager),
    {
        let mut guard = self.managers.write().unwrap_or_else(|e| e.into_inner());
        let manager = guard
            .iter_mut()
            .find(|m| m.id == manager_id)
            .ok_or_else(|| CoreError::UnknownBackupManager(manager_id.to_string()))?;
        f(manager);
        Ok(())
    }
}

impl ModelView for StaticModel {
    fn managers(&self) -> Vec<BackupManager> {
        self.managers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}
