//! # Resources and Configuration Paths
//!
//! Names of the mediator resources and builders for paths inside the
//! configuration document.
//!
//! ## Resource Tree
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  configurations                    ◄── reachability probe              │
//! │  configurations/<S>                ◄── primary document (version ctl)  │
//! │  configurations/ietf-netconf-acm   ◄── access roles (version ctl)      │
//! │  schemas                                                               │
//! │  schemas/<S>                                                           │
//! │  subscriptions                                                         │
//! │  subscriptions/<S>                                                     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Document Paths
//! ```text
//!   /S:brm/backup-manager/<bm>/backup/<b>/progress-report/0
//!   0 1     2              3    4      5  ...
//!
//!   segment 3 ── backup-manager position
//!   segment 5 ── backup position (only when segment 4 is "backup")
//!   "-"       ── append to the list
//! ```

/// Default schema (and configuration) name.
pub const DEFAULT_SCHEMA_NAME: &str = "backup-restore";

/// Name of the access-role configuration.
pub const ACCESS_CONTROL_NAME: &str = "ietf-netconf-acm";

const MANAGER_SEGMENT: usize = 3;
const BACKUP_LIST_SEGMENT: usize = 4;
const BACKUP_SEGMENT: usize = 5;

// =============================================================================
// Resources
// =============================================================================

/// Mediator resource names and document paths for one schema name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resources {
    schema_name: String,
}

impl Default for Resources {
    fn default() -> Self {
        Resources::new(DEFAULT_SCHEMA_NAME)
    }
}

impl Resources {
    pub fn new(schema_name: impl Into<String>) -> Self {
        Resources {
            schema_name: schema_name.into(),
        }
    }

    pub fn schema_name(&self) -> &str {
        &self.schema_name
    }

    // -------------------------------------------------------------------------
    // Mediator resources
    // -------------------------------------------------------------------------

    pub fn configurations(&self) -> String {
        "configurations".to_string()
    }

    /// The primary configuration document.
    pub fn configuration(&self) -> String {
        format!("configurations/{}", self.schema_name)
    }

    /// The access-role configuration document.
    pub fn access_control(&self) -> String {
        format!("configurations/{}", ACCESS_CONTROL_NAME)
    }

    pub fn schemas(&self) -> String {
        "schemas".to_string()
    }

    pub fn schema(&self) -> String {
        format!("schemas/{}", self.schema_name)
    }

    pub fn subscriptions(&self) -> String {
        "subscriptions".to_string()
    }

    pub fn subscription(&self) -> String {
        format!("subscriptions/{}", self.schema_name)
    }

    /// True for the documents that require a version token on writes.
    pub fn is_version_controlled(&self, resource: &str) -> bool {
        resource == self.configuration() || resource == self.access_control()
    }

    // -------------------------------------------------------------------------
    // Document paths
    // -------------------------------------------------------------------------

    /// Key of the top level container in the data document, `S:brm`.
    pub fn data_key(&self) -> String {
        format!("{}:brm", self.schema_name)
    }

    pub fn managers_path(&self) -> String {
        format!("/{}/backup-manager", self.data_key())
    }

    pub fn manager_append_path(&self) -> String {
        format!("{}/-", self.managers_path())
    }

    pub fn manager_path(&self, manager: usize) -> String {
        format!("{}/{}", self.managers_path(), manager)
    }

    pub fn backups_path(&self, manager: usize) -> String {
        format!("{}/backup", self.manager_path(manager))
    }

    pub fn backup_append_path(&self, manager: usize) -> String {
        format!("{}/-", self.backups_path(manager))
    }

    pub fn backup_path(&self, manager: usize, backup: usize) -> String {
        format!("{}/{}", self.backups_path(manager), backup)
    }

    pub fn housekeeping_path(&self, manager: usize) -> String {
        format!("{}/housekeeping", self.manager_path(manager))
    }

    pub fn scheduler_path(&self, manager: usize) -> String {
        format!("{}/scheduler", self.manager_path(manager))
    }

    pub fn periodic_events_path(&self, manager: usize) -> String {
        format!("{}/periodic-event", self.scheduler_path(manager))
    }

    pub fn periodic_event_append_path(&self, manager: usize) -> String {
        format!("{}/-", self.periodic_events_path(manager))
    }

    pub fn periodic_event_path(&self, manager: usize, event: usize) -> String {
        format!("{}/{}", self.periodic_events_path(manager), event)
    }

    /// Progress-report list of a manager.
    pub fn manager_progress_path(&self, manager: usize) -> String {
        format!("{}/progress-report", self.manager_path(manager))
    }

    /// Progress-report list of a backup (restore and export actions).
    pub fn backup_progress_path(&self, manager: usize, backup: usize) -> String {
        format!("{}/progress-report", self.backup_path(manager, backup))
    }

    /// Path of one access-control rule list.
    pub fn rule_list_path(&self, position: usize) -> String {
        format!("/{}:nacm/rule-list/{}", ACCESS_CONTROL_NAME, position)
    }
}

// =============================================================================
// Position Parsing
// =============================================================================

fn segment_position(path: &str, segment: usize) -> Option<usize> {
    path.split('/').nth(segment).and_then(|s| s.parse().ok())
}

/// Backup-manager position in a document path, if the path has one.
pub fn manager_position(path: &str) -> Option<usize> {
    segment_position(path, MANAGER_SEGMENT)
}

/// Backup position in a document path, if the path addresses a backup.
pub fn backup_position(path: &str) -> Option<usize> {
    let mut segments = path.split('/');
    match segments.nth(BACKUP_LIST_SEGMENT) {
        Some("backup") => segment_position(path, BACKUP_SEGMENT),
        _ => None,
    }
}

/// Replaces the manager and/or backup position in `path`.
///
/// `None` leaves the segment untouched, and so does a path too short to have
/// it. A trailing `/` is kept.
pub fn rewrite_positions(path: &str, manager: Option<usize>, backup: Option<usize>) -> String {
    let addresses_backup = backup_position(path).is_some();
    let mut segments: Vec<String> = path.split('/').map(str::to_string).collect();

    if let Some(manager) = manager {
        if segments.len() > MANAGER_SEGMENT && manager_position(path).is_some() {
            segments[MANAGER_SEGMENT] = manager.to_string();
        }
    }
    if let Some(backup) = backup {
        if addresses_backup {
            segments[BACKUP_SEGMENT] = backup.to_string();
        }
    }
    segments.join("/")
}
