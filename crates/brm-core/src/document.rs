//! # Remote Documents
//!
//! Read-side view of what the mediator stores: the primary configuration
//! document, schema documents and subscription documents.
//!
//! ## Configuration Document Shape
//! ```text
//! {
//!   "name": "backup-restore",
//!   "title": "...",
//!   "data": {
//!     "backup-restore:brm": {
//!       "backup-manager": [
//!         { "id": "DEFAULT", "backup": [ { "id": "b1", ... } ], ... },
//!         ...
//!       ]
//!     }
//!   }
//! }
//! ```
//!
//! Only identities and positions are extracted. Paths are probed against the
//! raw `data` value with JSON pointers.

use serde_json::{json, Value};

use crate::error::{CoreError, CoreResult};
use crate::model::BackupManager;

const DATA_KEY_SUFFIX: &str = ":brm";

// =============================================================================
// Configuration Document
// =============================================================================

/// A backup manager as positioned in the remote document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteManager {
    pub id: String,
    pub backup_ids: Vec<String>,
}

/// Parsed snapshot of the primary configuration document.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigurationDocument {
    data: Value,
    managers: Vec<RemoteManager>,
}

impl ConfigurationDocument {
    /// Parses a raw document as returned by `GET configurations/<S>`.
    pub fn parse(raw: &str) -> CoreResult<Self> {
        let value: Value =
            serde_json::from_str(raw).map_err(|e| CoreError::MalformedDocument(e.to_string()))?;
        Self::from_value(value)
    }

    /// Accepts either the full configuration or its `data` member.
    pub fn from_value(value: Value) -> CoreResult<Self> {
        let data = match value.get("data") {
            Some(data) => data.clone(),
            None => value,
        };
        let object = data
            .as_object()
            .ok_or_else(|| CoreError::MalformedDocument("data is not an object".into()))?;

        let brm = object
            .iter()
            .find(|(key, _)| key.ends_with(DATA_KEY_SUFFIX))
            .map(|(_, v)| v);

        let managers = match brm.and_then(|b| b.get("backup-manager")) {
            Some(Value::Array(list)) => list.iter().map(remote_manager).collect::<CoreResult<_>>()?,
            Some(_) => {
                return Err(CoreError::MalformedDocument(
                    "backup-manager is not a list".into(),
                ))
            }
            None => Vec::new(),
        };

        Ok(ConfigurationDocument { data, managers })
    }

    pub fn managers(&self) -> &[RemoteManager] {
        &self.managers
    }

    pub fn has_managers(&self) -> bool {
        !self.managers.is_empty()
    }

    pub fn manager_position(&self, manager_id: &str) -> Option<usize> {
        self.managers.iter().position(|m| m.id == manager_id)
    }

    pub fn backup_position(&self, manager_position: usize, backup_id: &str) -> Option<usize> {
        self.managers
            .get(manager_position)?
            .backup_ids
            .iter()
            .position(|b| b == backup_id)
    }

    /// True when a document path resolves to a value.
    ///
    /// Append paths (`.../-`) never resolve. A trailing `/` is ignored.
    pub fn contains_path(&self, path: &str) -> bool {
        let pointer = path.trim_end_matches('/');
        if pointer.is_empty() {
            return true;
        }
        self.data.pointer(pointer).is_some()
    }
}

fn remote_manager(value: &Value) -> CoreResult<RemoteManager> {
    let id = value
        .get("id")
        .and_then(Value::as_str)
        .ok_or_else(|| CoreError::MalformedDocument("backup manager without id".into()))?;
    let backup_ids = value
        .get("backup")
        .and_then(Value::as_array)
        .map(|list| {
            list.iter()
                .filter_map(|b| b.get("id").and_then(Value::as_str).map(str::to_string))
                .collect()
        })
        .unwrap_or_default();
    Ok(RemoteManager {
        id: id.to_string(),
        backup_ids,
    })
}

// =============================================================================
// Builders
// =============================================================================

/// Full configuration body for `POST configurations` / `PUT configurations/<S>`.
pub fn configuration_body(
    name: &str,
    title: &str,
    data_key: &str,
    managers: &[BackupManager],
) -> CoreResult<Value> {
    let managers =
        serde_json::to_value(managers).map_err(|e| CoreError::MalformedDocument(e.to_string()))?;
    Ok(json!({
        "name": name,
        "title": title,
        "data": { data_key: { "backup-manager": managers } }
    }))
}

/// Configuration body without any data.
pub fn empty_configuration_body(name: &str, title: &str) -> Value {
    json!({ "name": name, "title": title, "data": {} })
}

// =============================================================================
// Schema and Subscription Fields
// =============================================================================

fn version_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Version of a local schema document (`version`).
pub fn local_schema_version(schema: &Value) -> Option<String> {
    schema.get("version").and_then(version_string)
}

/// Version of a schema as stored by the mediator (`jsonSchema.version`).
pub fn remote_schema_version(schema: &Value) -> Option<String> {
    schema
        .get("jsonSchema")
        .and_then(|s| s.get("version"))
        .and_then(version_string)
}

/// Remaining lease of a subscription document.
pub fn lease_seconds(subscription: &Value) -> Option<i64> {
    subscription.get("leaseSeconds").and_then(Value::as_i64)
}

/// Removes every whitespace character.
pub fn strip_whitespace(raw: &str) -> String {
    raw.chars().filter(|c| !c.is_whitespace()).collect()
}
