//! # Patch Types
//!
//! The unit of mutation the mediator accepts on a configuration document.
//!
//! ## Wire Shape
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      PATCH configurations/<schema>                      │
//! │                                                                         │
//! │  {                                                                      │
//! │    "baseETag": "8f1c...",            ◄── version token (optional)       │
//! │    "patch": [                                                           │
//! │      { "op": "replace",                                                 │
//! │        "path": "/S:brm/backup-manager/0/backup-domain",                 │
//! │        "value": "sys" },                                                │
//! │      { "op": "replace",                                                 │
//! │        "path": "/S:brm/backup-manager/0/backup-type",                   │
//! │        "value": "full" }                                                │
//! │    ]                                                                    │
//! │  }                                                                      │
//! │                                                                         │
//! │  A ConfigurationPatch has ONE base path. Field patches expand into one  │
//! │  item per field below that base path, so rewriting the base path        │
//! │  (index translation) moves every item at once.                          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

// =============================================================================
// Patch Operation
// =============================================================================

/// JSON patch operation kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PatchOperation {
    Add,
    Replace,
    Remove,
}

impl PatchOperation {
    /// ADD becomes REPLACE and REPLACE becomes ADD. REMOVE is unchanged.
    ///
    /// Used when a patch conflicted because the target was created (or
    /// removed) between building the patch and sending it.
    pub fn swapped(self) -> Self {
        match self {
            PatchOperation::Add => PatchOperation::Replace,
            PatchOperation::Replace => PatchOperation::Add,
            PatchOperation::Remove => PatchOperation::Remove,
        }
    }
}

impl std::fmt::Display for PatchOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PatchOperation::Add => write!(f, "add"),
            PatchOperation::Replace => write!(f, "replace"),
            PatchOperation::Remove => write!(f, "remove"),
        }
    }
}

// =============================================================================
// Patch Item
// =============================================================================

/// One element of the `patch` array.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatchItem {
    pub op: PatchOperation,
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
}

// =============================================================================
// Configuration Patch
// =============================================================================

/// Payload carried by a patch.
#[derive(Debug, Clone, PartialEq)]
pub enum PatchValue {
    /// No value (REMOVE).
    Empty,
    /// The value placed at the base path itself.
    Whole(Value),
    /// Field name / value pairs placed below the base path.
    Fields(Vec<(String, Value)>),
}

/// A single logical mutation of the configuration document.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigurationPatch {
    operation: PatchOperation,
    path: String,
    value: PatchValue,
    base_etag: Option<String>,
}

impl ConfigurationPatch {
    /// A patch placing `value` at `path`.
    pub fn new(operation: PatchOperation, path: impl Into<String>, value: Value) -> Self {
        ConfigurationPatch {
            operation,
            path: path.into(),
            value: PatchValue::Whole(value),
            base_etag: None,
        }
    }

    /// A patch setting several fields below `path`.
    pub fn fields(
        operation: PatchOperation,
        path: impl Into<String>,
        fields: Vec<(String, Value)>,
    ) -> Self {
        ConfigurationPatch {
            operation,
            path: path.into(),
            value: PatchValue::Fields(fields),
            base_etag: None,
        }
    }

    /// A REMOVE patch.
    pub fn remove(path: impl Into<String>) -> Self {
        ConfigurationPatch {
            operation: PatchOperation::Remove,
            path: path.into(),
            value: PatchValue::Empty,
            base_etag: None,
        }
    }

    pub fn operation(&self) -> PatchOperation {
        self.operation
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn value(&self) -> &PatchValue {
        &self.value
    }

    pub fn base_etag(&self) -> Option<&str> {
        self.base_etag.as_deref()
    }

    pub fn set_operation(&mut self, operation: PatchOperation) {
        self.operation = operation;
    }

    pub fn set_path(&mut self, path: impl Into<String>) {
        self.path = path.into();
    }

    pub fn set_base_etag(&mut self, etag: impl Into<String>) {
        self.base_etag = Some(etag.into());
    }

    /// True when the patch appends to a list (`.../-`).
    pub fn is_append(&self) -> bool {
        self.path.ends_with("/-")
    }

    /// Expands the patch into wire items.
    pub fn items(&self) -> Vec<PatchItem> {
        match &self.value {
            PatchValue::Empty => vec![PatchItem {
                op: self.operation,
                path: self.path.clone(),
                value: None,
            }],
            PatchValue::Whole(value) => vec![PatchItem {
                op: self.operation,
                path: self.path.clone(),
                value: Some(value.clone()),
            }],
            PatchValue::Fields(fields) => fields
                .iter()
                .map(|(name, value)| PatchItem {
                    op: self.operation,
                    path: format!("{}/{}", self.path.trim_end_matches('/'), name),
                    value: Some(value.clone()),
                })
                .collect(),
        }
    }

    /// Builds the request body in mediator format.
    pub fn to_body(&self) -> Value {
        let mut body = json!({ "patch": self.items() });
        if let Some(etag) = &self.base_etag {
            body["baseETag"] = Value::String(etag.clone());
        }
        body
    }
}

impl std::fmt::Display for ConfigurationPatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.operation, self.path)
    }
}
