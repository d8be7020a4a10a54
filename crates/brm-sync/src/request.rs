//! # Requests
//!
//! The unit of queued work and its remediation strategies.
//!
//! ## Lifecycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  PENDING ──► (FETCHING_TOKEN) ──► SENDING ──┬──► SUCCEEDED              │
//! │     ▲                                       ├──► RETRYING ──► SENDING   │
//! │     │                                       ├──► DROPPED                │
//! │     └──────── CONFLICT_REQUEUED (front) ◄───┤                           │
//! │                                             └──► REMEDIATED             │
//! │                                                   │                     │
//! │                              Remediation::decide ◄┘                     │
//! │                              ├── Drop                                   │
//! │                              ├── Resubmit(new request)                  │
//! │                              ├── RefreshAndResubmit(new request)        │
//! │                              └── Recover(recovery action)               │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Remediations are a closed set of tags, not callbacks: a request carries
//! no captured state and its fate on failure can be read off its value.

use brm_core::{ConfigurationPatch, PatchOperation, Resources};
use chrono::{DateTime, Utc};
use serde_json::Value;
use uuid::Uuid;

use crate::error::SyncError;

// =============================================================================
// Verb
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Verb {
    Post,
    Put,
    Patch,
    Delete,
}

impl std::fmt::Display for Verb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Verb::Post => write!(f, "POST"),
            Verb::Put => write!(f, "PUT"),
            Verb::Patch => write!(f, "PATCH"),
            Verb::Delete => write!(f, "DELETE"),
        }
    }
}

// =============================================================================
// Retry Budget
// =============================================================================

/// How many more sends a request may make after a failed one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryBudget {
    Indefinite,
    Remaining(u32),
}

impl RetryBudget {
    /// Takes one retry. Returns false when none is left.
    pub fn try_consume(&mut self) -> bool {
        match self {
            RetryBudget::Indefinite => true,
            RetryBudget::Remaining(0) => false,
            RetryBudget::Remaining(n) => {
                *n -= 1;
                true
            }
        }
    }

    pub fn is_indefinite(&self) -> bool {
        matches!(self, RetryBudget::Indefinite)
    }

    pub fn is_exhausted(&self) -> bool {
        matches!(self, RetryBudget::Remaining(0))
    }

    /// The budget after one more attempt was spent.
    pub fn decremented(self) -> Self {
        match self {
            RetryBudget::Indefinite => RetryBudget::Indefinite,
            RetryBudget::Remaining(n) => RetryBudget::Remaining(n.saturating_sub(1)),
        }
    }
}

impl std::fmt::Display for RetryBudget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RetryBudget::Indefinite => write!(f, "indefinite"),
            RetryBudget::Remaining(n) => write!(f, "{n}"),
        }
    }
}

// =============================================================================
// Remediation
// =============================================================================

/// Recovery actions run off the queue consumer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Recovery {
    /// Delete, create empty, upload schema, then PUT the full model.
    RecreateConfiguration,
    RecreateEmptyConfiguration,
    UploadSchema,
    DeleteSchema,
    /// Delete and recreate the subscription with `attempts` tries left.
    Resubscribe { attempts: RetryBudget, startup: bool },
}

/// What happens to a request once it failed for good.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Remediation {
    /// Log and forget.
    DropSilently,
    /// On conflict, resubmit once with ADD and REPLACE swapped.
    SwapPatchOperation,
    /// Reload credentials, then resubmit once.
    RegenerateCredentialAndResubmit,
    Recover(Recovery),
}

/// Result of applying a remediation to a failed request.
#[derive(Debug, Clone, PartialEq)]
pub enum RemedyOutcome {
    Drop,
    Resubmit(Request),
    RefreshAndResubmit(Request),
    Recover(Recovery),
}

impl Remediation {
    pub fn decide(&self, request: &Request, error: &SyncError) -> RemedyOutcome {
        match self {
            Remediation::DropSilently => RemedyOutcome::Drop,
            Remediation::SwapPatchOperation => {
                let swappable = request
                    .patch
                    .as_ref()
                    .is_some_and(|p| p.operation() != PatchOperation::Remove);
                if error.is_conflict() && swappable {
                    RemedyOutcome::Resubmit(request.with_swapped_operation())
                } else {
                    RemedyOutcome::Drop
                }
            }
            Remediation::RegenerateCredentialAndResubmit => {
                RemedyOutcome::RefreshAndResubmit(request.resubmission())
            }
            Remediation::Recover(recovery) => RemedyOutcome::Recover(recovery.clone()),
        }
    }
}

// =============================================================================
// Request
// =============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub id: Uuid,
    pub resource: String,
    pub verb: Verb,
    pub patch: Option<ConfigurationPatch>,
    pub body: Option<Value>,
    pub retry: RetryBudget,
    pub remediation: Remediation,
    pub created_at: DateTime<Utc>,
    /// Short description for logs.
    pub label: String,
}

impl Request {
    pub fn new(verb: Verb, resource: impl Into<String>) -> Self {
        Request {
            id: Uuid::new_v4(),
            resource: resource.into(),
            verb,
            patch: None,
            body: None,
            retry: RetryBudget::Indefinite,
            remediation: Remediation::DropSilently,
            created_at: Utc::now(),
            label: String::new(),
        }
    }

    pub fn with_patch(mut self, patch: ConfigurationPatch) -> Self {
        self.patch = Some(patch);
        self
    }

    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn with_retry(mut self, retry: RetryBudget) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_remediation(mut self, remediation: Remediation) -> Self {
        self.remediation = remediation;
        self
    }

    pub fn labeled(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    /// Requests that bring something into existence (or clear the way for
    /// it) and therefore get promoted ahead of requests that depend on it.
    pub fn is_creating(&self) -> bool {
        match self.verb {
            Verb::Post | Verb::Put | Verb::Delete => true,
            Verb::Patch => self
                .patch
                .as_ref()
                .is_some_and(|p| p.operation() == PatchOperation::Add && p.is_append()),
        }
    }

    /// PUT or PATCH carrying a patch against a version-controlled document.
    pub fn requires_version_token(&self, resources: &Resources) -> bool {
        matches!(self.verb, Verb::Put | Verb::Patch)
            && self.patch.is_some()
            && resources.is_version_controlled(&self.resource)
    }

    pub fn operation(&self) -> Option<PatchOperation> {
        self.patch.as_ref().map(ConfigurationPatch::operation)
    }

    pub fn is_add(&self) -> bool {
        self.operation() == Some(PatchOperation::Add)
    }

    /// A fresh copy that will not be remediated again.
    pub fn resubmission(&self) -> Request {
        Request {
            id: Uuid::new_v4(),
            remediation: Remediation::DropSilently,
            created_at: Utc::now(),
            ..self.clone()
        }
    }

    /// A resubmission with ADD and REPLACE swapped.
    pub fn with_swapped_operation(&self) -> Request {
        let mut next = self.resubmission();
        if let Some(patch) = next.patch.as_mut() {
            patch.set_operation(patch.operation().swapped());
        }
        next
    }
}

impl std::fmt::Display for Request {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.verb, self.resource)?;
        if let Some(patch) = &self.patch {
            write!(f, " [{}]", patch)?;
        }
        if !self.label.is_empty() {
            write!(f, " ({})", self.label)?;
        }
        Ok(())
    }
}
