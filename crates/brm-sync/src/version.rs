//! # Version Tracker
//!
//! Last-seen version token (ETag), notification sequence and document
//! snapshot of the primary configuration.
//!
//! ## Notification Gate
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  notification (token T, sequence N)                                     │
//! │                                                                         │
//! │  stored sequence S present and N <= S ?  ──► reject (stale/out of order)│
//! │  stored token E present and T != E ?     ──► reject (based on other rev)│
//! │  otherwise                               ──► accept                     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The tracker is constructed by the orchestrator and shared by reference
//! with the transfer engine and the notification intake. All three fields
//! live under one lock so a reader sees a consistent triple.

use brm_core::ConfigurationDocument;
use tokio::sync::RwLock;
use tracing::{debug, warn};

// =============================================================================
// Version State
// =============================================================================

/// Plain state. Acceptance logic lives here so it can be tested directly.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VersionState {
    pub token: Option<String>,
    pub sequence: Option<i64>,
    pub document: Option<String>,
}

impl VersionState {
    /// True if a notification with `token` and `sequence` may be processed.
    pub fn accepts(&self, token: &str, sequence: i64) -> bool {
        if let Some(last) = self.sequence {
            if sequence <= last {
                warn!(
                    sequence,
                    last, "Notification sequence is not newer than the last one processed"
                );
                return false;
            }
        }
        if let Some(expected) = &self.token {
            if expected != token {
                warn!(
                    token,
                    expected = %expected,
                    "Notification base token differs from the last known token"
                );
                return false;
            }
        }
        true
    }
}

// =============================================================================
// Version Tracker
// =============================================================================

#[derive(Debug, Default)]
pub struct VersionTracker {
    state: RwLock<VersionState>,
}

impl VersionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn update_token(&self, token: impl Into<String>) {
        let token = token.into();
        debug!(token = %token, "Version token updated");
        self.state.write().await.token = Some(token);
    }

    /// Stores `sequence` unless a newer one is already stored.
    pub async fn set_notification_sequence(&self, sequence: i64) {
        let mut state = self.state.write().await;
        let stored = state.sequence.map_or(sequence, |last| last.max(sequence));
        debug!(sequence = stored, "Notification sequence updated");
        state.sequence = Some(stored);
    }

    pub async fn is_valid_notification(&self, token: &str, sequence: i64) -> bool {
        self.state.read().await.accepts(token, sequence)
    }

    /// Checks a notification and, when it passes, records its sequence under
    /// the same lock. At most one caller accepts any given sequence.
    pub async fn accept_notification(&self, token: &str, sequence: i64) -> bool {
        let mut state = self.state.write().await;
        if !state.accepts(token, sequence) {
            return false;
        }
        state.sequence = Some(sequence);
        debug!(sequence, "Notification accepted");
        true
    }

    pub async fn record_document(&self, document: impl Into<String>) {
        self.state.write().await.document = Some(document.into());
    }

    /// Records a fetched document together with its token.
    pub async fn record_fetch(&self, document: impl Into<String>, token: Option<String>) {
        let mut state = self.state.write().await;
        state.document = Some(document.into());
        if let Some(token) = token {
            state.token = Some(token);
        }
    }

    pub async fn current_token(&self) -> Option<String> {
        self.state.read().await.token.clone()
    }

    pub async fn current_document(&self) -> Option<String> {
        self.state.read().await.document.clone()
    }

    /// The last document, parsed. `None` if absent or unparseable.
    pub async fn parsed_document(&self) -> Option<ConfigurationDocument> {
        let raw = self.current_document().await?;
        match ConfigurationDocument::parse(&raw) {
            Ok(doc) => Some(doc),
            Err(e) => {
                warn!(?e, "Stored configuration document cannot be parsed");
                None
            }
        }
    }

    pub async fn snapshot(&self) -> VersionState {
        self.state.read().await.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_empty_tracker_accepts_anything() {
        let tracker = VersionTracker::new();
        assert!(tracker.is_valid_notification("any", 0).await);
        assert!(tracker.is_valid_notification("other", -5).await);
    }

    #[tokio::test]
    async fn test_sequence_must_increase() {
        let tracker = VersionTracker::new();
        tracker.set_notification_sequence(7).await;

        assert!(!tracker.is_valid_notification("t", 6).await);
        assert!(!tracker.is_valid_notification("t", 7).await);
        assert!(tracker.is_valid_notification("t", 8).await);
    }

    #[tokio::test]
    async fn test_sequence_never_moves_backwards() {
        let tracker = VersionTracker::new();
        tracker.set_notification_sequence(9).await;
        tracker.set_notification_sequence(4).await;

        assert_eq!(tracker.snapshot().await.sequence, Some(9));
        assert!(!tracker.is_valid_notification("t", 9).await);
    }

    #[tokio::test]
    async fn test_accept_notification_claims_sequence_once() {
        let tracker = Arc::new(VersionTracker::new());
        tracker.update_token("e1").await;

        let claims: Vec<_> = (0..8)
            .map(|_| {
                let tracker = tracker.clone();
                tokio::spawn(async move { tracker.accept_notification("e1", 3).await })
            })
            .collect();
        let mut accepted = 0;
        for claim in claims {
            if claim.await.unwrap() {
                accepted += 1;
            }
        }

        assert_eq!(accepted, 1);
        assert_eq!(tracker.snapshot().await.sequence, Some(3));
        assert!(!tracker.accept_notification("e2", 4).await);
        assert_eq!(tracker.snapshot().await.sequence, Some(3));
    }

    #[tokio::test]
    async fn test_token_must_match() {
        let tracker = VersionTracker::new();
        tracker.update_token("etag-1").await;

        assert!(!tracker.is_valid_notification("etag-2", 1).await);
        assert!(tracker.is_valid_notification("etag-1", 1).await);
    }

    #[tokio::test]
    async fn test_record_fetch_keeps_token_when_absent() {
        let tracker = VersionTracker::new();
        tracker.update_token("a").await;
        tracker.record_fetch("{}", None).await;

        let state = tracker.snapshot().await;
        assert_eq!(state.token.as_deref(), Some("a"));
        assert_eq!(state.document.as_deref(), Some("{}"));

        tracker.record_fetch(r#"{"data": {}}"#, Some("b".into())).await;
        assert_eq!(tracker.current_token().await.as_deref(), Some("b"));
        assert!(tracker.parsed_document().await.is_some());
    }

    #[derive(Debug, Clone)]
    enum Update {
        Token(String),
        Sequence(i64),
    }

    fn update() -> impl Strategy<Value = Update> {
        prop_oneof![
            "[a-c]{1,2}".prop_map(Update::Token),
            (-5i64..50).prop_map(Update::Sequence),
        ]
    }

    proptest! {
        #[test]
        fn notification_gate_is_monotonic(
            updates in prop::collection::vec(update(), 0..20),
            token in "[a-c]{1,2}",
            sequence in -10i64..60,
        ) {
            let mut state = VersionState::default();
            for u in updates {
                match u {
                    Update::Token(t) => state.token = Some(t),
                    Update::Sequence(s) => state.sequence = Some(s),
                }
            }

            let accepted = state.accepts(&token, sequence);
            if let Some(last) = state.sequence {
                if sequence <= last {
                    prop_assert!(!accepted);
                }
            }
            if let Some(expected) = &state.token {
                if expected != &token {
                    prop_assert!(!accepted);
                }
            }
            let newer = state.sequence.map_or(true, |last| sequence > last);
            let same_token = state.token.as_ref().map_or(true, |t| t == &token);
            prop_assert_eq!(accepted, newer && same_token);
        }
    }
}
