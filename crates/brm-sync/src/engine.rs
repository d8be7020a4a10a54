//! # Transfer Engine
//!
//! Executes one [`Request`] against the mediator: version token, path
//! translation, send, retry and remediation.
//!
//! ## Execution Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  sync disabled ───────────────────────────────────────────► DROPPED     │
//! │                                                                         │
//! │  version controlled?                                                    │
//! │    not initialized      ──► wait, requeue front (creating ones first)  │
//! │    GET document + token ──► none: backoff, requeue front                │
//! │                                                                         │
//! │  primary config patch?  ──► local positions → remote positions          │
//! │                             manager missing remotely ──► remediation   │
//! │                                                                         │
//! │  send ──┬── ok ─────────────────────────────────────────► SUCCEEDED     │
//! │         ├── no answer  ──► backoff, retry while budget lasts            │
//! │         └── HTTP error ──► pause, then                                  │
//! │               path gone + not ADD ──► promote creating, drop            │
//! │               stale token         ──► re-fetch token, retry             │
//! │               otherwise           ──► remediation                       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Every sleep goes through [`Shutdown::sleep`], so a stopping queue
//! abandons the in-flight request instead of waiting it out.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use backoff::backoff::Backoff;
use backoff::ExponentialBackoff;
use brm_core::{ConfigurationDocument, IndexTranslator, ModelView, PatchOperation, Resources};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::client::MediatorClient;
use crate::config::SyncSettings;
use crate::error::{MediatorError, SyncError, SyncResult};
use crate::queue::{Disposition, Processor, Shutdown};
use crate::request::{Recovery, RemedyOutcome, Request, Verb};
use crate::version::VersionTracker;

// =============================================================================
// Sync Flags
// =============================================================================

/// Runtime switches shared by the orchestrator and the engine.
#[derive(Debug)]
pub struct SyncFlags {
    enabled: AtomicBool,
    initialized: AtomicBool,
    subscription_updates: AtomicBool,
}

impl SyncFlags {
    pub fn new(enabled: bool) -> Self {
        SyncFlags {
            enabled: AtomicBool::new(enabled),
            initialized: AtomicBool::new(false),
            subscription_updates: AtomicBool::new(true),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    /// Set once the startup push finished and a token was fetched.
    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    pub fn set_initialized(&self, initialized: bool) {
        self.initialized.store(initialized, Ordering::SeqCst);
    }

    pub fn subscription_updates_enabled(&self) -> bool {
        self.subscription_updates.load(Ordering::SeqCst)
    }

    pub fn set_subscription_updates(&self, enabled: bool) {
        self.subscription_updates.store(enabled, Ordering::SeqCst);
    }
}

/// What to do after an HTTP error answer.
enum Next {
    Retry,
    Drop,
    Remediate,
}

// =============================================================================
// Transfer Engine
// =============================================================================

pub struct TransferEngine {
    client: Arc<dyn MediatorClient>,
    tracker: Arc<VersionTracker>,
    model: Arc<dyn ModelView>,
    resources: Resources,
    settings: SyncSettings,
    flags: Arc<SyncFlags>,
    recovery_tx: mpsc::UnboundedSender<Recovery>,
    /// Grows across consecutive token misses, reset by the next token.
    token_backoff: Mutex<ExponentialBackoff>,
}

impl TransferEngine {
    pub fn new(
        client: Arc<dyn MediatorClient>,
        tracker: Arc<VersionTracker>,
        model: Arc<dyn ModelView>,
        resources: Resources,
        settings: SyncSettings,
        flags: Arc<SyncFlags>,
        recovery_tx: mpsc::UnboundedSender<Recovery>,
    ) -> Self {
        let token_backoff = Mutex::new(settings.token_backoff());
        TransferEngine {
            client,
            tracker,
            model,
            resources,
            settings,
            flags,
            recovery_tx,
            token_backoff,
        }
    }

    async fn execute(
        &self,
        mut request: Request,
        shutdown: &Shutdown,
    ) -> SyncResult<Disposition<Request>> {
        let mut backoff = self.settings.backoff();
        let version_controlled = request.requires_version_token(&self.resources);

        loop {
            if version_controlled {
                if !self.flags.is_initialized() {
                    debug!(id = %request.id, "Client not initialized, request requeued");
                    shutdown.sleep(self.settings.token_fetch_delay()).await?;
                    return Ok(requeue_with_creating_first(request));
                }

                shutdown.sleep(self.settings.token_fetch_delay()).await?;
                match self.fetch_token(&request.resource).await {
                    Some(token) => {
                        self.reset_token_backoff();
                        if let Some(patch) = request.patch.as_mut() {
                            patch.set_base_etag(token);
                        }
                    }
                    None => {
                        let delay = self.next_token_backoff();
                        warn!(
                            id = %request.id,
                            resource = %request.resource,
                            delay_ms = delay.as_millis() as u64,
                            "No version token, request requeued"
                        );
                        shutdown.sleep(delay).await?;
                        return Ok(requeue_with_creating_first(request));
                    }
                }
            }

            let outgoing = match self.translate(&request).await {
                Ok(outgoing) => outgoing,
                Err(e) => return Ok(self.remediate(request, e).await),
            };

            debug!(id = %request.id, request = %outgoing, "Sending request");
            let err = match self.send(&outgoing).await {
                Ok(()) => {
                    info!(id = %request.id, request = %outgoing, "Request succeeded");
                    return Ok(Disposition::Done);
                }
                Err(e) => e,
            };

            match err.mediator() {
                Some(m) if m.is_connectivity() => {
                    let delay = backoff
                        .next_backoff()
                        .unwrap_or(backoff.max_interval);
                    warn!(
                        id = %request.id,
                        retry = %request.retry,
                        delay_ms = delay.as_millis() as u64,
                        error = %m,
                        "Mediator unreachable"
                    );
                    shutdown.sleep(delay).await?;
                    if request.retry.try_consume() {
                        continue;
                    }
                    return Ok(self.remediate(request, err).await);
                }
                Some(m) if m.is_http_error() => {
                    let m = m.clone();
                    warn!(id = %request.id, request = %outgoing, error = %m, "Mediator rejected request");
                    shutdown.sleep(self.settings.http_error_delay()).await?;
                    match self.after_http_error(&mut request, &outgoing, &m).await {
                        Next::Retry => continue,
                        Next::Drop => return Ok(Disposition::Promote(Request::is_creating)),
                        Next::Remediate => return Ok(self.remediate(request, err).await),
                    }
                }
                _ => {
                    error!(id = %request.id, request = %outgoing, ?err, "Request failed");
                    shutdown.sleep(self.settings.http_error_delay()).await?;
                    return Ok(self.remediate(request, err).await);
                }
            }
        }
    }

    /// Decides between dropping, retrying and remediating.
    async fn after_http_error(
        &self,
        request: &mut Request,
        outgoing: &Request,
        error: &MediatorError,
    ) -> Next {
        if error.indicates_missing_path() && !request.is_add() && self.confirmed_missing(outgoing).await {
            info!(id = %request.id, request = %outgoing, "Target no longer exists, request dropped");
            return Next::Drop;
        }

        if error.is_stale_token() && request.requires_version_token(&self.resources) {
            if !request.is_add() && self.confirmed_missing(outgoing).await {
                info!(id = %request.id, request = %outgoing, "Target no longer exists, request dropped");
                return Next::Drop;
            }
            if request.retry.try_consume() {
                debug!(id = %request.id, "Version token not current, fetching a new one");
                return Next::Retry;
            }
        }

        Next::Remediate
    }

    fn next_token_backoff(&self) -> Duration {
        match self.token_backoff.lock() {
            Ok(mut backoff) => backoff.next_backoff().unwrap_or(backoff.max_interval),
            Err(_) => self.settings.token_unavailable_delay(),
        }
    }

    fn reset_token_backoff(&self) {
        if let Ok(mut backoff) = self.token_backoff.lock() {
            backoff.reset();
        }
    }

    /// GETs the document and returns its token. The primary configuration
    /// snapshot is recorded as a side effect.
    async fn fetch_token(&self, resource: &str) -> Option<String> {
        match self.client.get_with_version(resource).await {
            Ok(versioned) => {
                if resource == self.resources.configuration() {
                    self.tracker
                        .record_fetch(versioned.body, versioned.etag.clone())
                        .await;
                }
                versioned.etag
            }
            Err(e) => {
                warn!(resource, error = %e, "Failed to fetch version token");
                None
            }
        }
    }

    /// True only when a fresh GET shows the patched path is absent. A failed
    /// probe never confirms anything.
    async fn confirmed_missing(&self, outgoing: &Request) -> bool {
        let Some(patch) = &outgoing.patch else {
            return false;
        };
        let versioned = match self.client.get_with_version(&outgoing.resource).await {
            Ok(v) => v,
            Err(e) => {
                debug!(error = %e, "Existence probe failed");
                return false;
            }
        };
        let document = match ConfigurationDocument::parse(&versioned.body) {
            Ok(doc) => doc,
            Err(e) => {
                debug!(?e, "Existence probe returned an unreadable document");
                return false;
            }
        };
        if outgoing.resource == self.resources.configuration() {
            self.tracker.record_fetch(versioned.body, versioned.etag).await;
        }
        !document.contains_path(patch.path())
    }

    /// Copy of `request` with its patch path in remote positions.
    async fn translate(&self, request: &Request) -> SyncResult<Request> {
        let mut outgoing = request.clone();
        if request.resource != self.resources.configuration() {
            return Ok(outgoing);
        }
        let Some(patch) = outgoing.patch.as_mut() else {
            return Ok(outgoing);
        };

        let document = self.tracker.parsed_document().await;
        let translator = IndexTranslator::new(self.model.as_ref(), document.as_ref());
        match translator.to_remote_path(patch.path()) {
            Some(path) => {
                patch.set_path(path);
                Ok(outgoing)
            }
            None if patch.operation() == PatchOperation::Add => Ok(outgoing),
            None => Err(SyncError::MissingBackupManager {
                path: patch.path().to_string(),
            }),
        }
    }

    async fn send(&self, request: &Request) -> SyncResult<()> {
        let resource = request.resource.as_str();
        let body = request
            .body
            .clone()
            .or_else(|| request.patch.as_ref().map(|p| p.to_body()))
            .unwrap_or_default();

        match request.verb {
            Verb::Post => self.client.post(resource, &body).await?,
            Verb::Put => self.client.put(resource, &body).await?,
            Verb::Delete => self.client.delete(resource).await?,
            Verb::Patch => match &request.patch {
                Some(patch) => self.client.patch(resource, patch).await?,
                None => {
                    return Err(SyncError::Internal(format!(
                        "PATCH {resource} without a patch"
                    )))
                }
            },
        }
        Ok(())
    }

    /// Applies the request's remediation after a final failure.
    async fn remediate(&self, request: Request, error: SyncError) -> Disposition<Request> {
        match request.remediation.decide(&request, &error) {
            RemedyOutcome::Drop => {
                warn!(id = %request.id, request = %request, ?error, "Request dropped after failure");
                Disposition::Done
            }
            RemedyOutcome::Resubmit(next) => {
                info!(id = %request.id, next = %next.id, request = %next, "Request resubmitted");
                Disposition::Requeue {
                    item: next,
                    promote: None,
                }
            }
            RemedyOutcome::RefreshAndResubmit(next) => {
                if let Err(e) = self.client.refresh_credentials().await {
                    error!(id = %request.id, error = %e, "Credential refresh failed, request dropped");
                    return Disposition::Done;
                }
                info!(id = %request.id, next = %next.id, "Credentials refreshed, request resubmitted");
                Disposition::Requeue {
                    item: next,
                    promote: None,
                }
            }
            RemedyOutcome::Recover(recovery) => {
                info!(id = %request.id, ?recovery, "Request failed, starting recovery");
                if self.recovery_tx.send(recovery).is_err() {
                    error!(id = %request.id, "Recovery worker is gone");
                }
                Disposition::Done
            }
        }
    }
}

fn requeue_with_creating_first(request: Request) -> Disposition<Request> {
    Disposition::Requeue {
        item: request,
        promote: Some(Request::is_creating),
    }
}

#[async_trait]
impl Processor<Request> for TransferEngine {
    async fn process(&self, request: Request, shutdown: &Shutdown) -> Disposition<Request> {
        if !self.flags.is_enabled() {
            debug!(id = %request.id, request = %request, "Sync disabled, request dropped");
            return Disposition::Done;
        }

        let id = request.id;
        match self.execute(request, shutdown).await {
            Ok(disposition) => disposition,
            Err(SyncError::Interrupted) => {
                info!(id = %id, "Request abandoned on shutdown");
                Disposition::Abandon
            }
            Err(e) => {
                error!(id = %id, ?e, "Request processing failed");
                Disposition::Done
            }
        }
    }

    async fn on_panic(&self, request: Request) -> Disposition<Request> {
        let error = SyncError::Internal("request handler panicked".into());
        self.remediate(request, error).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::RequestQueue;
    use crate::request::{Remediation, RetryBudget};
    use crate::testing::{shutdown_signal, Method, ScriptedClient};
    use brm_core::{
        Backup, BackupManager, BackupStatus, ConfigurationPatch, CreationType, StaticModel,
    };
    use chrono::Utc;
    use serde_json::{json, Value};
    use tokio::time::Instant;

    const CONFIG: &str = "configurations/backup-restore";
    const ACM: &str = "configurations/ietf-netconf-acm";

    struct Harness {
        client: Arc<ScriptedClient>,
        flags: Arc<SyncFlags>,
        engine: TransferEngine,
        recoveries: mpsc::UnboundedReceiver<Recovery>,
    }

    fn manager(id: &str, backups: &[&str]) -> BackupManager {
        let mut manager = BackupManager::new(id);
        manager.backups = backups
            .iter()
            .map(|b| Backup {
                id: b.to_string(),
                backup_name: b.to_string(),
                creation_time: Utc::now(),
                status: BackupStatus::BackupComplete,
                creation_type: CreationType::Manual,
            })
            .collect();
        manager
    }

    fn harness(managers: Vec<BackupManager>) -> Harness {
        harness_with(managers, SyncSettings::default())
    }

    fn harness_with(managers: Vec<BackupManager>, settings: SyncSettings) -> Harness {
        let client = Arc::new(ScriptedClient::new());
        let flags = Arc::new(SyncFlags::new(true));
        flags.set_initialized(true);
        let (recovery_tx, recoveries) = mpsc::unbounded_channel();
        let engine = TransferEngine::new(
            client.clone(),
            Arc::new(VersionTracker::new()),
            Arc::new(StaticModel::new(managers)),
            Resources::default(),
            settings,
            flags.clone(),
            recovery_tx,
        );
        Harness {
            client,
            flags,
            engine,
            recoveries,
        }
    }

    fn remote(managers: Value) -> Value {
        json!({ "name": "backup-restore", "data": { "backup-restore:brm": { "backup-manager": managers } } })
    }

    fn patch_request(op: PatchOperation, path: &str) -> Request {
        Request::new(Verb::Patch, CONFIG).with_patch(ConfigurationPatch::new(op, path, json!("v")))
    }

    #[tokio::test(start_paused = true)]
    async fn test_connectivity_budget_sends_n_plus_one_times() {
        let mut h = harness(vec![]);
        for _ in 0..3 {
            h.client.script(
                Method::Post,
                "configurations",
                Err(MediatorError::Connectivity("refused".into())),
            );
        }
        let request = Request::new(Verb::Post, "configurations")
            .with_body(json!({}))
            .with_retry(RetryBudget::Remaining(2))
            .with_remediation(Remediation::Recover(Recovery::RecreateConfiguration));
        let (_tx, shutdown) = shutdown_signal();

        let disposition = h.engine.process(request, &shutdown).await;

        assert!(matches!(disposition, Disposition::Done));
        assert_eq!(h.client.calls_to(Method::Post, "configurations").len(), 3);
        assert_eq!(h.recoveries.try_recv().unwrap(), Recovery::RecreateConfiguration);
        assert!(h.recoveries.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_connectivity_backoff_doubles_up_to_ceiling() {
        let h = harness_with(
            vec![],
            SyncSettings {
                initial_delay_ms: 100,
                max_delay_ms: 400,
                ..Default::default()
            },
        );
        for _ in 0..6 {
            h.client.script(
                Method::Post,
                "configurations",
                Err(MediatorError::Connectivity("refused".into())),
            );
        }
        let request = Request::new(Verb::Post, "configurations")
            .with_body(json!({}))
            .with_retry(RetryBudget::Remaining(5));
        let (_tx, shutdown) = shutdown_signal();

        h.engine.process(request, &shutdown).await;

        let sends = h.client.calls_to(Method::Post, "configurations");
        assert_eq!(sends.len(), 6);
        let gaps: Vec<u64> = sends
            .windows(2)
            .map(|pair| (pair[1].at - pair[0].at).as_millis() as u64)
            .collect();
        assert_eq!(gaps, vec![100, 200, 400, 400, 400]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_token_backs_off_until_a_token_arrives() {
        let h = harness(vec![]);
        let (_tx, shutdown) = shutdown_signal();
        let role = || {
            Request::new(Verb::Patch, ACM).with_patch(ConfigurationPatch::new(
                PatchOperation::Add,
                "/ietf-netconf-acm:nacm/rule-list/1",
                json!({ "name": "admin" }),
            ))
        };

        // token fetch pause (500 ms) plus a token backoff of 1 s, 2 s, 3 s
        for expected in [1500, 2500, 3500] {
            let started = Instant::now();
            let disposition = h.engine.process(role(), &shutdown).await;
            assert!(matches!(disposition, Disposition::Requeue { promote: Some(_), .. }));
            assert_eq!(started.elapsed().as_millis() as u64, expected);
        }

        h.client.set_document(ACM, json!({ "data": {} }), Some("n1"));
        let disposition = h.engine.process(role(), &shutdown).await;
        assert!(matches!(disposition, Disposition::Done));
        assert_eq!(h.client.calls_to(Method::Patch, ACM).len(), 1);

        h.client.remove_document(ACM);
        let started = Instant::now();
        h.engine.process(role(), &shutdown).await;
        assert_eq!(started.elapsed().as_millis() as u64, 1500);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_token_on_deleted_target_drops_and_promotes_creating() {
        let mut h = harness(vec![manager("A", &[])]);
        h.client.set_document(CONFIG, remote(json!([{ "id": "A", "housekeeping": {} }])), Some("e1"));
        h.client.script(
            Method::Patch,
            CONFIG,
            Err(MediatorError::Conflict {
                message: "ETag value not current".into(),
            }),
        );
        let stale = patch_request(
            PatchOperation::Replace,
            "/backup-restore:brm/backup-manager/0/scheduler/admin-state",
        )
        .with_remediation(Remediation::SwapPatchOperation);
        let other = patch_request(PatchOperation::Replace, "/backup-restore:brm/backup-manager/0/housekeeping");
        let creating = Request::new(Verb::Post, "subscriptions").with_body(json!({}));
        let last = patch_request(
            PatchOperation::Replace,
            "/backup-restore:brm/backup-manager/0/housekeeping/auto-delete",
        );

        let queue = RequestQueue::spawn(Arc::new(h.engine), Duration::from_secs(5));
        queue.enqueue(stale).await.unwrap();
        queue.enqueue(other).await.unwrap();
        queue.enqueue(creating).await.unwrap();
        queue.enqueue_and_wait(last).await.unwrap();
        queue.stop_processing().await;

        let writes: Vec<(Method, String)> = h
            .client
            .calls()
            .into_iter()
            .filter(|c| c.method != Method::Get)
            .map(|c| {
                let target = c
                    .body
                    .as_ref()
                    .and_then(|b| b["patch"][0]["path"].as_str().map(str::to_string))
                    .unwrap_or(c.resource);
                (c.method, target)
            })
            .collect();
        assert_eq!(
            writes,
            vec![
                (Method::Patch, "/backup-restore:brm/backup-manager/0/scheduler/admin-state".to_string()),
                (Method::Post, "subscriptions".to_string()),
                (Method::Patch, "/backup-restore:brm/backup-manager/0/housekeeping".to_string()),
                (Method::Patch, "/backup-restore:brm/backup-manager/0/housekeeping/auto-delete".to_string()),
            ]
        );
        assert!(h.recoveries.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_token_is_refetched_and_retried() {
        let mut h = harness(vec![manager("A", &[])]);
        h.client.set_document(CONFIG, remote(json!([{ "id": "A", "housekeeping": {} }])), Some("e1"));
        h.client.script(
            Method::Patch,
            CONFIG,
            Err(MediatorError::Conflict {
                message: "ETag value not current".into(),
            }),
        );
        let request = patch_request(PatchOperation::Replace, "/backup-restore:brm/backup-manager/0/housekeeping")
            .with_remediation(Remediation::SwapPatchOperation);
        let (_tx, shutdown) = shutdown_signal();

        let disposition = h.engine.process(request, &shutdown).await;

        assert!(matches!(disposition, Disposition::Done));
        let patches = h.client.calls_to(Method::Patch, CONFIG);
        assert_eq!(patches.len(), 2);
        assert_eq!(patches[1].body.as_ref().unwrap()["baseETag"], "e1");
        assert!(h.recoveries.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_path_drops_replace_but_not_add() {
        let h = harness(vec![manager("A", &["a1"])]);
        h.client.set_document(CONFIG, remote(json!([{ "id": "A" }])), Some("e1"));
        h.client.script(Method::Patch, CONFIG, Err(MediatorError::NotFound { resource: CONFIG.into() }));
        let (_tx, shutdown) = shutdown_signal();

        let replace = patch_request(PatchOperation::Replace, "/backup-restore:brm/backup-manager/0/backup/0");
        let disposition = h.engine.process(replace, &shutdown).await;
        assert!(matches!(disposition, Disposition::Promote(_)));

        let mut h = harness(vec![manager("A", &["a1"])]);
        h.client.set_document(CONFIG, remote(json!([{ "id": "A" }])), Some("e1"));
        h.client.script(Method::Patch, CONFIG, Err(MediatorError::NotFound { resource: CONFIG.into() }));
        let add = patch_request(PatchOperation::Add, "/backup-restore:brm/backup-manager/0/backup/0")
            .with_retry(RetryBudget::Remaining(0))
            .with_remediation(Remediation::Recover(Recovery::UploadSchema));
        let disposition = h.engine.process(add, &shutdown).await;

        assert!(matches!(disposition, Disposition::Done));
        assert_eq!(h.recoveries.try_recv().unwrap(), Recovery::UploadSchema);
    }

    #[tokio::test(start_paused = true)]
    async fn test_paths_are_translated_to_remote_positions() {
        let h = harness(vec![manager("Z", &[]), manager("X", &[]), manager("Y", &[])]);
        h.client.set_document(
            CONFIG,
            remote(json!([{ "id": "X" }, { "id": "Y" }, { "id": "Z" }])),
            Some("e1"),
        );
        let request = patch_request(PatchOperation::Replace, "/backup-restore:brm/backup-manager/0/scheduler");
        let (_tx, shutdown) = shutdown_signal();

        h.engine.process(request, &shutdown).await;

        let patches = h.client.calls_to(Method::Patch, CONFIG);
        assert_eq!(
            patches[0].body.as_ref().unwrap()["patch"][0]["path"],
            "/backup-restore:brm/backup-manager/2/scheduler"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_backup_manager_goes_to_remediation() {
        let h = harness(vec![manager("Z", &[]), manager("A", &[])]);
        h.client.set_document(CONFIG, remote(json!([{ "id": "A" }])), Some("e1"));
        let request = patch_request(PatchOperation::Replace, "/backup-restore:brm/backup-manager/0/housekeeping")
            .with_remediation(Remediation::SwapPatchOperation);
        let (_tx, shutdown) = shutdown_signal();

        match h.engine.process(request, &shutdown).await {
            Disposition::Requeue { item, promote } => {
                assert!(promote.is_none());
                assert_eq!(item.operation(), Some(PatchOperation::Add));
            }
            _ => panic!("expected a resubmission"),
        }
        assert!(h.client.calls_to(Method::Patch, CONFIG).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_not_initialized_requeues_without_sending() {
        let h = harness(vec![]);
        h.flags.set_initialized(false);
        let (_tx, shutdown) = shutdown_signal();

        let disposition = h
            .engine
            .process(patch_request(PatchOperation::Replace, "/p"), &shutdown)
            .await;

        assert!(matches!(disposition, Disposition::Requeue { promote: Some(_), .. }));
        assert!(h.client.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_token_requeues() {
        let h = harness(vec![]);
        let (_tx, shutdown) = shutdown_signal();

        let disposition = h
            .engine
            .process(patch_request(PatchOperation::Replace, "/p"), &shutdown)
            .await;

        assert!(matches!(disposition, Disposition::Requeue { promote: Some(_), .. }));
        assert!(h.client.calls_to(Method::Patch, CONFIG).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_disabled_sync_drops_requests() {
        let h = harness(vec![]);
        h.flags.set_enabled(false);
        let (_tx, shutdown) = shutdown_signal();

        let disposition = h
            .engine
            .process(Request::new(Verb::Delete, "subscriptions/backup-restore"), &shutdown)
            .await;

        assert!(matches!(disposition, Disposition::Done));
        assert!(h.client.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_credential_failure_refreshes_and_resubmits() {
        let h = harness(vec![]);
        h.client.script(
            Method::Post,
            "subscriptions",
            Err(MediatorError::Status {
                status: 401,
                message: "certificate".into(),
            }),
        );
        let request = Request::new(Verb::Post, "subscriptions")
            .with_body(json!({}))
            .with_retry(RetryBudget::Remaining(0))
            .with_remediation(Remediation::RegenerateCredentialAndResubmit);
        let (_tx, shutdown) = shutdown_signal();

        let disposition = h.engine.process(request, &shutdown).await;

        assert!(matches!(disposition, Disposition::Requeue { promote: None, .. }));
        assert_eq!(h.client.refreshes(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_abandons_in_flight_request() {
        let h = harness(vec![]);
        let (tx, shutdown) = shutdown_signal();
        tx.send(true).unwrap();

        let disposition = h
            .engine
            .process(patch_request(PatchOperation::Replace, "/p"), &shutdown)
            .await;

        assert!(matches!(disposition, Disposition::Abandon));
    }

    #[tokio::test]
    async fn test_panic_runs_remediation() {
        let mut h = harness(vec![]);
        let request = Request::new(Verb::Post, "schemas")
            .with_remediation(Remediation::Recover(Recovery::DeleteSchema));

        let disposition = h.engine.on_panic(request).await;

        assert!(matches!(disposition, Disposition::Done));
        assert_eq!(h.recoveries.try_recv().unwrap(), Recovery::DeleteSchema);
    }
}
