//! # Sync Orchestrator
//!
//! Top-level sequencing: startup push, access roles, subscription, lease
//! renewal, recovery, and the domain-event entry points.
//!
//! ## Startup Sequence
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Schema and Configuration Push                     │
//! │                                                                         │
//! │  1. wait until `configurations` answers (connectivity ⇒ sleep, retry)  │
//! │  2. initialized := false                                               │
//! │  3. DELETE configurations/S            (only if it exists)             │
//! │  4. POST   configurations              (empty document)                │
//! │  5. schema present?                                                    │
//! │       version differs ⇒ DELETE schemas/S, pause, POST schemas          │
//! │       version equal   ⇒ keep                                           │
//! │     schema absent     ⇒ POST schemas                                   │
//! │  6. populate: bulk PUT, or first manager PUT + one ADD per manager     │
//! │  7. initialized := true, fetch token + document                        │
//! │  8. access roles missing from the ACM document ⇒ PATCH ADD each        │
//! │  9. DELETE subscriptions/S (if present), POST subscriptions            │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Every step goes through the request queue, so startup requests are
//! ordered with domain events submitted concurrently. Steps 3 to 6 wait for
//! their request to be processed before moving on.
//!
//! ## Background Tasks
//! ```text
//! ┌──────────────────┐   Recovery    ┌──────────────────┐
//! │ TransferEngine   │──────────────►│ recovery worker  │──► queue
//! └──────────────────┘   (mpsc)      └──────────────────┘
//!
//! ┌──────────────────┐   every renewal_interval
//! │ lease renewal    │──► subscription missing ⇒ POST, lease low ⇒ PUT
//! └──────────────────┘
//! ```
//! Both tasks stop on [`SyncOrchestrator::shutdown`].

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use backoff::backoff::Backoff;
use brm_core::document::{lease_seconds, remote_schema_version, strip_whitespace};
use brm_core::{IndexTranslator, ModelView, ProgressReport, Resources};
use serde::Serialize;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::builder::{AccessRole, RequestBuilder};
use crate::client::MediatorClient;
use crate::config::{SubscriptionSettings, SyncConfig, SyncSettings};
use crate::engine::{SyncFlags, TransferEngine};
use crate::error::{MediatorError, SyncResult};
use crate::inbound::{IntakeOutcome, Notification, NotificationHandler};
use crate::queue::{RequestQueue, Shutdown};
use crate::request::{Recovery, Remediation, Request, RetryBudget};
use crate::version::VersionTracker;

/// Pause between deleting an outdated schema and uploading the new one.
const SCHEMA_REPLACE_PAUSE: Duration = Duration::from_millis(500);

/// Pause between incremental add-manager patches.
const MANAGER_ADD_PAUSE: Duration = Duration::from_millis(100);

// =============================================================================
// Status
// =============================================================================

/// How the configuration is populated after the empty document is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Population {
    /// One PUT carrying every manager.
    Bulk,
    /// PUT of the first manager, then one add-manager patch per manager.
    Incremental,
}

/// Point-in-time view of the sync client.
#[derive(Debug, Clone, Serialize)]
pub struct SyncStatus {
    pub enabled: bool,
    pub initialized: bool,
    pub subscription_updates: bool,
    pub pending_requests: usize,
    pub version_token: Option<String>,
    pub notification_sequence: Option<i64>,
}

/// Where a progress report is shown.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum ProgressScope {
    Manager(String),
    Backup { manager: String, backup: String },
}

/// Last report per scope and the progress lists known to exist.
#[derive(Default)]
struct ProgressLedger {
    last: HashMap<ProgressScope, ProgressReport>,
    lists: HashSet<String>,
}

// =============================================================================
// Sync Orchestrator
// =============================================================================

struct Inner {
    client: Arc<dyn MediatorClient>,
    tracker: Arc<VersionTracker>,
    flags: Arc<SyncFlags>,
    builder: RequestBuilder,
    queue: RequestQueue<Request>,
    inbound: NotificationHandler,
    settings: SyncSettings,
    subscription: SubscriptionSettings,
    shutdown_tx: watch::Sender<bool>,
    shutdown: Shutdown,
    tasks: std::sync::Mutex<Vec<JoinHandle<()>>>,
    progress: Mutex<ProgressLedger>,
    manager_list_created: AtomicBool,
}

/// Owns the queue, the transfer engine and the background tasks.
///
/// Cloning is cheap and shares everything.
#[derive(Clone)]
pub struct SyncOrchestrator {
    inner: Arc<Inner>,
}

impl SyncOrchestrator {
    /// Wires the components together and starts the queue consumer and the
    /// recovery worker. Must be called inside a tokio runtime.
    pub fn new(
        config: SyncConfig,
        client: Arc<dyn MediatorClient>,
        model: Arc<dyn ModelView>,
    ) -> SyncResult<Self> {
        config.validate()?;

        let tracker = Arc::new(VersionTracker::new());
        let flags = Arc::new(SyncFlags::new(config.is_sync_enabled()));
        let builder = RequestBuilder::new(&config, model.clone())?;
        let resources = builder.resources().clone();

        let (recovery_tx, recovery_rx) = mpsc::unbounded_channel();
        let engine = TransferEngine::new(
            client.clone(),
            tracker.clone(),
            model.clone(),
            resources.clone(),
            config.sync.clone(),
            flags.clone(),
            recovery_tx,
        );
        let queue = RequestQueue::spawn(Arc::new(engine), config.sync.poll_interval());

        let inbound = NotificationHandler::new(client.clone(), tracker.clone(), model, resources);

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let inner = Inner {
            client,
            tracker,
            flags,
            builder,
            queue,
            inbound,
            settings: config.sync.clone(),
            subscription: config.subscription.clone(),
            shutdown_tx,
            shutdown: Shutdown::new(shutdown_rx),
            tasks: std::sync::Mutex::new(Vec::new()),
            progress: Mutex::new(ProgressLedger::default()),
            manager_list_created: AtomicBool::new(false),
        };

        let orchestrator = SyncOrchestrator {
            inner: Arc::new(inner),
        };
        let worker = tokio::spawn(
            orchestrator
                .clone()
                .run_recoveries(recovery_rx, orchestrator.inner.shutdown_tx.subscribe()),
        );
        orchestrator.track(worker);

        info!(
            schema = %orchestrator.resources().schema_name(),
            enabled = orchestrator.inner.flags.is_enabled(),
            "Sync orchestrator created"
        );
        Ok(orchestrator)
    }

    pub fn tracker(&self) -> &Arc<VersionTracker> {
        &self.inner.tracker
    }

    pub fn flags(&self) -> &Arc<SyncFlags> {
        &self.inner.flags
    }

    pub fn builder(&self) -> &RequestBuilder {
        &self.inner.builder
    }

    fn resources(&self) -> &Resources {
        self.inner.builder.resources()
    }

    pub async fn status(&self) -> SyncStatus {
        let version = self.inner.tracker.snapshot().await;
        SyncStatus {
            enabled: self.inner.flags.is_enabled(),
            initialized: self.inner.flags.is_initialized(),
            subscription_updates: self.inner.flags.subscription_updates_enabled(),
            pending_requests: self.inner.queue.len().await,
            version_token: version.token,
            notification_sequence: version.sequence,
        }
    }

    fn track(&self, handle: JoinHandle<()>) {
        if let Ok(mut tasks) = self.inner.tasks.lock() {
            tasks.push(handle);
        }
    }

    // -------------------------------------------------------------------------
    // Startup
    // -------------------------------------------------------------------------

    /// Waits for the mediator, then pushes schema and configuration with
    /// indefinite retries.
    pub async fn initialize(&self) -> SyncResult<()> {
        if !self.inner.flags.is_enabled() {
            info!("Sync is disabled, skipping mediator initialization");
            return Ok(());
        }
        self.wait_until_reachable().await?;
        self.push_schema_and_configuration(true, true, Population::Bulk)
            .await
    }

    /// Re-runs the push on demand. Outside startup managers are added one
    /// by one and checks give up after a bounded number of attempts.
    pub async fn prepare(&self, startup: bool) -> SyncResult<()> {
        if startup {
            self.push_schema_and_configuration(true, true, Population::Bulk)
                .await
        } else {
            self.push_schema_and_configuration(false, false, Population::Incremental)
                .await
        }
    }

    /// Probes `configurations` until the mediator answers.
    pub async fn wait_until_reachable(&self) -> SyncResult<()> {
        let resource = self.resources().configurations();
        loop {
            match self.inner.client.get(&resource).await {
                Ok(_) => {
                    info!("Mediator is reachable");
                    return Ok(());
                }
                Err(e) if e.is_connectivity() => {
                    info!(?e, "Mediator not reachable yet");
                    self.inner
                        .shutdown
                        .sleep(self.inner.settings.reachability_delay())
                        .await?;
                }
                Err(e) => {
                    error!(?e, "Mediator readiness check failed");
                    return Err(e.into());
                }
            }
        }
    }

    pub async fn push_schema_and_configuration(
        &self,
        retry_forever: bool,
        startup: bool,
        population: Population,
    ) -> SyncResult<()> {
        info!(?population, startup, "Pushing schema and configuration");
        self.push_configuration(population, false).await?;

        let attempts = if retry_forever {
            RetryBudget::Indefinite
        } else {
            RetryBudget::Remaining(1)
        };
        self.ensure_access_roles(attempts, startup).await?;
        self.resubscribe(attempts, startup).await?;
        info!("Schema and configuration pushed");
        Ok(())
    }

    /// Steps 2 to 7. With `recovering` every request drops silently on
    /// failure instead of triggering another recovery.
    async fn push_configuration(&self, population: Population, recovering: bool) -> SyncResult<()> {
        self.inner.flags.set_initialized(false);
        self.inner.manager_list_created.store(false, Ordering::SeqCst);
        *self.inner.progress.lock().await = ProgressLedger::default();

        self.delete_configuration(recovering).await?;
        self.submit_step(self.builder().create_empty_configuration(), recovering)
            .await?;
        self.upload_schema(recovering).await?;

        match population {
            Population::Bulk => {
                self.submit_step(self.builder().put_configuration()?, recovering)
                    .await?
            }
            Population::Incremental => self.populate_incrementally().await?,
        }

        self.mark_initialized().await;
        Ok(())
    }

    async fn delete_configuration(&self, recovering: bool) -> SyncResult<()> {
        let resource = self.resources().configuration();
        if self.exists(&resource, RetryBudget::Remaining(1), false).await? {
            self.submit_step(self.builder().delete_configuration(), recovering)
                .await?;
        }
        Ok(())
    }

    async fn upload_schema(&self, recovering: bool) -> SyncResult<()> {
        if self.schema_exists().await? {
            let remote = self
                .inner
                .client
                .get(&self.resources().schema())
                .await
                .ok()
                .and_then(|schema| remote_schema_version(&schema));
            let local = self.builder().schema_version();
            if remote.is_some() && remote == local {
                info!(version = ?local, "Schema is up to date");
                return Ok(());
            }

            info!(?local, ?remote, "Schema version differs, replacing schema");
            self.submit_step(self.builder().delete_schema(), recovering)
                .await?;
            self.inner.shutdown.sleep(SCHEMA_REPLACE_PAUSE).await?;
        }
        self.submit_step(self.builder().upload_schema(), recovering)
            .await
    }

    async fn populate_incrementally(&self) -> SyncResult<()> {
        let managers = self.builder().model().managers();
        let Some((first, rest)) = managers.split_first() else {
            return self
                .submit_step(self.builder().put_managers(&[])?, false)
                .await;
        };

        self.submit_step(self.builder().put_managers(std::slice::from_ref(first))?, false)
            .await?;
        self.inner.manager_list_created.store(true, Ordering::SeqCst);

        for manager in rest {
            let request = self.builder().add_backup_manager(&manager.id, true)?;
            self.inner.queue.enqueue(request).await?;
            self.inner.shutdown.sleep(MANAGER_ADD_PAUSE).await?;
        }
        Ok(())
    }

    async fn mark_initialized(&self) {
        self.inner.flags.set_initialized(true);
        let resource = self.resources().configuration();
        match self.inner.client.get_with_version(&resource).await {
            Ok(fetched) => {
                self.inner.tracker.record_fetch(fetched.body, fetched.etag).await;
                info!("Client initialized, version token fetched");
            }
            Err(e) => warn!(?e, "Client initialized without a version token"),
        }
    }

    async fn submit_step(&self, request: Request, recovering: bool) -> SyncResult<()> {
        let request = if recovering {
            request.with_remediation(Remediation::DropSilently)
        } else {
            request
        };
        self.inner.queue.enqueue_and_wait(request).await
    }

    // -------------------------------------------------------------------------
    // Resource checks
    // -------------------------------------------------------------------------

    /// One GET. `configurations` answering NotFound means the mediator is
    /// not ready, which is an error rather than absence.
    async fn probe(&self, resource: &str) -> Result<bool, MediatorError> {
        match self.inner.client.get(resource).await {
            Ok(_) => Ok(true),
            Err(e) if e.is_not_found() && resource != self.resources().configurations() => {
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    /// True if `resource` exists.
    ///
    /// A missing resource or a failed check is retried with doubling delay
    /// while `attempts` lasts. At startup checks go on until it is found.
    pub async fn exists(
        &self,
        resource: &str,
        attempts: RetryBudget,
        startup: bool,
    ) -> SyncResult<bool> {
        let mut attempts = if startup {
            RetryBudget::Indefinite
        } else {
            attempts
        };
        let mut backoff = self.inner.settings.backoff();

        loop {
            match self.probe(resource).await {
                Ok(true) => return Ok(true),
                Ok(false) => debug!(resource, "Resource not found"),
                Err(e) => info!(resource, ?e, "Resource check failed"),
            }
            if !attempts.try_consume() {
                debug!(resource, "Resource not found, giving up");
                return Ok(false);
            }
            let delay = backoff
                .next_backoff()
                .unwrap_or_else(|| self.inner.settings.token_unavailable_delay());
            self.inner.shutdown.sleep(delay).await?;
        }
    }

    /// Checks for the schema until the mediator gives an answer.
    async fn schema_exists(&self) -> SyncResult<bool> {
        let resource = self.resources().schema();
        let mut backoff = self.inner.settings.backoff();
        loop {
            match self.probe(&resource).await {
                Ok(found) => return Ok(found),
                Err(e) => {
                    info!(?e, "Schema check failed");
                    let delay = backoff
                        .next_backoff()
                        .unwrap_or_else(|| self.inner.settings.token_unavailable_delay());
                    self.inner.shutdown.sleep(delay).await?;
                }
            }
        }
    }

    // -------------------------------------------------------------------------
    // Access roles and subscription
    // -------------------------------------------------------------------------

    /// Adds the schema's access roles that the access-control document lacks.
    pub async fn ensure_access_roles(&self, attempts: RetryBudget, startup: bool) -> SyncResult<()> {
        let resource = self.resources().access_control();
        if !self.exists(&resource, attempts, startup).await? {
            warn!("Access-control document not found, roles not registered");
            return Ok(());
        }

        let document = match self.inner.client.get(&resource).await {
            Ok(document) => strip_whitespace(&document.to_string()),
            Err(e) => {
                warn!(?e, "Access-control document could not be read");
                return Ok(());
            }
        };

        let schema_name = self.resources().schema_name();
        for role in AccessRole::ALL {
            if document.contains(&role.marker(schema_name)) {
                debug!(role = %role.name(schema_name), "Access role present");
                continue;
            }
            info!(role = %role.name(schema_name), "Adding access role");
            self.inner
                .queue
                .enqueue(self.builder().add_access_role(role))
                .await?;
        }
        Ok(())
    }

    /// Deletes the subscription if present, then creates it.
    pub async fn resubscribe(&self, attempts: RetryBudget, startup: bool) -> SyncResult<()> {
        let resource = self.resources().subscription();
        if self.probe(&resource).await.unwrap_or(false) {
            info!("Deleting existing subscription");
            self.inner
                .queue
                .enqueue(self.builder().delete_subscription(attempts, startup))
                .await?;
        }
        info!("Subscribing to configuration updates");
        self.inner
            .queue
            .enqueue(self.builder().subscribe(attempts, startup))
            .await
    }

    // -------------------------------------------------------------------------
    // Recovery
    // -------------------------------------------------------------------------

    /// Runs one recovery action. Requests issued here never recover again.
    pub async fn recover(&self, recovery: Recovery) -> SyncResult<()> {
        info!(?recovery, "Running recovery");
        match recovery {
            Recovery::RecreateConfiguration => {
                self.push_configuration(Population::Bulk, true).await
            }
            Recovery::RecreateEmptyConfiguration => {
                self.delete_configuration(true).await?;
                self.upload_schema(true).await?;
                self.submit_step(self.builder().create_empty_configuration(), true)
                    .await
            }
            Recovery::UploadSchema => self.submit_step(self.builder().upload_schema(), true).await,
            Recovery::DeleteSchema => {
                self.delete_configuration(true).await?;
                self.submit_step(self.builder().delete_schema(), true).await
            }
            Recovery::Resubscribe { attempts, startup } => {
                self.retry_subscription(attempts, startup).await
            }
        }
    }

    async fn retry_subscription(&self, attempts: RetryBudget, startup: bool) -> SyncResult<()> {
        if attempts.is_exhausted() {
            error!(startup, "Subscription failed, no attempts left");
            return Ok(());
        }
        let configurations = self.resources().configurations();
        if !self.exists(&configurations, attempts, startup).await? {
            error!("Mediator unavailable, subscription abandoned");
            return Ok(());
        }
        self.resubscribe(attempts.decremented(), startup).await?;
        self.inner
            .shutdown
            .sleep(self.inner.settings.reachability_delay())
            .await
    }

    async fn run_recoveries(
        self,
        mut recovery_rx: mpsc::UnboundedReceiver<Recovery>,
        mut stop_rx: watch::Receiver<bool>,
    ) {
        info!("Recovery worker starting");
        loop {
            tokio::select! {
                Some(recovery) = recovery_rx.recv() => {
                    if let Err(e) = self.recover(recovery).await {
                        error!(?e, "Recovery failed");
                    }
                }

                _ = stop_rx.changed() => {
                    break;
                }
            }
        }
        info!("Recovery worker stopped");
    }

    // -------------------------------------------------------------------------
    // Subscription lease
    // -------------------------------------------------------------------------

    /// Starts the periodic lease check.
    pub fn start_lease_renewal(&self) {
        let handle = tokio::spawn(
            self.clone()
                .run_lease_renewal(self.inner.shutdown_tx.subscribe()),
        );
        self.track(handle);
    }

    async fn run_lease_renewal(self, mut stop_rx: watch::Receiver<bool>) {
        let period = self.inner.subscription.renewal_interval();
        info!(?period, "Lease renewal starting");

        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.validate_lease().await {
                        warn!(?e, "Lease validation failed");
                    }
                }

                _ = stop_rx.changed() => {
                    break;
                }
            }
        }
        info!("Lease renewal stopped");
    }

    /// Recreates a missing subscription or renews one whose lease runs low.
    pub async fn validate_lease(&self) -> SyncResult<()> {
        let flags = &self.inner.flags;
        if !flags.is_enabled() || !flags.is_initialized() || !flags.subscription_updates_enabled() {
            debug!("Lease validation skipped");
            return Ok(());
        }

        let configuration = self.resources().configuration();
        if !self.probe(&configuration).await.unwrap_or(false) {
            warn!("Configuration not found, lease not validated");
            return Ok(());
        }

        let subscription = match self.inner.client.get(&self.resources().subscription()).await {
            Ok(subscription) => subscription,
            Err(e) if e.is_not_found() => {
                warn!("Subscription not found, subscribing");
                return self.inner.queue.enqueue(self.builder().subscribe_once()).await;
            }
            Err(e) => return Err(e.into()),
        };

        let threshold = self.inner.subscription.renewal_threshold_secs;
        match lease_seconds(&subscription) {
            Some(lease) if lease >= threshold => {
                debug!(lease, "Subscription lease is valid");
                Ok(())
            }
            lease => {
                info!(?lease, threshold, "Subscription lease running out, renewing");
                self.inner
                    .queue
                    .enqueue(self.builder().renew_subscription())
                    .await
            }
        }
    }

    // -------------------------------------------------------------------------
    // Domain events
    // -------------------------------------------------------------------------

    async fn submit<F>(&self, build: F) -> SyncResult<()>
    where
        F: FnOnce(&RequestBuilder) -> SyncResult<Request>,
    {
        if !self.inner.flags.is_enabled() {
            debug!("Sync is disabled, event ignored");
            return Ok(());
        }
        let request = build(&self.inner.builder)?;
        self.inner.queue.enqueue(request).await
    }

    async fn submit_and_wait<F>(&self, build: F) -> SyncResult<()>
    where
        F: FnOnce(&RequestBuilder) -> SyncResult<Request>,
    {
        if !self.inner.flags.is_enabled() {
            debug!("Sync is disabled, event ignored");
            return Ok(());
        }
        let request = build(&self.inner.builder)?;
        self.inner.queue.enqueue_and_wait(request).await
    }

    async fn remote_has_managers(&self) -> bool {
        self.inner
            .tracker
            .parsed_document()
            .await
            .is_some_and(|doc| doc.has_managers())
    }

    /// Appends a backup manager. The first one creates the list unless the
    /// mediator already holds managers.
    pub async fn add_backup_manager(&self, manager_id: &str) -> SyncResult<()> {
        if !self.inner.flags.is_enabled() {
            debug!("Sync is disabled, event ignored");
            return Ok(());
        }
        let list_exists = self.remote_has_managers().await
            || self.inner.manager_list_created.load(Ordering::SeqCst);
        let request = self.inner.builder.add_backup_manager(manager_id, list_exists)?;
        self.inner.queue.enqueue(request).await?;
        self.inner.manager_list_created.store(true, Ordering::SeqCst);
        Ok(())
    }

    pub async fn update_backup_manager(&self, manager_id: &str) -> SyncResult<()> {
        self.submit(|b| b.update_backup_manager(manager_id)).await
    }

    pub async fn add_backup(&self, manager_id: &str, backup_id: &str) -> SyncResult<()> {
        self.submit(|b| b.add_backup(manager_id, backup_id)).await
    }

    pub async fn update_backup(&self, manager_id: &str, backup_id: &str) -> SyncResult<()> {
        self.submit(|b| b.update_backup(manager_id, backup_id)).await
    }

    /// Like [`Self::update_backup`], returning once the patch was processed.
    pub async fn update_backup_and_wait(&self, manager_id: &str, backup_id: &str) -> SyncResult<()> {
        self.submit_and_wait(|b| b.update_backup(manager_id, backup_id))
            .await
    }

    pub async fn delete_backup(&self, manager_id: &str, backup_index: usize) -> SyncResult<()> {
        self.submit(|b| b.delete_backup(manager_id, backup_index))
            .await
    }

    pub async fn delete_backup_and_wait(&self, manager_id: &str, backup_index: usize) -> SyncResult<()> {
        self.submit_and_wait(|b| b.delete_backup(manager_id, backup_index))
            .await
    }

    pub async fn add_housekeeping(&self, manager_id: &str) -> SyncResult<()> {
        self.submit(|b| b.add_housekeeping(manager_id)).await
    }

    pub async fn update_housekeeping(&self, manager_id: &str) -> SyncResult<()> {
        self.submit(|b| b.update_housekeeping(manager_id)).await
    }

    pub async fn add_scheduler(&self, manager_id: &str) -> SyncResult<()> {
        self.submit(|b| b.add_scheduler(manager_id)).await
    }

    pub async fn update_scheduler(&self, manager_id: &str) -> SyncResult<()> {
        self.submit(|b| b.update_scheduler(manager_id)).await
    }

    pub async fn add_periodic_event(&self, manager_id: &str, event_id: &str) -> SyncResult<()> {
        self.submit(|b| b.add_periodic_event(manager_id, event_id))
            .await
    }

    pub async fn update_periodic_event(&self, manager_id: &str, event_id: &str) -> SyncResult<()> {
        self.submit(|b| b.update_periodic_event(manager_id, event_id))
            .await
    }

    pub async fn delete_periodic_event(&self, manager_id: &str, event_index: usize) -> SyncResult<()> {
        self.submit(|b| b.delete_periodic_event(manager_id, event_index))
            .await
    }

    /// Publishes a progress report.
    ///
    /// The first report for a list creates it. Later reports replace
    /// position 0 and are skipped when identical to the last one submitted
    /// for the same scope.
    pub async fn report_progress(
        &self,
        manager_id: &str,
        report: &ProgressReport,
        backup_name: Option<&str>,
        scheduled: bool,
    ) -> SyncResult<()> {
        if !self.inner.flags.is_enabled() {
            debug!("Sync is disabled, progress report ignored");
            return Ok(());
        }

        let scope = if report.action_name.reports_under_backup() {
            ProgressScope::Backup {
                manager: manager_id.to_string(),
                backup: backup_name.unwrap_or_default().to_string(),
            }
        } else {
            ProgressScope::Manager(manager_id.to_string())
        };

        let builder = self.builder();
        let paths = builder.progress_paths(manager_id, report, backup_name, scheduled)?;
        let Some(list) = paths.first() else {
            return Ok(());
        };

        let mut ledger = self.inner.progress.lock().await;
        let list_exists = ledger.lists.contains(list) || self.remote_contains(list).await;
        if list_exists && ledger.last.get(&scope) == Some(report) {
            debug!(action_id = %report.action_id, "Progress report unchanged, skipped");
            return Ok(());
        }

        let requests =
            builder.progress_reports(manager_id, report, backup_name, scheduled, !list_exists)?;
        for request in requests {
            self.inner.queue.enqueue(request).await?;
        }

        ledger.lists.insert(list.clone());
        ledger.last.insert(scope, report.clone());
        Ok(())
    }

    /// True when the last fetched document holds the local `path`.
    async fn remote_contains(&self, path: &str) -> bool {
        let Some(document) = self.inner.tracker.parsed_document().await else {
            return false;
        };
        let model = self.builder().model();
        let translator = IndexTranslator::new(model.as_ref(), Some(&document));
        translator
            .to_remote_path(path)
            .is_some_and(|remote| document.contains_path(&remote))
    }

    // -------------------------------------------------------------------------
    // Notifications and shutdown
    // -------------------------------------------------------------------------

    pub async fn handle_notification(&self, notification: Notification) -> SyncResult<IntakeOutcome> {
        self.inner.inbound.handle(notification).await
    }

    /// Stops the queue consumer and the background tasks.
    pub async fn shutdown(&self) {
        info!("Sync orchestrator shutting down");
        self.inner.shutdown_tx.send_replace(true);
        self.inner.queue.stop_processing().await;

        let tasks = self
            .inner
            .tasks
            .lock()
            .map(|mut tasks| std::mem::take(&mut *tasks))
            .unwrap_or_default();
        for task in tasks {
            if let Err(e) = task.await {
                error!(?e, "Background task ended abnormally");
            }
        }
        info!("Sync orchestrator stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SyncError;
    use crate::testing::{Method, ScriptedClient};
    use brm_core::{
        ActionName, ActionResult, ActionState, Backup, BackupManager, BackupStatus, CreationType,
        StaticModel,
    };
    use chrono::Utc;
    use serde_json::{json, Value};

    const CONFIG: &str = "configurations/backup-restore";
    const ACM: &str = "configurations/ietf-netconf-acm";
    const SCHEMA: &str = "schemas/backup-restore";
    const SUBSCRIPTION: &str = "subscriptions/backup-restore";

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

    fn remote(ids: &[&str]) -> Value {
        let managers: Vec<Value> = ids.iter().map(|id| json!({ "id": id })).collect();
        json!({ "name": "backup-restore", "data": { "backup-restore:brm": { "backup-manager": managers } } })
    }

    fn acm(roles: &[&str]) -> Value {
        let rules: Vec<Value> = roles.iter().map(|r| json!({ "name": r })).collect();
        json!({ "data": { "ietf-netconf-acm:nacm": { "rule-list": rules } } })
    }

    fn orchestrator(client: Arc<ScriptedClient>, managers: Vec<BackupManager>) -> SyncOrchestrator {
        SyncOrchestrator::new(
            SyncConfig::default(),
            client,
            Arc::new(StaticModel::new(managers)),
        )
        .unwrap()
    }

    fn report(percentage: u8) -> ProgressReport {
        let started = Utc::now();
        ProgressReport {
            action_id: "7".into(),
            action_name: ActionName::CreateBackup,
            progress_percentage: percentage,
            result: ActionResult::NotAvailable,
            state: ActionState::Running,
            result_info: String::new(),
            additional_info: vec![],
            time_action_started: started,
            time_action_completed: None,
            time_of_last_status_update: started,
        }
    }

    /// Lets the queue run until `done` holds or a generous deadline passes.
    async fn settle(client: &ScriptedClient, done: impl Fn(&ScriptedClient) -> bool) {
        for _ in 0..600 {
            if done(client) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        panic!("queue did not settle");
    }

    fn writes(client: &ScriptedClient) -> Vec<(Method, String)> {
        client
            .calls()
            .into_iter()
            .filter(|c| c.method != Method::Get)
            .map(|c| (c.method, c.resource))
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_initialize_runs_startup_sequence_in_order() {
        let client = Arc::new(ScriptedClient::new());
        client.set_document("configurations", json!([]), None);
        client.set_document(CONFIG, remote(&["DEFAULT"]), Some("e1"));
        client.set_document(SCHEMA, json!({ "jsonSchema": { "version": "1.0.0" } }), None);
        client.set_document(ACM, acm(&["backup-restore-1-system-admin"]), Some("n1"));
        client.set_document(SUBSCRIPTION, json!({ "leaseSeconds": 10 }), None);

        let orchestrator = orchestrator(client.clone(), vec![manager("DEFAULT", &[])]);
        orchestrator.initialize().await.unwrap();
        settle(&client, |c| !c.calls_to(Method::Post, "subscriptions").is_empty()).await;

        assert_eq!(
            writes(&client),
            vec![
                (Method::Delete, CONFIG.to_string()),
                (Method::Post, "configurations".to_string()),
                (Method::Delete, SCHEMA.to_string()),
                (Method::Post, "schemas".to_string()),
                (Method::Put, CONFIG.to_string()),
                (Method::Patch, ACM.to_string()),
                (Method::Delete, SUBSCRIPTION.to_string()),
                (Method::Post, "subscriptions".to_string()),
            ]
        );

        let role = client.calls_to(Method::Patch, ACM)[0].body.clone().unwrap();
        assert_eq!(role["baseETag"], "n1");
        assert_eq!(role["patch"][0]["path"], "/ietf-netconf-acm:nacm/rule-list/2");

        let status = orchestrator.status().await;
        assert!(status.initialized);
        assert_eq!(status.version_token.as_deref(), Some("e1"));
        orchestrator.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_current_schema_is_kept() {
        let client = Arc::new(ScriptedClient::new());
        client.set_document("configurations", json!([]), None);
        client.set_document(SCHEMA, json!({ "jsonSchema": { "version": "1.4.0" } }), None);
        client.set_document(
            ACM,
            acm(&["backup-restore-1-system-admin", "backup-restore-2-system-read-only"]),
            None,
        );

        let orchestrator = orchestrator(client.clone(), vec![]);
        orchestrator.initialize().await.unwrap();
        settle(&client, |c| !c.calls_to(Method::Post, "subscriptions").is_empty()).await;

        let writes = writes(&client);
        assert!(!writes.contains(&(Method::Delete, SCHEMA.to_string())));
        assert!(!writes.contains(&(Method::Post, "schemas".to_string())));
        assert!(!writes.contains(&(Method::Delete, CONFIG.to_string())));
        assert!(client.calls_to(Method::Patch, ACM).is_empty());
        orchestrator.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_incremental_population_adds_managers_one_by_one() {
        let client = Arc::new(ScriptedClient::new());
        client.set_document("configurations", json!([]), None);
        client.set_document(CONFIG, remote(&["A"]), Some("e1"));

        let managers = vec![manager("A", &[]), manager("B", &[]), manager("C", &[])];
        let orchestrator = orchestrator(client.clone(), managers);
        orchestrator.prepare(false).await.unwrap();
        settle(&client, |c| c.calls_to(Method::Patch, CONFIG).len() == 2).await;

        let put = client.calls_to(Method::Put, CONFIG)[0].body.clone().unwrap();
        let pushed = &put["data"]["backup-restore:brm"]["backup-manager"];
        assert_eq!(pushed.as_array().unwrap().len(), 1);
        assert_eq!(pushed[0]["id"], "A");

        let adds = client.calls_to(Method::Patch, CONFIG);
        for (add, id) in adds.iter().zip(["B", "C"]) {
            let body = add.body.as_ref().unwrap();
            assert_eq!(body["patch"][0]["path"], "/backup-restore:brm/backup-manager/-");
            assert_eq!(body["patch"][0]["value"]["id"], id);
        }
        orchestrator.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_until_reachable() {
        let client = Arc::new(ScriptedClient::new());
        client.set_document("configurations", json!([]), None);
        for _ in 0..2 {
            client.script(
                Method::Get,
                "configurations",
                Err(MediatorError::Connectivity("refused".into())),
            );
        }
        let orchestrator = orchestrator(client.clone(), vec![]);
        orchestrator.wait_until_reachable().await.unwrap();
        assert_eq!(client.calls_to(Method::Get, "configurations").len(), 3);

        client.script(
            Method::Get,
            "configurations",
            Err(MediatorError::Status { status: 500, message: String::new() }),
        );
        assert!(orchestrator.wait_until_reachable().await.is_err());

        client.remove_document("configurations");
        assert!(matches!(
            orchestrator.wait_until_reachable().await,
            Err(SyncError::Mediator(MediatorError::NotFound { .. }))
        ));
        orchestrator.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_exists_retries_within_budget() {
        let client = Arc::new(ScriptedClient::new());
        let orchestrator = orchestrator(client.clone(), vec![]);

        assert!(!orchestrator.exists(SCHEMA, RetryBudget::Remaining(2), false).await.unwrap());
        assert_eq!(client.calls_to(Method::Get, SCHEMA).len(), 3);

        client.set_document(SCHEMA, json!({}), None);
        assert!(orchestrator.exists(SCHEMA, RetryBudget::Remaining(0), false).await.unwrap());

        // Not found on the root means "not ready", never "absent".
        assert!(!orchestrator
            .exists("configurations", RetryBudget::Remaining(0), false)
            .await
            .unwrap());
        orchestrator.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_lease_validation() {
        let client = Arc::new(ScriptedClient::new());
        client.set_document(CONFIG, remote(&[]), Some("e1"));
        client.set_document(SUBSCRIPTION, json!({ "leaseSeconds": 1_000_000 }), None);
        let orchestrator = orchestrator(client.clone(), vec![]);

        orchestrator.validate_lease().await.unwrap();
        assert!(client.calls().is_empty(), "not initialized yet");

        orchestrator.flags().set_initialized(true);
        orchestrator.validate_lease().await.unwrap();
        assert!(writes(&client).is_empty());

        client.set_document(SUBSCRIPTION, json!({ "leaseSeconds": 60 }), None);
        orchestrator.validate_lease().await.unwrap();
        settle(&client, |c| !c.calls_to(Method::Put, SUBSCRIPTION).is_empty()).await;

        client.remove_document(SUBSCRIPTION);
        orchestrator.validate_lease().await.unwrap();
        settle(&client, |c| !c.calls_to(Method::Post, "subscriptions").is_empty()).await;

        orchestrator.flags().set_subscription_updates(false);
        let before = client.calls().len();
        orchestrator.validate_lease().await.unwrap();
        assert_eq!(client.calls().len(), before);
        orchestrator.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_progress_reports_are_deduplicated() {
        let client = Arc::new(ScriptedClient::new());
        client.set_document(CONFIG, remote(&["DEFAULT"]), Some("e1"));
        let orchestrator = orchestrator(client.clone(), vec![manager("DEFAULT", &[])]);
        orchestrator.flags().set_initialized(true);

        let first = report(10);
        orchestrator.report_progress("DEFAULT", &first, None, false).await.unwrap();
        orchestrator.report_progress("DEFAULT", &first, None, false).await.unwrap();
        let mut next = first.clone();
        next.progress_percentage = 50;
        orchestrator.report_progress("DEFAULT", &next, None, false).await.unwrap();

        settle(&client, |c| c.calls_to(Method::Patch, CONFIG).len() == 2).await;
        tokio::time::sleep(Duration::from_secs(5)).await;

        let patches = client.calls_to(Method::Patch, CONFIG);
        assert_eq!(patches.len(), 2);
        let create = patches[0].body.as_ref().unwrap();
        assert_eq!(create["patch"][0]["op"], "add");
        assert_eq!(create["patch"][0]["path"], "/backup-restore:brm/backup-manager/0/progress-report");
        let update = patches[1].body.as_ref().unwrap();
        assert_eq!(update["patch"][0]["op"], "replace");
        assert!(update["patch"][0]["path"]
            .as_str()
            .unwrap()
            .starts_with("/backup-restore:brm/backup-manager/0/progress-report/0/"));
        orchestrator.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_progress_ledger_untouched_when_enqueue_fails() {
        let client = Arc::new(ScriptedClient::new());
        client.set_document(CONFIG, remote(&["DEFAULT"]), Some("e1"));
        let orchestrator = orchestrator(client.clone(), vec![manager("DEFAULT", &[])]);
        orchestrator.shutdown().await;

        let result = orchestrator.report_progress("DEFAULT", &report(10), None, false).await;

        assert!(matches!(result, Err(SyncError::ShuttingDown)));
        let ledger = orchestrator.inner.progress.lock().await;
        assert!(ledger.last.is_empty());
        assert!(ledger.lists.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_manager_add_keeps_list_creation_pending() {
        let client = Arc::new(ScriptedClient::new());
        client.set_document(CONFIG, remote(&[]), Some("e1"));
        let orchestrator = orchestrator(
            client.clone(),
            vec![manager("DEFAULT", &[]), manager("SECOND", &[])],
        );
        orchestrator.flags().set_initialized(true);

        assert!(orchestrator.add_backup_manager("ghost").await.is_err());
        orchestrator.add_backup_manager("DEFAULT").await.unwrap();
        orchestrator.add_backup_manager("SECOND").await.unwrap();
        settle(&client, |c| c.calls_to(Method::Patch, CONFIG).len() == 2).await;

        let patches = client.calls_to(Method::Patch, CONFIG);
        let first = &patches[0].body.as_ref().unwrap()["patch"][0];
        assert_eq!(first["op"], "add");
        assert_eq!(first["path"], "/backup-restore:brm/backup-manager");
        assert!(first["value"].is_array());
        let second = &patches[1].body.as_ref().unwrap()["patch"][0];
        assert_eq!(second["path"], "/backup-restore:brm/backup-manager/-");
        orchestrator.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_disabled_sync_ignores_domain_events() {
        let client = Arc::new(ScriptedClient::new());
        let mut config = SyncConfig::default();
        config.sync.enabled = false;
        let orchestrator = SyncOrchestrator::new(
            config,
            client.clone(),
            Arc::new(StaticModel::new(vec![manager("DEFAULT", &["b1"])])),
        )
        .unwrap();

        orchestrator.initialize().await.unwrap();
        orchestrator.add_backup("DEFAULT", "b1").await.unwrap();
        orchestrator.update_backup_and_wait("DEFAULT", "b1").await.unwrap();
        orchestrator.report_progress("DEFAULT", &report(5), None, false).await.unwrap();

        assert!(client.calls().is_empty());
        assert_eq!(orchestrator.status().await.pending_requests, 0);
        orchestrator.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_entities_are_reported() {
        let client = Arc::new(ScriptedClient::new());
        let orchestrator = orchestrator(client.clone(), vec![manager("DEFAULT", &[])]);

        assert!(orchestrator.add_backup("DEFAULT", "missing").await.is_err());
        assert!(orchestrator.update_scheduler("ghost").await.is_err());
        orchestrator.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_resubscribe_recovery() {
        let client = Arc::new(ScriptedClient::new());
        client.set_document("configurations", json!([]), None);
        let orchestrator = orchestrator(client.clone(), vec![]);

        orchestrator
            .recover(Recovery::Resubscribe {
                attempts: RetryBudget::Remaining(0),
                startup: false,
            })
            .await
            .unwrap();
        assert!(writes(&client).is_empty());

        orchestrator
            .recover(Recovery::Resubscribe {
                attempts: RetryBudget::Remaining(2),
                startup: false,
            })
            .await
            .unwrap();
        settle(&client, |c| !c.calls_to(Method::Post, "subscriptions").is_empty()).await;
        orchestrator.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_empty_configuration_is_recovered() {
        let client = Arc::new(ScriptedClient::new());
        client.set_document("configurations", json!([]), None);
        client.script(
            Method::Post,
            "configurations",
            Err(MediatorError::Status { status: 500, message: "boom".into() }),
        );
        let orchestrator = orchestrator(client.clone(), vec![]);

        orchestrator
            .submit_step(orchestrator.builder().create_empty_configuration(), false)
            .await
            .unwrap();
        settle(&client, |c| c.calls_to(Method::Post, "configurations").len() == 2).await;
        assert_eq!(client.calls_to(Method::Post, "schemas").len(), 1);
        orchestrator.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_interrupts_startup() {
        let client = Arc::new(ScriptedClient::new());
        client.set_document("configurations", json!([]), None);
        for _ in 0..100 {
            client.script(
                Method::Get,
                "configurations",
                Err(MediatorError::Connectivity("refused".into())),
            );
        }
        let orchestrator = orchestrator(client.clone(), vec![]);

        let startup = {
            let orchestrator = orchestrator.clone();
            tokio::spawn(async move { orchestrator.initialize().await })
        };
        tokio::time::sleep(Duration::from_secs(3)).await;
        orchestrator.shutdown().await;

        assert!(matches!(startup.await.unwrap(), Err(SyncError::Interrupted)));
    }
}
