//! # Request Queue
//!
//! Single-consumer, multi-producer ordered queue. One item is processed at a
//! time, in submission order, except where a processor asks for promotion.
//!
//! ## Queue Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         RequestQueue<T>                                 │
//! │                                                                         │
//! │  producers (any task)                                                   │
//! │    enqueue(x)            ──► push_back ──┐                              │
//! │    enqueue_and_wait(x)   ──► push_back ──┤ + oneshot waiter             │
//! │    insert_at_front(pred) ──► stable partition: matching first           │
//! │                                          │                              │
//! │                              ┌───────────▼───────────┐                  │
//! │                              │ VecDeque<Entry<T>>    │                  │
//! │                              └───────────┬───────────┘                  │
//! │                                          │ pop_front                    │
//! │  consumer (one spawned task)             ▼                              │
//! │    Processor::process(x) ──► Disposition                                │
//! │      Done            ──► waiter released                                │
//! │      Promote(pred)   ──► waiter released, matching moved to front       │
//! │      Requeue{x,pred} ──► x back at front (waiter kept), matching ahead  │
//! │      Abandon         ──► waiter released, nothing else                  │
//! │    panic             ──► Processor::on_panic(x) decides the disposition │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Shutdown
//! `stop_processing` flips a watch flag. The consumer finishes (or abandons,
//! via an interrupted [`Shutdown::sleep`]) the in-flight item, drops what is
//! still queued, and exits. Pending `enqueue_and_wait` callers then get
//! [`SyncError::ShuttingDown`].

use std::collections::VecDeque;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::FutureExt;
use tokio::sync::{oneshot, watch, Mutex, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::error::{SyncError, SyncResult};

// =============================================================================
// Shutdown Signal
// =============================================================================

/// Cooperative shutdown signal handed to the processor.
#[derive(Clone)]
pub struct Shutdown {
    rx: watch::Receiver<bool>,
}

impl Shutdown {
    pub(crate) fn new(rx: watch::Receiver<bool>) -> Self {
        Shutdown { rx }
    }

    pub fn is_triggered(&self) -> bool {
        *self.rx.borrow()
    }

    /// Sleeps for `duration` unless shutdown is signalled first.
    pub async fn sleep(&self, duration: Duration) -> SyncResult<()> {
        let mut rx = self.rx.clone();
        if *rx.borrow_and_update() {
            return Err(SyncError::Interrupted);
        }
        let stopped = async move {
            loop {
                if rx.changed().await.is_err() || *rx.borrow() {
                    return;
                }
            }
        };
        tokio::select! {
            _ = tokio::time::sleep(duration) => Ok(()),
            _ = stopped => Err(SyncError::Interrupted),
        }
    }
}

// =============================================================================
// Processor
// =============================================================================

/// Predicate selecting queued items to promote.
pub type Promotion<T> = fn(&T) -> bool;

/// What the queue does with an item after processing.
pub enum Disposition<T> {
    Done,
    /// Done, and queued items matching the predicate move to the front.
    Promote(Promotion<T>),
    /// Put the item back at the front. Queued items matching `promote` go
    /// ahead of it.
    Requeue {
        item: T,
        promote: Option<Promotion<T>>,
    },
    /// Shutdown interrupted processing.
    Abandon,
}

#[async_trait]
pub trait Processor<T>: Send + Sync + 'static
where
    T: Send + 'static,
{
    async fn process(&self, item: T, shutdown: &Shutdown) -> Disposition<T>;

    /// Called with a copy of the item when `process` panicked.
    async fn on_panic(&self, _item: T) -> Disposition<T> {
        Disposition::Done
    }
}

// =============================================================================
// Queue
// =============================================================================

struct Entry<T> {
    item: T,
    waiter: Option<oneshot::Sender<()>>,
}

impl<T> Entry<T> {
    fn release(self) {
        if let Some(waiter) = self.waiter {
            let _ = waiter.send(());
        }
    }
}

struct Shared<T> {
    entries: Mutex<VecDeque<Entry<T>>>,
    notify: Notify,
    shutdown_tx: watch::Sender<bool>,
    worker: std::sync::Mutex<Option<JoinHandle<()>>>,
}

/// Handle to the queue. Cloning shares the same queue and consumer.
pub struct RequestQueue<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for RequestQueue<T> {
    fn clone(&self) -> Self {
        RequestQueue {
            shared: self.shared.clone(),
        }
    }
}

impl<T> RequestQueue<T>
where
    T: Clone + Send + 'static,
{
    /// Creates the queue and spawns its consumer.
    ///
    /// `poll_interval` bounds how long an idle consumer sleeps between
    /// checks for the stop flag.
    pub fn spawn<P>(processor: Arc<P>, poll_interval: Duration) -> Self
    where
        P: Processor<T>,
    {
        let (shutdown_tx, _) = watch::channel(false);
        let shared = Arc::new(Shared {
            entries: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            shutdown_tx,
            worker: std::sync::Mutex::new(None),
        });

        let handle = tokio::spawn(Self::run(shared.clone(), processor, poll_interval));
        if let Ok(mut worker) = shared.worker.lock() {
            *worker = Some(handle);
        }

        RequestQueue { shared }
    }

    /// Appends `item`. Returns as soon as it is queued.
    pub async fn enqueue(&self, item: T) -> SyncResult<()> {
        self.push(item, None).await
    }

    /// Appends `item` and waits until it has been processed.
    ///
    /// Must not be called from the consumer itself.
    pub async fn enqueue_and_wait(&self, item: T) -> SyncResult<()> {
        let (tx, rx) = oneshot::channel();
        self.push(item, Some(tx)).await?;
        rx.await.map_err(|_| SyncError::ShuttingDown)
    }

    /// Moves queued items matching `predicate` to the front, keeping their
    /// relative order. The in-flight item is not affected.
    pub async fn insert_at_front<F>(&self, predicate: F)
    where
        F: Fn(&T) -> bool,
    {
        let mut entries = self.shared.entries.lock().await;
        reorder(&mut entries, None, &predicate);
    }

    /// Number of queued (not in-flight) items.
    pub async fn len(&self) -> usize {
        self.shared.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub fn is_stopped(&self) -> bool {
        *self.shared.shutdown_tx.borrow()
    }

    /// Signals the consumer to stop and waits for it to exit.
    pub async fn stop_processing(&self) {
        info!("Stopping request queue");
        self.shared.shutdown_tx.send_replace(true);
        self.shared.notify.notify_one();

        let handle = self
            .shared
            .worker
            .lock()
            .ok()
            .and_then(|mut worker| worker.take());
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                error!(?e, "Request queue consumer ended abnormally");
            }
        }
    }

    async fn push(&self, item: T, waiter: Option<oneshot::Sender<()>>) -> SyncResult<()> {
        let mut entries = self.shared.entries.lock().await;
        if self.is_stopped() {
            return Err(SyncError::ShuttingDown);
        }
        entries.push_back(Entry { item, waiter });
        debug!(pending = entries.len(), "Request queued");
        drop(entries);

        self.shared.notify.notify_one();
        Ok(())
    }

    async fn run<P>(shared: Arc<Shared<T>>, processor: Arc<P>, poll_interval: Duration)
    where
        P: Processor<T>,
    {
        info!("Request queue consumer starting");

        let mut stop_rx = shared.shutdown_tx.subscribe();
        let shutdown = Shutdown {
            rx: shared.shutdown_tx.subscribe(),
        };

        loop {
            if *stop_rx.borrow_and_update() {
                break;
            }

            let next = shared.entries.lock().await.pop_front();
            let Some(Entry { item, waiter }) = next else {
                tokio::select! {
                    _ = shared.notify.notified() => {}
                    _ = tokio::time::sleep(poll_interval) => {}
                    _ = stop_rx.changed() => {}
                }
                continue;
            };

            let copy = item.clone();
            let disposition = match AssertUnwindSafe(processor.process(item, &shutdown))
                .catch_unwind()
                .await
            {
                Ok(disposition) => disposition,
                Err(_) => {
                    error!("Request handler panicked");
                    processor.on_panic(copy.clone()).await
                }
            };

            match disposition {
                Disposition::Done | Disposition::Abandon => {
                    Entry { item: copy, waiter }.release();
                }
                Disposition::Promote(predicate) => {
                    let mut entries = shared.entries.lock().await;
                    reorder(&mut entries, None, &predicate);
                    drop(entries);
                    Entry { item: copy, waiter }.release();
                }
                Disposition::Requeue { item, promote } => {
                    let mut entries = shared.entries.lock().await;
                    let entry = Entry { item, waiter };
                    match promote {
                        Some(predicate) => reorder(&mut entries, Some(entry), &predicate),
                        None => entries.push_front(entry),
                    }
                    debug!(pending = entries.len(), "Request requeued at front");
                }
            }
        }

        let dropped = {
            let mut entries = shared.entries.lock().await;
            let count = entries.len();
            entries.clear();
            count
        };
        info!(dropped, "Request queue consumer stopped");
    }
}

/// Stable partition: items matching `predicate`, then `head`, then the rest.
fn reorder<T>(
    entries: &mut VecDeque<Entry<T>>,
    head: Option<Entry<T>>,
    predicate: &dyn Fn(&T) -> bool,
) {
    let (mut front, rest): (VecDeque<_>, VecDeque<_>) =
        entries.drain(..).partition(|e| predicate(&e.item));
    if !front.is_empty() {
        debug!(promoted = front.len(), "Requests promoted to front");
    }
    front.extend(head);
    front.extend(rest);
    *entries = front;
}
