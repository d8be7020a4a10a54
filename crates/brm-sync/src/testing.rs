//! Scripted in-memory mediator for tests.
//!
//! Every call is recorded. Answers come from per-(method, resource) scripts,
//! then from stored documents for reads, then default to success.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use brm_core::ConfigurationPatch;
use serde_json::Value;
use tokio::sync::watch;
use tokio::time::Instant;

use crate::client::{MediatorClient, Versioned};
use crate::error::MediatorError;
use crate::queue::Shutdown;

/// A shutdown signal that stays untriggered while the sender is alive.
pub fn shutdown_signal() -> (watch::Sender<bool>, Shutdown) {
    let (tx, rx) = watch::channel(false);
    (tx, Shutdown::new(rx))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

#[derive(Debug, Clone)]
pub struct Call {
    pub method: Method,
    pub resource: String,
    pub body: Option<Value>,
    pub at: Instant,
}

type Script = VecDeque<Result<(), MediatorError>>;

#[derive(Default)]
pub struct ScriptedClient {
    calls: Mutex<Vec<Call>>,
    scripts: Mutex<HashMap<(Method, String), Script>>,
    documents: Mutex<HashMap<String, (Value, Option<String>)>>,
    read_delays: Mutex<HashMap<String, VecDeque<Duration>>>,
    refreshes: AtomicUsize,
}

impl ScriptedClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues one answer for the next call of `method` on `resource`.
    pub fn script(&self, method: Method, resource: &str, answer: Result<(), MediatorError>) {
        self.scripts
            .lock()
            .unwrap()
            .entry((method, resource.to_string()))
            .or_default()
            .push_back(answer);
    }

    /// Makes `resource` readable with the given body and token.
    pub fn set_document(&self, resource: &str, body: Value, etag: Option<&str>) {
        self.documents
            .lock()
            .unwrap()
            .insert(resource.to_string(), (body, etag.map(str::to_string)));
    }

    /// Makes the next read of `resource` take `delay` before answering.
    pub fn delay_next_read(&self, resource: &str, delay: Duration) {
        self.read_delays
            .lock()
            .unwrap()
            .entry(resource.to_string())
            .or_default()
            .push_back(delay);
    }

    pub fn remove_document(&self, resource: &str) {
        self.documents.lock().unwrap().remove(resource);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_to(&self, method: Method, resource: &str) -> Vec<Call> {
        self.calls()
            .into_iter()
            .filter(|c| c.method == method && c.resource == resource)
            .collect()
    }

    pub fn refreshes(&self) -> usize {
        self.refreshes.load(Ordering::SeqCst)
    }

    fn record(&self, method: Method, resource: &str, body: Option<Value>) -> Result<(), MediatorError> {
        self.calls.lock().unwrap().push(Call {
            method,
            resource: resource.to_string(),
            body,
            at: Instant::now(),
        });
        self.scripts
            .lock()
            .unwrap()
            .get_mut(&(method, resource.to_string()))
            .and_then(VecDeque::pop_front)
            .unwrap_or(Ok(()))
    }

    async fn read(&self, resource: &str) -> Result<(Value, Option<String>), MediatorError> {
        let delay = self
            .read_delays
            .lock()
            .unwrap()
            .get_mut(resource)
            .and_then(VecDeque::pop_front);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.record(Method::Get, resource, None)?;
        self.documents
            .lock()
            .unwrap()
            .get(resource)
            .cloned()
            .ok_or_else(|| MediatorError::NotFound {
                resource: resource.to_string(),
            })
    }
}

#[async_trait]
impl MediatorClient for ScriptedClient {
    async fn get(&self, resource: &str) -> Result<Value, MediatorError> {
        self.read(resource).await.map(|(body, _)| body)
    }

    async fn get_with_version(&self, resource: &str) -> Result<Versioned, MediatorError> {
        self.read(resource).await.map(|(body, etag)| Versioned {
            body: body.to_string(),
            etag,
        })
    }

    async fn post(&self, resource: &str, body: &Value) -> Result<(), MediatorError> {
        self.record(Method::Post, resource, Some(body.clone()))
    }

    async fn put(&self, resource: &str, body: &Value) -> Result<(), MediatorError> {
        self.record(Method::Put, resource, Some(body.clone()))
    }

    async fn patch(&self, resource: &str, patch: &ConfigurationPatch) -> Result<(), MediatorError> {
        self.record(Method::Patch, resource, Some(patch.to_body()))
    }

    async fn delete(&self, resource: &str) -> Result<(), MediatorError> {
        self.record(Method::Delete, resource, None)
    }

    async fn refresh_credentials(&self) -> Result<(), MediatorError> {
        self.refreshes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
