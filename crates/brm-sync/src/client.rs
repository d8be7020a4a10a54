//! # Mediator REST Client
//!
//! The only component that talks HTTP.
//!
//! ## Status Mapping
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  2xx                         ──► Ok                                     │
//! │  404                         ──► MediatorError::NotFound                │
//! │  409                         ──► MediatorError::Conflict (body as text) │
//! │  other status                ──► MediatorError::Status                  │
//! │  connect / timeout / TLS     ──► MediatorError::Connectivity            │
//! │  unreadable body             ──► MediatorError::Decode                  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Resources are relative (`configurations/backup-restore`) and are joined
//! onto the configured base URL.

use std::time::Duration;

use async_trait::async_trait;
use brm_core::ConfigurationPatch;
use reqwest::header::ETAG;
use reqwest::{Method, StatusCode};
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{debug, info};
use url::Url;

use crate::config::MediatorSettings;
use crate::error::{MediatorError, SyncError, SyncResult};

/// A fetched body together with its version token.
#[derive(Debug, Clone, PartialEq)]
pub struct Versioned {
    /// Raw body as returned by the mediator.
    pub body: String,
    pub etag: Option<String>,
}

// =============================================================================
// Client Trait
// =============================================================================

#[async_trait]
pub trait MediatorClient: Send + Sync {
    async fn get(&self, resource: &str) -> Result<Value, MediatorError>;

    async fn get_with_version(&self, resource: &str) -> Result<Versioned, MediatorError>;

    async fn post(&self, resource: &str, body: &Value) -> Result<(), MediatorError>;

    async fn put(&self, resource: &str, body: &Value) -> Result<(), MediatorError>;

    async fn patch(&self, resource: &str, patch: &ConfigurationPatch) -> Result<(), MediatorError>;

    async fn delete(&self, resource: &str) -> Result<(), MediatorError>;

    /// Reloads TLS material. Clients without credentials do nothing.
    async fn refresh_credentials(&self) -> Result<(), MediatorError> {
        Ok(())
    }
}

// =============================================================================
// HTTP Implementation
// =============================================================================

pub struct HttpMediatorClient {
    base: Url,
    settings: MediatorSettings,
    client: RwLock<reqwest::Client>,
}

impl HttpMediatorClient {
    pub fn new(settings: &MediatorSettings) -> SyncResult<Self> {
        let base = settings.base_url()?;
        let client = Self::build_client(settings)?;
        info!(url = %base, "Mediator client created");
        Ok(HttpMediatorClient {
            base,
            settings: settings.clone(),
            client: RwLock::new(client),
        })
    }

    fn build_client(settings: &MediatorSettings) -> SyncResult<reqwest::Client> {
        let mut builder = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.request_timeout_secs));

        if let Some(path) = &settings.ca_cert_path {
            let pem = std::fs::read(path)?;
            let cert = reqwest::Certificate::from_pem(&pem)
                .map_err(|e| SyncError::InvalidConfig(format!("CA certificate: {e}")))?;
            builder = builder.add_root_certificate(cert);
        }

        if let (Some(cert_path), Some(key_path)) =
            (&settings.client_cert_path, &settings.client_key_path)
        {
            let mut pem = std::fs::read(cert_path)?;
            pem.extend(std::fs::read(key_path)?);
            let identity = reqwest::Identity::from_pem(&pem)
                .map_err(|e| SyncError::InvalidConfig(format!("client identity: {e}")))?;
            builder = builder.identity(identity);
        }

        builder
            .build()
            .map_err(|e| SyncError::InvalidConfig(format!("HTTP client: {e}")))
    }

    fn url(&self, resource: &str) -> Result<Url, MediatorError> {
        self.base
            .join(resource)
            .map_err(|e| MediatorError::Connectivity(format!("bad resource {resource}: {e}")))
    }

    async fn send(
        &self,
        method: Method,
        resource: &str,
        body: Option<&Value>,
    ) -> Result<reqwest::Response, MediatorError> {
        let url = self.url(resource)?;
        debug!(%method, resource, "Mediator request");

        let client = self.client.read().await.clone();
        let mut request = client.request(method, url);
        if let Some(body) = body {
            request = request.json(body);
        }
        let response = request
            .send()
            .await
            .map_err(|e| MediatorError::Connectivity(e.to_string()))?;
        check_status(resource, response).await
    }
}

async fn check_status(
    resource: &str,
    response: reqwest::Response,
) -> Result<reqwest::Response, MediatorError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let message = response.text().await.unwrap_or_default();
    Err(match status {
        StatusCode::NOT_FOUND => MediatorError::NotFound {
            resource: resource.to_string(),
        },
        StatusCode::CONFLICT => MediatorError::Conflict { message },
        other => MediatorError::Status {
            status: other.as_u16(),
            message,
        },
    })
}

#[async_trait]
impl MediatorClient for HttpMediatorClient {
    async fn get(&self, resource: &str) -> Result<Value, MediatorError> {
        let response = self.send(Method::GET, resource, None).await?;
        response
            .json()
            .await
            .map_err(|e| MediatorError::Decode(e.to_string()))
    }

    async fn get_with_version(&self, resource: &str) -> Result<Versioned, MediatorError> {
        let response = self.send(Method::GET, resource, None).await?;
        let etag = response
            .headers()
            .get(ETAG)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = response
            .text()
            .await
            .map_err(|e| MediatorError::Decode(e.to_string()))?;
        Ok(Versioned { body, etag })
    }

    async fn post(&self, resource: &str, body: &Value) -> Result<(), MediatorError> {
        self.send(Method::POST, resource, Some(body)).await.map(|_| ())
    }

    async fn put(&self, resource: &str, body: &Value) -> Result<(), MediatorError> {
        self.send(Method::PUT, resource, Some(body)).await.map(|_| ())
    }

    async fn patch(&self, resource: &str, patch: &ConfigurationPatch) -> Result<(), MediatorError> {
        let body = patch.to_body();
        self.send(Method::PATCH, resource, Some(&body)).await.map(|_| ())
    }

    async fn delete(&self, resource: &str) -> Result<(), MediatorError> {
        self.send(Method::DELETE, resource, None).await.map(|_| ())
    }

    async fn refresh_credentials(&self) -> Result<(), MediatorError> {
        let client = Self::build_client(&self.settings)
            .map_err(|e| MediatorError::Connectivity(e.to_string()))?;
        *self.client.write().await = client;
        info!("Mediator client credentials reloaded");
        Ok(())
    }
}
