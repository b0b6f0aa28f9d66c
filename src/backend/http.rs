//! REST document backend.
//!
//! Maps writes onto a conventional document API:
//!
//! | operation | request                         |
//! |-----------|---------------------------------|
//! | create    | `POST   {base}/{collection}`    |
//! | update    | `PATCH  {base}/{collection}/{id}` |
//! | delete    | `DELETE {base}/{collection}/{id}` |

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode, Url};
use serde::Deserialize;
use serde_json::{Map, Value};

use super::{Backend, BackendError};
use crate::config::BackendConfig;
use crate::error::SyncqError;

#[derive(Deserialize)]
struct Created {
    id: String,
}

/// HTTP client for a REST document API.
#[derive(Clone)]
pub struct HttpBackend {
    client: Client,
    base_url: Url,
    token: Option<String>,
}

impl HttpBackend {
    /// # Errors
    ///
    /// Returns `Config` if the base URL is invalid or the client cannot be built.
    pub fn new(base_url: &str, timeout: Duration, token: Option<String>) -> Result<Self, SyncqError> {
        let base_url = Url::parse(base_url)
            .map_err(|e| SyncqError::Config(format!("Invalid backend URL '{base_url}': {e}")))?;
        if base_url.cannot_be_a_base() {
            return Err(SyncqError::Config(format!(
                "Backend URL '{base_url}' cannot be used as a base"
            )));
        }

        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SyncqError::Config(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url,
            token,
        })
    }

    /// Build from config, reading the bearer token from the configured
    /// environment variable if it is set.
    ///
    /// # Errors
    ///
    /// Returns `Config` if the base URL is invalid.
    pub fn from_config(config: &BackendConfig) -> Result<Self, SyncqError> {
        let token = std::env::var(&config.token_env).ok().filter(|t| !t.is_empty());
        Self::new(
            &config.base_url,
            Duration::from_secs(config.timeout_secs),
            token,
        )
    }

    /// Whether the backend answers at all. Any HTTP response counts.
    pub async fn probe(&self) -> bool {
        match self.client.get(self.base_url.clone()).send().await {
            Ok(_) => true,
            Err(e) => {
                tracing::debug!(error = %e, "backend probe failed");
                false
            }
        }
    }

    pub(crate) fn url(&self, segments: &[&str]) -> Result<Url, BackendError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| BackendError::Permanent(format!("invalid base URL {}", self.base_url)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response, BackendError> {
        let request = match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        };

        let response = request.send().await.map_err(|e| {
            if e.is_builder() {
                BackendError::Permanent(format!("invalid request: {e}"))
            } else {
                BackendError::Transient(format!("request failed: {e}"))
            }
        })?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        Err(classify_status(status, &body))
    }
}

/// Classify a non-success HTTP status.
///
/// Timeouts, rate limiting and server errors are transient; every other
/// client error means the request itself is wrong and is permanent.
#[must_use]
pub fn classify_status(status: StatusCode, body: &str) -> BackendError {
    let body = body.trim();
    let message = if body.is_empty() {
        format!("HTTP {status}")
    } else {
        format!("HTTP {status}: {body}")
    };

    if status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS
        || status.is_server_error()
    {
        BackendError::Transient(message)
    } else {
        BackendError::Permanent(message)
    }
}

/// Extract the new document id from a successful create response.
fn created_id(collection: &str, body: &str) -> Option<String> {
    match serde_json::from_str::<Created>(body) {
        Ok(created) => Some(created.id),
        Err(e) => {
            tracing::warn!(collection, error = %e, "created document, but the response carried no id");
            None
        }
    }
}

#[async_trait]
impl Backend for HttpBackend {
    async fn create(
        &self,
        collection: &str,
        payload: &Map<String, Value>,
    ) -> Result<Option<String>, BackendError> {
        let url = self.url(&[collection])?;
        let response = self.send(self.client.post(url).json(payload)).await?;

        // The document exists once the status says so; a missing id only
        // loses the reference to it.
        let body = response.text().await.unwrap_or_default();
        Ok(created_id(collection, &body))
    }

    async fn update(
        &self,
        collection: &str,
        id: &str,
        payload: &Map<String, Value>,
    ) -> Result<(), BackendError> {
        let url = self.url(&[collection, id])?;
        self.send(self.client.patch(url).json(payload)).await?;
        Ok(())
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<(), BackendError> {
        let url = self.url(&[collection, id])?;
        self.send(self.client.delete(url)).await?;
        Ok(())
    }
}
