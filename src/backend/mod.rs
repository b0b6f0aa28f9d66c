//! Backend write API.
//!
//! The dispatcher only needs three calls and one bit of information about
//! each failure: whether retrying later could succeed.

mod http;
mod memory;

use async_trait::async_trait;
use serde_json::{Map, Value};
use thiserror::Error;

pub use http::{classify_status, HttpBackend};
pub use memory::{BackendCall, InMemoryBackend};

/// Failure classification for a backend call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackendError {
    /// Retrying is expected to eventually succeed (network unavailable,
    /// timeout, overload).
    #[error("{0}")]
    Transient(String),
    /// Retrying with the same payload will never succeed (validation,
    /// permissions, document not found).
    #[error("{0}")]
    Permanent(String),
}

impl BackendError {
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

/// Document write operations of the hosted backend.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Backend: Send + Sync {
    /// Create a document and return its backend-assigned id, if the
    /// backend reported one.
    async fn create(
        &self,
        collection: &str,
        payload: &Map<String, Value>,
    ) -> Result<Option<String>, BackendError>;

    /// Update fields of an existing document.
    async fn update(
        &self,
        collection: &str,
        id: &str,
        payload: &Map<String, Value>,
    ) -> Result<(), BackendError>;

    /// Delete an existing document.
    async fn delete(&self, collection: &str, id: &str) -> Result<(), BackendError>;
}
