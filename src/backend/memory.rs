//! In-process document backend.
//!
//! Keeps documents in a map and applies writes with the same rules a hosted
//! backend would: updating or deleting a missing document is rejected.
//! Used by `syncq run --loopback` and throughout the tests.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{Map, Value};

use super::{Backend, BackendError};

type Document = Map<String, Value>;

/// A write the backend accepted.
#[derive(Debug, Clone, PartialEq)]
pub enum BackendCall {
    Create {
        collection: String,
        id: String,
        payload: Document,
    },
    Update {
        collection: String,
        id: String,
        payload: Document,
    },
    Delete {
        collection: String,
        id: String,
    },
}

impl BackendCall {
    #[must_use]
    pub fn collection(&self) -> &str {
        match self {
            Self::Create { collection, .. }
            | Self::Update { collection, .. }
            | Self::Delete { collection, .. } => collection,
        }
    }
}

#[derive(Default)]
struct State {
    documents: BTreeMap<(String, String), Document>,
    next_id: u64,
    offline: bool,
    rejected: HashMap<String, String>,
    calls: Vec<BackendCall>,
    attempts: usize,
}

impl State {
    fn check(&mut self, collection: &str) -> Result<(), BackendError> {
        self.attempts += 1;
        if self.offline {
            return Err(BackendError::Transient("backend unreachable".to_string()));
        }
        if let Some(reason) = self.rejected.get(collection) {
            return Err(BackendError::Permanent(reason.clone()));
        }
        Ok(())
    }
}

/// Document store that lives in memory.
#[derive(Default)]
pub struct InMemoryBackend {
    state: Mutex<State>,
    latency: Option<Duration>,
}

impl InMemoryBackend {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every call by `latency` before it is applied.
    #[must_use]
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Fail every call as transient until [`go_online`](Self::go_online).
    pub fn go_offline(&self) {
        self.state.lock().offline = true;
    }

    pub fn go_online(&self) {
        self.state.lock().offline = false;
    }

    /// Reject every write to `collection` as permanent.
    pub fn reject_collection(&self, collection: &str, reason: &str) {
        self.state
            .lock()
            .rejected
            .insert(collection.to_string(), reason.to_string());
    }

    /// Seed a document.
    pub fn insert(&self, collection: &str, id: &str, document: Document) {
        self.state
            .lock()
            .documents
            .insert((collection.to_string(), id.to_string()), document);
    }

    #[must_use]
    pub fn document(&self, collection: &str, id: &str) -> Option<Document> {
        self.state
            .lock()
            .documents
            .get(&(collection.to_string(), id.to_string()))
            .cloned()
    }

    /// Accepted writes, oldest first.
    #[must_use]
    pub fn calls(&self) -> Vec<BackendCall> {
        self.state.lock().calls.clone()
    }

    /// Every call made, accepted or not.
    #[must_use]
    pub fn attempts(&self) -> usize {
        self.state.lock().attempts
    }

    async fn delay(&self) {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
    }
}

#[async_trait]
impl Backend for InMemoryBackend {
    async fn create(&self, collection: &str, payload: &Document) -> Result<Option<String>, BackendError> {
        self.delay().await;
        let mut state = self.state.lock();
        state.check(collection)?;

        state.next_id += 1;
        let id = format!("doc-{}", state.next_id);
        state
            .documents
            .insert((collection.to_string(), id.clone()), payload.clone());
        state.calls.push(BackendCall::Create {
            collection: collection.to_string(),
            id: id.clone(),
            payload: payload.clone(),
        });
        Ok(Some(id))
    }

    async fn update(&self, collection: &str, id: &str, payload: &Document) -> Result<(), BackendError> {
        self.delay().await;
        let mut state = self.state.lock();
        state.check(collection)?;

        let document = state
            .documents
            .get_mut(&(collection.to_string(), id.to_string()))
            .ok_or_else(|| BackendError::Permanent(format!("{collection}/{id} not found")))?;
        for (field, value) in payload {
            document.insert(field.clone(), value.clone());
        }
        state.calls.push(BackendCall::Update {
            collection: collection.to_string(),
            id: id.to_string(),
            payload: payload.clone(),
        });
        Ok(())
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<(), BackendError> {
        self.delay().await;
        let mut state = self.state.lock();
        state.check(collection)?;

        state
            .documents
            .remove(&(collection.to_string(), id.to_string()))
            .ok_or_else(|| BackendError::Permanent(format!("{collection}/{id} not found")))?;
        state.calls.push(BackendCall::Delete {
            collection: collection.to_string(),
            id: id.to_string(),
        });
        Ok(())
    }
}
