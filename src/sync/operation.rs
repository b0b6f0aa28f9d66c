//! Operation types for the mutation queue.
//!
//! A write is described by a [`NewOperation`] until the queue accepts it,
//! at which point it becomes a [`QueuedOperation`] with an id and timestamp.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::SyncqError;

/// The kind of write an operation performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    /// Create a new document; the backend assigns the id.
    Create,
    /// Update fields of an existing document.
    Update,
    /// Delete an existing document.
    Delete,
}

impl OperationKind {
    /// Stable storage name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }

    /// Parse a storage name.
    ///
    /// # Errors
    ///
    /// Returns `InvalidOperation` for unknown names.
    pub fn parse(s: &str) -> Result<Self, SyncqError> {
        match s.to_lowercase().as_str() {
            "create" => Ok(Self::Create),
            "update" => Ok(Self::Update),
            "delete" => Ok(Self::Delete),
            other => Err(SyncqError::InvalidOperation(format!(
                "unknown operation kind '{other}'"
            ))),
        }
    }

    /// Whether operations of this kind address an existing document.
    #[must_use]
    pub const fn needs_document_id(&self) -> bool {
        matches!(self, Self::Update | Self::Delete)
    }
}

impl std::fmt::Display for OperationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Logical target of a write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Target {
    pub collection: String,
    /// Absent for creates.
    pub document_id: Option<String>,
}

impl std::fmt::Display for Target {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.document_id {
            Some(id) => write!(f, "{}/{id}", self.collection),
            None => write!(f, "{}", self.collection),
        }
    }
}

/// A write that has not been queued yet.
#[derive(Debug, Clone, PartialEq)]
pub struct NewOperation {
    pub kind: OperationKind,
    pub target: Target,
    pub payload: Map<String, Value>,
}

impl NewOperation {
    /// Build an operation, checking that the target fits the kind.
    ///
    /// # Errors
    ///
    /// Returns `InvalidOperation` if the collection is empty, a create carries
    /// a document id, or an update/delete lacks one.
    pub fn new(
        kind: OperationKind,
        collection: impl Into<String>,
        document_id: Option<String>,
        payload: Map<String, Value>,
    ) -> Result<Self, SyncqError> {
        let target = Target {
            collection: collection.into(),
            document_id,
        };
        check_target(kind, &target)?;
        Ok(Self {
            kind,
            target,
            payload,
        })
    }

    /// # Errors
    ///
    /// Returns `InvalidOperation` if the collection name is empty.
    pub fn create(collection: impl Into<String>, payload: Map<String, Value>) -> Result<Self, SyncqError> {
        Self::new(OperationKind::Create, collection, None, payload)
    }

    /// # Errors
    ///
    /// Returns `InvalidOperation` if the collection or id is empty.
    pub fn update(
        collection: impl Into<String>,
        id: impl Into<String>,
        payload: Map<String, Value>,
    ) -> Result<Self, SyncqError> {
        Self::new(OperationKind::Update, collection, Some(id.into()), payload)
    }

    /// # Errors
    ///
    /// Returns `InvalidOperation` if the collection or id is empty.
    pub fn delete(collection: impl Into<String>, id: impl Into<String>) -> Result<Self, SyncqError> {
        Self::new(OperationKind::Delete, collection, Some(id.into()), Map::new())
    }
}

/// A queued operation with delivery metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedOperation {
    /// Unique, monotonically increasing within the queue
    pub id: u64,
    pub kind: OperationKind,
    pub target: Target,
    /// Fields to write; irrelevant to queue logic
    pub payload: Map<String, Value>,
    /// When the operation was queued
    pub enqueued_at: DateTime<Utc>,
    /// Transient delivery failures so far
    pub attempts: u32,
    /// Last delivery error
    pub last_error: Option<String>,
}

impl QueuedOperation {
    /// Stamp a new operation with its queue id.
    #[must_use]
    pub fn from_new(id: u64, op: NewOperation) -> Self {
        Self {
            id,
            kind: op.kind,
            target: op.target,
            payload: op.payload,
            enqueued_at: Utc::now(),
            attempts: 0,
            last_error: None,
        }
    }

    /// Short label such as `update tasks/abc123`.
    #[must_use]
    pub fn label(&self) -> String {
        format!("{} {}", self.kind, self.target)
    }
}

pub(crate) fn check_target(kind: OperationKind, target: &Target) -> Result<(), SyncqError> {
    if target.collection.trim().is_empty() {
        return Err(SyncqError::InvalidOperation(
            "collection name is empty".to_string(),
        ));
    }
    match (&target.document_id, kind.needs_document_id()) {
        (Some(_), false) => Err(SyncqError::InvalidOperation(format!(
            "{kind} on '{}' must not name a document id",
            target.collection
        ))),
        (None, true) => Err(SyncqError::InvalidOperation(format!(
            "{kind} on '{}' requires a document id",
            target.collection
        ))),
        (Some(id), true) if id.trim().is_empty() => Err(SyncqError::InvalidOperation(format!(
            "{kind} on '{}' has an empty document id",
            target.collection
        ))),
        _ => Ok(()),
    }
}
