//! Durable storage for the mutation queue.
//!
//! Every write touches a single row, so several processes can share one
//! store without overwriting each other's operations. The store assigns
//! operation ids and never reuses them. The [`MutationQueue`](super::MutationQueue)
//! is its only writer within a process.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Row};
use serde_json::{Map, Value};

use super::operation::{check_target, OperationKind, QueuedOperation, Target};
use crate::error::SyncqError;
use crate::storage::Database;

/// Persistent, ordered storage of pending operations.
pub trait QueueStore: Send {
    /// Load every persisted operation in enqueue order.
    ///
    /// # Errors
    ///
    /// Returns `StorageUnavailable` if the store cannot be read, or
    /// `SchemaMismatch` if a persisted record is malformed.
    fn load_all(&self) -> Result<Vec<QueuedOperation>, SyncqError>;

    /// Persist an operation at the tail and return the id assigned to it.
    ///
    /// The `id` of `operation` is ignored.
    ///
    /// # Errors
    ///
    /// Returns `StorageUnavailable` if the write fails.
    fn append(&mut self, operation: &QueuedOperation) -> Result<u64, SyncqError>;

    /// Overwrite the delivery bookkeeping (`attempts`, `last_error`) of row `id`.
    ///
    /// # Errors
    ///
    /// Returns `StorageUnavailable` if the write fails.
    fn update(&mut self, id: u64, operation: &QueuedOperation) -> Result<(), SyncqError>;

    /// Delete row `id`. Deleting a missing row is not an error.
    ///
    /// # Errors
    ///
    /// Returns `StorageUnavailable` if the write fails.
    fn remove(&mut self, id: u64) -> Result<(), SyncqError>;
}

/// `SQLite`-backed queue store.
pub struct SqliteQueueStore {
    db: Database,
}

impl SqliteQueueStore {
    /// Open the store at a database path.
    ///
    /// # Errors
    ///
    /// Returns `StorageUnavailable` if the database cannot be opened.
    pub fn open_at(path: &std::path::Path) -> Result<Self, SyncqError> {
        Ok(Self {
            db: Database::open_at(path)?,
        })
    }

    /// Create a store over an existing database connection.
    #[must_use]
    pub const fn with_database(db: Database) -> Self {
        Self { db }
    }
}

fn row_id(id: u64) -> Result<i64, SyncqError> {
    i64::try_from(id).map_err(|_| SyncqError::NotFound(format!("operation {id}")))
}

impl QueueStore for SqliteQueueStore {
    fn load_all(&self) -> Result<Vec<QueuedOperation>, SyncqError> {
        let conn = self.db.connection();

        let mut stmt = conn
            .prepare(
                r"SELECT id, kind, collection, document_id, payload, enqueued_at,
                         attempts, last_error
                  FROM pending_operations
                  ORDER BY id ASC",
            )
            .map_err(|e| SyncqError::storage("Failed to prepare query", &e))?;

        let rows = stmt
            .query_map([], StoredRow::from_row)
            .map_err(|e| SyncqError::storage("Failed to query pending operations", &e))?;

        let mut operations = Vec::new();
        for row in rows {
            let row = row.map_err(|e| SyncqError::storage("Failed to read operation", &e))?;
            operations.push(row.decode()?);
        }

        Ok(operations)
    }

    fn append(&mut self, op: &QueuedOperation) -> Result<u64, SyncqError> {
        let conn = self.db.connection();
        let payload = serde_json::to_string(&op.payload)?;

        conn.execute(
            r"INSERT INTO pending_operations
              (kind, collection, document_id, payload, enqueued_at, attempts, last_error)
              VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                op.kind.as_str(),
                op.target.collection,
                op.target.document_id,
                payload,
                op.enqueued_at.to_rfc3339(),
                op.attempts,
                op.last_error,
            ],
        )
        .map_err(|e| SyncqError::storage("Failed to persist operation", &e))?;

        u64::try_from(conn.last_insert_rowid())
            .map_err(|e| SyncqError::StorageUnavailable(format!("invalid operation id: {e}")))
    }

    fn update(&mut self, id: u64, op: &QueuedOperation) -> Result<(), SyncqError> {
        self.db
            .connection()
            .execute(
                "UPDATE pending_operations SET attempts = ?1, last_error = ?2 WHERE id = ?3",
                params![op.attempts, op.last_error, row_id(id)?],
            )
            .map_err(|e| SyncqError::storage("Failed to update operation", &e))?;
        Ok(())
    }

    fn remove(&mut self, id: u64) -> Result<(), SyncqError> {
        self.db
            .connection()
            .execute(
                "DELETE FROM pending_operations WHERE id = ?1",
                params![row_id(id)?],
            )
            .map_err(|e| SyncqError::storage("Failed to remove operation", &e))?;
        Ok(())
    }
}

#[derive(Default)]
struct MemoryRows {
    operations: Vec<QueuedOperation>,
    last_id: u64,
}

/// Session-only store.
///
/// Clones share contents, so a test can keep a handle and inspect what the
/// queue persisted, or flip [`fail_writes`](Self::fail_writes) to simulate
/// storage being unavailable.
#[derive(Clone, Default)]
pub struct MemoryQueueStore {
    rows: Arc<Mutex<MemoryRows>>,
    failing: Arc<AtomicBool>,
}

impl MemoryQueueStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent loads and writes fail with `StorageUnavailable`.
    pub fn fail_writes(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// What is currently persisted, in enqueue order.
    #[must_use]
    pub fn persisted(&self) -> Vec<QueuedOperation> {
        self.rows.lock().operations.clone()
    }

    fn check_available(&self) -> Result<(), SyncqError> {
        if self.failing.load(Ordering::SeqCst) {
            Err(SyncqError::StorageUnavailable(
                "memory store disabled".to_string(),
            ))
        } else {
            Ok(())
        }
    }
}

impl QueueStore for MemoryQueueStore {
    fn load_all(&self) -> Result<Vec<QueuedOperation>, SyncqError> {
        self.check_available()?;
        Ok(self.persisted())
    }

    fn append(&mut self, op: &QueuedOperation) -> Result<u64, SyncqError> {
        self.check_available()?;
        let mut rows = self.rows.lock();
        rows.last_id += 1;
        let id = rows.last_id;
        rows.operations.push(QueuedOperation { id, ..op.clone() });
        Ok(id)
    }

    fn update(&mut self, id: u64, op: &QueuedOperation) -> Result<(), SyncqError> {
        self.check_available()?;
        if let Some(row) = self.rows.lock().operations.iter_mut().find(|row| row.id == id) {
            row.attempts = op.attempts;
            row.last_error.clone_from(&op.last_error);
        }
        Ok(())
    }

    fn remove(&mut self, id: u64) -> Result<(), SyncqError> {
        self.check_available()?;
        self.rows.lock().operations.retain(|row| row.id != id);
        Ok(())
    }
}

/// Raw column values, decoded outside the rusqlite closure so that
/// malformed records surface as `SchemaMismatch` instead of SQL errors.
pub(crate) struct StoredRow {
    pub id: i64,
    pub kind: String,
    pub collection: String,
    pub document_id: Option<String>,
    pub payload: String,
    pub enqueued_at: String,
    pub attempts: u32,
    pub last_error: Option<String>,
}

impl StoredRow {
    pub(crate) fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get(0)?,
            kind: row.get(1)?,
            collection: row.get(2)?,
            document_id: row.get(3)?,
            payload: row.get(4)?,
            enqueued_at: row.get(5)?,
            attempts: row.get(6)?,
            last_error: row.get(7)?,
        })
    }

    pub(crate) fn decode(self) -> Result<QueuedOperation, SyncqError> {
        let mismatch = |field: &str, reason: String| SyncqError::SchemaMismatch {
            collection: self.collection.clone(),
            field: field.to_string(),
            reason,
        };

        let kind = OperationKind::parse(&self.kind).map_err(|e| mismatch("kind", e.to_string()))?;

        let payload: Map<String, Value> = match serde_json::from_str(&self.payload) {
            Ok(Value::Object(map)) => map,
            Ok(other) => return Err(mismatch("payload", format!("expected an object, got {other}"))),
            Err(e) => return Err(mismatch("payload", e.to_string())),
        };

        let enqueued_at = DateTime::parse_from_rfc3339(&self.enqueued_at)
            .map(|t| t.with_timezone(&Utc))
            .map_err(|e| mismatch("enqueued_at", e.to_string()))?;

        let id = u64::try_from(self.id).map_err(|e| mismatch("id", e.to_string()))?;

        let target = Target {
            collection: self.collection.clone(),
            document_id: self.document_id.clone(),
        };
        check_target(kind, &target).map_err(|e| mismatch("document_id", e.to_string()))?;

        Ok(QueuedOperation {
            id,
            kind,
            target,
            payload,
            enqueued_at,
            attempts: self.attempts,
            last_error: self.last_error,
        })
    }
}
