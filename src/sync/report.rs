//! Failure reports for permanently rejected operations.
//!
//! A permanently failed operation is dropped from the queue, but never
//! silently: a [`FailureReport`] carrying the original payload is written to
//! the failure log so an operator can re-enter the data by hand.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::params;
use serde::Serialize;

use super::operation::QueuedOperation;
use super::store::StoredRow;
use crate::error::SyncqError;
use crate::storage::Database;

/// A lost write.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FailureReport {
    /// The operation as it was queued, payload included
    pub operation: QueuedOperation,
    /// Why it was dropped
    pub reason: String,
    pub failed_at: DateTime<Utc>,
}

impl FailureReport {
    #[must_use]
    pub fn new(operation: QueuedOperation, reason: impl Into<String>) -> Self {
        Self {
            operation,
            reason: reason.into(),
            failed_at: Utc::now(),
        }
    }
}

/// Durable log of failure reports.
pub struct FailureLog {
    db: Mutex<Database>,
}

impl FailureLog {
    /// Open the failure log stored in the database at `path`.
    ///
    /// # Errors
    ///
    /// Returns `StorageUnavailable` if the database cannot be opened.
    pub fn open_at(path: &std::path::Path) -> Result<Self, SyncqError> {
        Ok(Self::with_database(Database::open_at(path)?))
    }

    /// A failure log that lives for the session only.
    ///
    /// # Errors
    ///
    /// Returns `StorageUnavailable` if the database cannot be opened.
    pub fn in_memory() -> Result<Self, SyncqError> {
        Ok(Self::with_database(Database::open_in_memory()?))
    }

    #[must_use]
    pub fn with_database(db: Database) -> Self {
        Self { db: Mutex::new(db) }
    }

    /// Append a report.
    ///
    /// # Errors
    ///
    /// Returns `StorageUnavailable` if the write fails.
    pub fn record(&self, report: &FailureReport) -> Result<(), SyncqError> {
        let op = &report.operation;
        let payload = serde_json::to_string(&op.payload)?;
        let db = self.db.lock();

        db.connection()
            .execute(
                r"INSERT INTO failed_operations
                  (operation_id, kind, collection, document_id, payload, enqueued_at,
                   attempts, reason, failed_at)
                  VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    i64::try_from(op.id).unwrap_or(i64::MAX),
                    op.kind.as_str(),
                    op.target.collection,
                    op.target.document_id,
                    payload,
                    op.enqueued_at.to_rfc3339(),
                    op.attempts,
                    report.reason,
                    report.failed_at.to_rfc3339(),
                ],
            )
            .map_err(|e| SyncqError::storage("Failed to record failure report", &e))?;

        Ok(())
    }

    /// Most recent reports first.
    ///
    /// # Errors
    ///
    /// Returns `StorageUnavailable` if the query fails, or `SchemaMismatch`
    /// if a stored report is malformed.
    pub fn list(&self, limit: usize) -> Result<Vec<FailureReport>, SyncqError> {
        let db = self.db.lock();
        let mut stmt = db
            .connection()
            .prepare(
                r"SELECT operation_id, kind, collection, document_id, payload, enqueued_at,
                         attempts, NULL, reason, failed_at
                  FROM failed_operations
                  ORDER BY id DESC
                  LIMIT ?1",
            )
            .map_err(|e| SyncqError::storage("Failed to prepare query", &e))?;

        let rows = stmt
            .query_map([i64::try_from(limit).unwrap_or(i64::MAX)], |row| {
                Ok((
                    StoredRow::from_row(row)?,
                    row.get::<_, String>(8)?,
                    row.get::<_, String>(9)?,
                ))
            })
            .map_err(|e| SyncqError::storage("Failed to query failure reports", &e))?;

        let mut reports = Vec::new();
        for row in rows {
            let (stored, reason, failed_at) =
                row.map_err(|e| SyncqError::storage("Failed to read failure report", &e))?;
            let failed_at = DateTime::parse_from_rfc3339(&failed_at)
                .map_or_else(|_| Utc::now(), |t| t.with_timezone(&Utc));
            reports.push(FailureReport {
                operation: stored.decode()?,
                reason,
                failed_at,
            });
        }
        Ok(reports)
    }

    /// Number of reports in the log.
    ///
    /// # Errors
    ///
    /// Returns `StorageUnavailable` if the query fails.
    pub fn count(&self) -> Result<usize, SyncqError> {
        let count: i64 = self
            .db
            .lock()
            .connection()
            .query_row("SELECT COUNT(*) FROM failed_operations", [], |row| row.get(0))
            .map_err(|e| SyncqError::storage("Failed to count failure reports", &e))?;
        Ok(usize::try_from(count).unwrap_or(0))
    }

    /// Delete every report.
    ///
    /// # Errors
    ///
    /// Returns `StorageUnavailable` if the delete fails.
    pub fn clear(&self) -> Result<usize, SyncqError> {
        self.db
            .lock()
            .connection()
            .execute("DELETE FROM failed_operations", [])
            .map_err(|e| SyncqError::storage("Failed to clear failure reports", &e))
    }
}
