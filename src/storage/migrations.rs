//! Database migrations for syncq.
//!
//! Each migration is a function that upgrades the schema by one version.
//! Migrations are run automatically when the database is opened.

use rusqlite::Connection;

use crate::error::SyncqError;

/// Current schema version.
const CURRENT_VERSION: i32 = 2;

/// Get the current schema version from the database.
///
/// Returns 0 if no version has been set (new database).
pub fn get_version(conn: &Connection) -> Result<i32, SyncqError> {
    conn.query_row("PRAGMA user_version", [], |row| row.get(0))
        .map_err(|e| SyncqError::storage("Failed to get schema version", &e))
}

fn set_version(conn: &Connection, version: i32) -> Result<(), SyncqError> {
    conn.execute_batch(&format!("PRAGMA user_version = {version};"))
        .map_err(|e| SyncqError::storage("Failed to set schema version", &e))
}

/// Run all pending migrations.
pub fn run(conn: &Connection) -> Result<(), SyncqError> {
    let current = get_version(conn)?;

    if current >= CURRENT_VERSION {
        return Ok(());
    }

    for version in (current + 1)..=CURRENT_VERSION {
        run_migration(conn, version)?;
        set_version(conn, version)?;
    }

    Ok(())
}

fn run_migration(conn: &Connection, version: i32) -> Result<(), SyncqError> {
    match version {
        1 => migrate_v1(conn),
        2 => migrate_v2(conn),
        _ => Err(SyncqError::StorageUnavailable(format!(
            "Unknown migration version: {version}"
        ))),
    }
}

/// Migration v1: Initial schema.
///
/// Creates tables for:
/// - `pending_operations`: the durable queue, ordered by `position` (rekeyed in v2)
/// - `failed_operations`: permanently failed writes
fn migrate_v1(conn: &Connection) -> Result<(), SyncqError> {
    conn.execute_batch(
        r"
        CREATE TABLE IF NOT EXISTS pending_operations (
            position INTEGER PRIMARY KEY,
            id INTEGER NOT NULL UNIQUE,
            kind TEXT NOT NULL,
            collection TEXT NOT NULL,
            document_id TEXT,
            payload TEXT NOT NULL,
            enqueued_at TEXT NOT NULL,
            attempts INTEGER NOT NULL DEFAULT 0,
            last_error TEXT
        );

        CREATE TABLE IF NOT EXISTS failed_operations (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            operation_id INTEGER NOT NULL,
            kind TEXT NOT NULL,
            collection TEXT NOT NULL,
            document_id TEXT,
            payload TEXT NOT NULL,
            enqueued_at TEXT NOT NULL,
            attempts INTEGER NOT NULL DEFAULT 0,
            reason TEXT NOT NULL,
            failed_at TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_failed_operations_failed_at
        ON failed_operations(failed_at);
        ",
    )
    .map_err(|e| SyncqError::storage("Migration v1 failed", &e))
}

/// Migration v2: key pending operations by id.
///
/// Rows are addressed one at a time from v2 on, so `id` becomes the
/// `AUTOINCREMENT` key and also defines the queue order.
fn migrate_v2(conn: &Connection) -> Result<(), SyncqError> {
    conn.execute_batch(
        r"
        BEGIN;

        CREATE TABLE pending_operations_v2 (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            kind TEXT NOT NULL,
            collection TEXT NOT NULL,
            document_id TEXT,
            payload TEXT NOT NULL,
            enqueued_at TEXT NOT NULL,
            attempts INTEGER NOT NULL DEFAULT 0,
            last_error TEXT
        );

        INSERT INTO pending_operations_v2
            (id, kind, collection, document_id, payload, enqueued_at, attempts, last_error)
        SELECT id, kind, collection, document_id, payload, enqueued_at, attempts, last_error
        FROM pending_operations
        ORDER BY position ASC;

        DROP TABLE pending_operations;
        ALTER TABLE pending_operations_v2 RENAME TO pending_operations;

        COMMIT;
        ",
    )
    .map_err(|e| SyncqError::storage("Migration v2 failed", &e))
}
