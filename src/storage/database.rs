//! `SQLite` database connection.
//!
//! The database is stored at `~/.syncq/syncq.db` and contains tables for:
//! - Pending operations (the durable queue)
//! - Failed operations (lost writes kept for manual remediation)

use rusqlite::Connection;

use crate::error::SyncqError;

use super::migrations;

/// Database connection wrapper.
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Open the database at a specific path.
    ///
    /// Creates the database file and runs migrations if necessary.
    ///
    /// # Errors
    ///
    /// Returns `StorageUnavailable` if the database cannot be opened or migrations fail.
    pub fn open_at(path: &std::path::Path) -> Result<Self, SyncqError> {
        let conn = Connection::open(path).map_err(|e| {
            SyncqError::storage(&format!("Failed to open database {}", path.display()), &e)
        })?;

        // WAL lets the queue and the failure log hold separate connections.
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| {
            row.get::<_, String>(0)
        })
        .map_err(|e| SyncqError::storage("Failed to enable WAL", &e))?;
        conn.busy_timeout(std::time::Duration::from_secs(5))
            .map_err(|e| SyncqError::storage("Failed to set busy timeout", &e))?;

        let db = Self { conn };
        db.migrate()?;

        Ok(db)
    }

    /// Open an in-memory database (useful for testing).
    ///
    /// # Errors
    ///
    /// Returns `StorageUnavailable` if the database cannot be opened or migrations fail.
    pub fn open_in_memory() -> Result<Self, SyncqError> {
        let conn = Connection::open_in_memory()
            .map_err(|e| SyncqError::storage("Failed to open in-memory database", &e))?;

        let db = Self { conn };
        db.migrate()?;

        Ok(db)
    }

    fn migrate(&self) -> Result<(), SyncqError> {
        migrations::run(&self.conn)
    }

    /// Get the current schema version.
    ///
    /// # Errors
    ///
    /// Returns an error if the version cannot be read.
    pub fn schema_version(&self) -> Result<i32, SyncqError> {
        migrations::get_version(&self.conn)
    }

    /// Get a reference to the underlying connection.
    #[must_use]
    pub const fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Get a mutable reference to the underlying connection, for transactions.
    pub fn connection_mut(&mut self) -> &mut Connection {
        &mut self.conn
    }
}
