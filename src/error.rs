//! Error types for syncq.

use thiserror::Error;

/// The crate-wide error type.
#[derive(Debug, Error)]
pub enum SyncqError {
    /// Durable persistence could not be opened, read, or written.
    ///
    /// The in-memory queue keeps working, but queued operations will not
    /// survive a restart until storage comes back.
    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),

    /// A record does not match the schema registered for its collection.
    #[error("schema mismatch in '{collection}' field '{field}': {reason}")]
    SchemaMismatch {
        collection: String,
        field: String,
        reason: String,
    },

    /// An operation was constructed with an inconsistent target.
    #[error("invalid operation: {0}")]
    InvalidOperation(String),

    /// Network-classified failure while replaying an operation.
    #[error("transient dispatch failure: {0}")]
    TransientDispatchFailure(String),

    /// The backend rejected an operation; retrying it will never succeed.
    #[error("operation {operation_id} rejected: {reason}")]
    PermanentDispatchFailure { operation_id: u64, reason: String },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl SyncqError {
    /// Wrap a SQLite error as a storage failure with context.
    pub(crate) fn storage(context: &str, err: &rusqlite::Error) -> Self {
        Self::StorageUnavailable(format!("{context}: {err}"))
    }

    /// Whether this error should be escalated to the operator.
    #[must_use]
    pub const fn is_reportable(&self) -> bool {
        matches!(
            self,
            Self::StorageUnavailable(_) | Self::PermanentDispatchFailure { .. }
        )
    }
}
