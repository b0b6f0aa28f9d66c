//! Queue inspection and editing commands.

use serde_json::{Map, Value};

use super::{open_failure_log, open_queue};
use crate::cli::args::OutputFormat;
use crate::config::{Config, Paths};
use crate::context::Session;
use crate::error::SyncqError;
use crate::output::{format_failures, format_operations, format_queued, format_status, to_json, QueueStatus};
use crate::sync::{NewOperation, OperationKind};

/// Show queue status.
///
/// # Errors
///
/// Returns `StorageUnavailable` if the database cannot be opened.
pub fn status(paths: &Paths, format: OutputFormat) -> Result<String, SyncqError> {
    let queue = open_queue(paths)?;
    let failures = open_failure_log(paths)?;

    let status = QueueStatus {
        pending: queue.len(),
        failed: failures.count()?,
        oldest_pending: queue.peek_front().map(|op| op.enqueued_at),
        degraded: queue.degraded(),
    };
    format_status(&status, format)
}

/// List pending operations in replay order.
///
/// # Errors
///
/// Returns `StorageUnavailable` if the database cannot be opened.
pub fn list(paths: &Paths, limit: usize, format: OutputFormat) -> Result<String, SyncqError> {
    let operations = open_queue(paths)?.snapshot();
    let shown = limit.min(operations.len());
    format_operations(&operations[..shown], operations.len(), format)
}

/// Parse a `--payload` argument. Absent means an empty object.
fn parse_payload(payload: Option<&str>) -> Result<Map<String, Value>, SyncqError> {
    match payload {
        None => Ok(Map::new()),
        Some(raw) => match serde_json::from_str(raw)? {
            Value::Object(map) => Ok(map),
            _ => Err(SyncqError::InvalidOperation(
                "payload must be a JSON object".to_string(),
            )),
        },
    }
}

/// Queue a write.
///
/// # Errors
///
/// Returns `Parse` or `InvalidOperation` for a malformed payload or target,
/// `SchemaMismatch` if the payload violates the collection schema, and
/// `StorageUnavailable` if the queue cannot be persisted.
pub fn add(
    config: &Config,
    paths: &Paths,
    kind: OperationKind,
    collection: String,
    id: Option<String>,
    payload: Option<&str>,
    format: OutputFormat,
) -> Result<String, SyncqError> {
    let payload = parse_payload(payload)?;
    let mut operation = NewOperation::new(kind, collection, id, payload)?;
    Session::from(&config.session).stamp(&mut operation);

    let queued = open_queue(paths)?.enqueue(operation)?;
    format_queued(&queued, format)
}

/// List failure reports, newest first.
///
/// # Errors
///
/// Returns `StorageUnavailable` if the database cannot be opened.
pub fn failed(paths: &Paths, limit: usize, format: OutputFormat) -> Result<String, SyncqError> {
    let reports = open_failure_log(paths)?.list(limit)?;
    format_failures(&reports, format)
}

/// Clear the pending queue, or the failure log with `failed`.
///
/// # Errors
///
/// Returns `Config` without `force`, or `StorageUnavailable` if the delete fails.
pub fn clear(paths: &Paths, failed: bool, force: bool, format: OutputFormat) -> Result<String, SyncqError> {
    let target = if failed { "failed" } else { "pending" };
    if !force {
        return Err(SyncqError::Config(format!(
            "Use --force to clear all {target} operations"
        )));
    }

    let count = if failed {
        open_failure_log(paths)?.clear()?
    } else {
        open_queue(paths)?.clear()?
    };
    tracing::info!(count, target, "cleared operations");

    match format {
        OutputFormat::Json => to_json(&serde_json::json!({"cleared": count, "target": target})),
        OutputFormat::Pretty => Ok(format!("Cleared {count} {target} operations")),
    }
}
