//! JSON output formatting for syncq.

use serde::Serialize;
use serde_json::json;

use crate::error::SyncqError;
use crate::sync::{Connectivity, DrainSummary, FailureReport, QueuedOperation};

/// Format pending operations as JSON
///
/// # Errors
///
/// Returns `SyncqError::Parse` if JSON serialization fails.
pub fn format_operations_json(operations: &[QueuedOperation], total: usize) -> Result<String, SyncqError> {
    let output = json!({
        "count": total,
        "items": operations
    });
    Ok(serde_json::to_string_pretty(&output)?)
}

/// Format a drain summary as JSON
///
/// # Errors
///
/// Returns `SyncqError::Parse` if JSON serialization fails.
pub fn format_summary_json(summary: &DrainSummary, connectivity: Connectivity) -> Result<String, SyncqError> {
    let output = json!({
        "connectivity": connectivity,
        "ran": summary.ran,
        "delivered": summary.delivered,
        "failed": summary.failed,
        "deferred": summary.deferred,
        "remaining": summary.remaining,
        "failures": summary.failures
    });
    Ok(serde_json::to_string_pretty(&output)?)
}

/// Format failure reports as JSON
///
/// # Errors
///
/// Returns `SyncqError::Parse` if JSON serialization fails.
pub fn format_failures_json(reports: &[FailureReport]) -> Result<String, SyncqError> {
    let output = json!({
        "count": reports.len(),
        "items": reports
    });
    Ok(serde_json::to_string_pretty(&output)?)
}

/// Format any serializable value as pretty JSON
///
/// # Errors
///
/// Returns `SyncqError::Parse` if JSON serialization fails.
pub fn to_json<T: Serialize>(value: &T) -> Result<String, SyncqError> {
    Ok(serde_json::to_string_pretty(value)?)
}
