//! Output formatting for syncq.
//!
//! Every command renders through here, either as colored text or as JSON.

mod json;
mod pretty;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::cli::args::OutputFormat;
use crate::error::SyncqError;
use crate::sync::{Connectivity, DrainSummary, FailureReport, QueuedOperation};

pub use json::*;
pub use pretty::*;

/// Snapshot of the queue shown by `syncq status`.
#[derive(Debug, Clone, Serialize)]
pub struct QueueStatus {
    pub pending: usize,
    pub failed: usize,
    pub oldest_pending: Option<DateTime<Utc>>,
    /// Queue writes are not reaching durable storage
    pub degraded: bool,
}

/// Format queue status based on output format
///
/// # Errors
///
/// Returns `SyncqError::Parse` if JSON serialization fails.
pub fn format_status(status: &QueueStatus, format: OutputFormat) -> Result<String, SyncqError> {
    match format {
        OutputFormat::Pretty => Ok(format_status_pretty(status)),
        OutputFormat::Json => to_json(status),
    }
}

/// Format pending operations based on output format
///
/// `total` is the queue length, which may exceed `operations.len()` when
/// the listing is limited.
///
/// # Errors
///
/// Returns `SyncqError::Parse` if JSON serialization fails.
pub fn format_operations(
    operations: &[QueuedOperation],
    total: usize,
    format: OutputFormat,
) -> Result<String, SyncqError> {
    match format {
        OutputFormat::Pretty => Ok(format_operations_pretty(operations, total)),
        OutputFormat::Json => format_operations_json(operations, total),
    }
}

/// Format a newly queued operation based on output format
///
/// # Errors
///
/// Returns `SyncqError::Parse` if JSON serialization fails.
pub fn format_queued(operation: &QueuedOperation, format: OutputFormat) -> Result<String, SyncqError> {
    match format {
        OutputFormat::Pretty => Ok(format_queued_pretty(operation)),
        OutputFormat::Json => to_json(operation),
    }
}

/// Format the outcome of a drain based on output format
///
/// # Errors
///
/// Returns `SyncqError::Parse` if JSON serialization fails.
pub fn format_summary(
    summary: &DrainSummary,
    connectivity: Connectivity,
    format: OutputFormat,
) -> Result<String, SyncqError> {
    match format {
        OutputFormat::Pretty => Ok(format_summary_pretty(summary, connectivity)),
        OutputFormat::Json => format_summary_json(summary, connectivity),
    }
}

/// Format failure reports based on output format
///
/// # Errors
///
/// Returns `SyncqError::Parse` if JSON serialization fails.
pub fn format_failures(reports: &[FailureReport], format: OutputFormat) -> Result<String, SyncqError> {
    match format {
        OutputFormat::Pretty => Ok(format_failures_pretty(reports)),
        OutputFormat::Json => format_failures_json(reports),
    }
}
