use chrono::{DateTime, Utc};
use colored::Colorize;

use super::QueueStatus;
use crate::sync::{Connectivity, DrainSummary, FailureReport, QueuedOperation};

/// Human-friendly age such as `3 hours ago`.
fn age(since: DateTime<Utc>) -> String {
    let age = Utc::now().signed_duration_since(since);
    if age.num_days() > 0 {
        format!("{} days ago", age.num_days())
    } else if age.num_hours() > 0 {
        format!("{} hours ago", age.num_hours())
    } else if age.num_minutes() > 0 {
        format!("{} minutes ago", age.num_minutes())
    } else {
        "just now".to_string()
    }
}

fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() > max {
        let cut: String = text.chars().take(max.saturating_sub(3)).collect();
        format!("{cut}...")
    } else {
        text.to_string()
    }
}

/// Format queue status as pretty output
pub fn format_status_pretty(status: &QueueStatus) -> String {
    let mut lines = Vec::new();

    lines.push("Sync Queue Status".bold().to_string());
    lines.push("─".repeat(40));

    lines.push(format!(
        "  Pending:    {} {}",
        status.pending,
        if status.pending > 0 {
            "operations waiting".dimmed()
        } else {
            "".dimmed()
        }
    ));

    lines.push(format!(
        "  Failed:     {} {}",
        status.failed,
        if status.failed > 0 {
            "operations need attention".red()
        } else {
            "".normal()
        }
    ));

    if let Some(oldest) = status.oldest_pending {
        lines.push(format!("  Oldest:     {}", age(oldest).dimmed()));
    }

    if status.degraded {
        lines.push(String::new());
        lines.push(
            "Queue storage is unavailable; pending writes will not survive a restart"
                .yellow()
                .to_string(),
        );
    }

    if status.pending > 0 {
        lines.push(String::new());
        lines.push(
            "Run 'syncq run' to replay pending operations"
                .dimmed()
                .to_string(),
        );
    }

    lines.join("\n")
}

/// Format pending operations as a table
pub fn format_operations_pretty(operations: &[QueuedOperation], total: usize) -> String {
    if operations.is_empty() {
        return "No pending operations in queue.".to_string();
    }

    let mut lines = Vec::new();

    lines.push(format!("Pending Operations ({total})"));
    lines.push("─".repeat(72));
    lines.push(format!(
        "{:<6} {:<8} {:<34} {:<17} {}",
        "ID", "Kind", "Target", "Queued", "Tries"
    ));
    lines.push("─".repeat(72));

    for op in operations {
        let queued = op.enqueued_at.format("%Y-%m-%d %H:%M").to_string();
        let tries = if op.attempts > 0 {
            op.attempts.to_string().yellow().to_string()
        } else {
            "0".dimmed().to_string()
        };
        lines.push(format!(
            "{:<6} {:<8} {:<34} {:<17} {}",
            op.id,
            op.kind.as_str(),
            truncate(&op.target.to_string(), 34),
            queued,
            tries
        ));

        if let Some(error) = &op.last_error {
            lines.push(format!("       {}", truncate(error, 60).red()));
        }
    }

    if total > operations.len() {
        lines.push(format!("  ... and {} more", total - operations.len()).dimmed().to_string());
    }

    lines.join("\n")
}

/// Confirmation for a queued write
pub fn format_queued_pretty(op: &QueuedOperation) -> String {
    format!("Queued {} (ID: {})", op.label().bold(), op.id)
}

/// Format the outcome of a drain
pub fn format_summary_pretty(summary: &DrainSummary, connectivity: Connectivity) -> String {
    if !summary.ran {
        return match connectivity {
            Connectivity::Offline => format!(
                "{} Backend unreachable, {} operations stay queued",
                "○".yellow(),
                summary.remaining
            ),
            Connectivity::Online => "Another sync is already running.".to_string(),
        };
    }

    let total = summary.delivered + summary.failed + summary.deferred;
    if total == 0 {
        return "No pending operations to sync.".to_string();
    }

    let mut lines = Vec::new();

    lines.push(format!("Sync finished: {total} operations"));
    lines.push("─".repeat(40));

    if summary.delivered > 0 {
        lines.push(format!(
            "  {} {}",
            "✓".green(),
            format!("{} delivered", summary.delivered).green()
        ));
    }

    if summary.failed > 0 {
        lines.push(format!(
            "  {} {}",
            "✗".red(),
            format!("{} rejected", summary.failed).red()
        ));
    }

    if summary.deferred > 0 {
        lines.push(format!(
            "  {} {}",
            "○".yellow(),
            format!("{} deferred", summary.deferred).yellow()
        ));
    }

    if summary.remaining > 0 {
        lines.push(format!("  {} still queued", summary.remaining).dimmed().to_string());
    }

    if !summary.failures.is_empty() {
        lines.push(String::new());
        lines.push("Rejected:".to_string());
        for report in summary.failures.iter().take(3) {
            lines.push(format!(
                "  - {}: {}",
                report.operation.label(),
                report.reason.red()
            ));
        }
        if summary.failures.len() > 3 {
            lines.push(format!("  ... and {} more", summary.failures.len() - 3));
        }
        lines.push("Run 'syncq failed' to see the lost payloads".dimmed().to_string());
    }

    lines.join("\n")
}

/// Format failure reports, payloads included
pub fn format_failures_pretty(reports: &[FailureReport]) -> String {
    if reports.is_empty() {
        return "No failed operations.".to_string();
    }

    let mut lines = Vec::new();

    lines.push(format!("Failed Operations ({})", reports.len()));
    lines.push("─".repeat(60));

    for report in reports {
        lines.push(format!(
            "{} {}  {}",
            "✗".red(),
            report.operation.label().bold(),
            age(report.failed_at).dimmed()
        ));
        lines.push(format!("  {}: {}", "Reason".dimmed(), report.reason));
        if !report.operation.payload.is_empty() {
            let payload = serde_json::Value::Object(report.operation.payload.clone());
            lines.push(format!("  {}: {payload}", "Payload".dimmed()));
        }
    }

    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::NewOperation;
    use serde_json::json;

    fn op() -> QueuedOperation {
        let payload = json!({"stage": "done"}).as_object().cloned().unwrap();
        QueuedOperation::from_new(4, NewOperation::update("tasks", "t1", payload).unwrap())
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("abcdefghijkl", 8), "abcde...");
    }

    #[test]
    fn test_empty_listings() {
        assert_eq!(format_operations_pretty(&[], 0), "No pending operations in queue.");
        assert_eq!(format_failures_pretty(&[]), "No failed operations.");
    }

    #[test]
    fn test_operations_table_lists_target() {
        let out = format_operations_pretty(&[op()], 1);
        assert!(out.contains("Pending Operations (1)"));
        assert!(out.contains("tasks/t1"));
    }

    #[test]
    fn test_failures_show_payload() {
        let out = format_failures_pretty(&[FailureReport::new(op(), "tasks/t1 not found")]);
        assert!(out.contains("update tasks/t1"));
        assert!(out.contains("not found"));
        assert!(out.contains(r#""stage":"done""#));
    }

    #[test]
    fn test_summary_offline() {
        let summary = DrainSummary {
            remaining: 2,
            ..DrainSummary::default()
        };
        let out = format_summary_pretty(&summary, Connectivity::Offline);
        assert!(out.contains("2 operations stay queued"));
    }
}
