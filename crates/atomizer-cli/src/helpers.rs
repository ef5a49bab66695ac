//! Helper functions for CLI operations

use atomizer_core::{CodeBlock, CodeBlockChange};
use chrono::{DateTime, Utc};

use crate::output::{BlockRow, ChangeRow};

const SUMMARY_WIDTH: usize = 60;

/// First 8 characters of a commit SHA
pub fn short_sha(sha: &str) -> &str {
    &sha[..sha.len().min(8)]
}

/// Formats timestamp as relative time (e.g., "2 days ago")
pub fn format_relative_time(timestamp: i64) -> String {
    const UNITS: [(&str, i64); 5] = [
        ("year", 365 * 86_400),
        ("month", 30 * 86_400),
        ("day", 86_400),
        ("hour", 3_600),
        ("min", 60),
    ];

    let elapsed = Utc::now().timestamp().saturating_sub(timestamp);
    for (unit, secs) in UNITS {
        let n = elapsed / secs;
        if n >= 1 {
            return format!("{} {}{} ago", n, unit, if n == 1 { "" } else { "s" });
        }
    }
    "just now".to_string()
}

/// Formats Unix timestamp to readable date
pub fn format_timestamp(timestamp: i64) -> String {
    let dt = DateTime::<Utc>::from_timestamp(timestamp, 0)
        .unwrap_or(DateTime::<Utc>::MIN_UTC);
    dt.format("%Y-%m-%d %H:%M").to_string()
}

/// Formats a byte count with a binary unit
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KiB", "MiB", "GiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} {}", bytes, UNITS[0])
    } else {
        format!("{:.1} {}", value, UNITS[unit])
    }
}

/// Cuts a summary to one table line
pub fn truncate_summary(summary: &str) -> String {
    let line = summary.lines().next().unwrap_or("");
    if line.chars().count() <= SUMMARY_WIDTH {
        return line.to_string();
    }
    let cut: String = line.chars().take(SUMMARY_WIDTH - 1).collect();
    format!("{}…", cut)
}

pub fn block_row(block: &CodeBlock) -> BlockRow {
    BlockRow {
        id: block.id,
        name: block.block_name.clone(),
        block_type: block.block_type.to_string(),
        lines: block.line_span(),
        status: block.status.to_string(),
        last_commit: short_sha(&block.last_modified_sha).to_string(),
        modified: format_relative_time(block.last_modified_at),
    }
}

pub fn change_row(change: &CodeBlockChange) -> ChangeRow {
    let block = match &change.old_name {
        Some(old) => format!("{}:{} (from {})", change.canonical_path, change.block_name, old),
        None => format!("{}:{}", change.canonical_path, change.block_name),
    };
    ChangeRow {
        commit: short_sha(&change.commit_sha).to_string(),
        change: change.change_type.to_string(),
        block,
        lines: format!("+{} -{}", change.lines_added, change.lines_deleted),
        date: format_timestamp(change.timestamp),
        summary: truncate_summary(&change.summary),
    }
}
