//! Run summary

use std::time::Duration;

use crate::applier::ApplyCounters;
use crate::formatting::{format_duration, format_number};

/// Totals for one atomizer run
#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    /// Commits in history
    pub total_commits: usize,

    /// Commits skipped because they were already processed
    pub skipped: usize,

    /// Commits processed in this run
    pub processed: usize,

    /// Applied commits whose checkpoint was missing (graph re-mirrored)
    pub recovered: usize,

    /// Processed commits without code files (no extractor call)
    pub no_code_commits: usize,

    pub extraction_failures: usize,

    /// Diffs that could not be loaded
    pub diff_failures: usize,

    /// Ledger writes or checkpoint updates that failed
    pub store_failures: usize,

    /// Graph rows that could not be mirrored
    pub graph_failures: usize,

    pub extractor_calls: usize,

    /// Validated events applied
    pub events: usize,

    /// Events discarded by validation
    pub events_dropped: usize,

    pub counters: ApplyCounters,

    /// Stopped at a commit boundary on request
    pub cancelled: bool,

    pub elapsed_time: Duration,
}

impl RunSummary {
    /// Commits that failed and stay unprocessed
    pub fn errors(&self) -> usize {
        self.extraction_failures + self.diff_failures + self.store_failures
    }

    /// Commits attempted in this run
    pub fn attempted(&self) -> usize {
        self.processed + self.recovered + self.errors()
    }
}

impl std::fmt::Display for RunSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Commits: {} processed, {} skipped, {} errors | Events: {} applied, {} dropped | Blocks: {} | Time: {}",
            format_number(self.processed),
            format_number(self.skipped),
            self.errors(),
            format_number(self.events),
            format_number(self.events_dropped),
            self.counters,
            format_duration(self.elapsed_time)
        )
    }
}
