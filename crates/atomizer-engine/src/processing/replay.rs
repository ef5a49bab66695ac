//! Run driver

use std::time::{Duration, Instant};

use super::Replay;
use crate::atomizer::Atomizer;
use crate::checkpoint::CheckpointManager;
use crate::error::AtomizeError;
use crate::extractor::Extractor;
use crate::formatting::{format_duration, format_number, format_unix_timestamp};
use crate::source::{verify_topology, CommitSource};
use crate::stats::RunSummary;
use crate::tracker::StateTracker;
use crate::writer::DualStoreWriter;

impl Atomizer<'_> {
    /// Replays every unprocessed commit of `source` in topological order.
    ///
    /// Only ordering failures (and an unusable ledger) abort the run; every
    /// other failure is counted in the returned summary and the commit is
    /// left for the next run.
    pub fn run(
        &self,
        source: &dyn CommitSource,
        extractor: &mut dyn Extractor,
    ) -> Result<RunSummary, AtomizeError> {
        let start_time = Instant::now();

        let commits = source.commits().inspect_err(|e| log::error!("❌ {}", e))?;
        verify_topology(&commits).inspect_err(|e| log::error!("❌ {}", e))?;

        let checkpoint = CheckpointManager::new(self.ledger, &self.repo);
        if self.config.force {
            log::info!("🔄 Force mode: clearing {} and replaying all commits", self.repo);
            checkpoint.reset(self.graph).map_err(AtomizeError::Store)?;
        } else {
            checkpoint
                .verify_history(&commits)
                .inspect_err(|e| log::error!("❌ {}", e))?;
        }

        let tracker = StateTracker::load(self.ledger, &self.repo).map_err(AtomizeError::Store)?;

        let mut pending = checkpoint
            .pending(&commits, self.config.force)
            .map_err(AtomizeError::Store)?;
        let skipped = commits.len() - pending.len();
        if let Some(max) = self.config.max_commits {
            if pending.len() > max {
                log::info!("Limiting run to {} of {} pending commits", max, pending.len());
                pending.truncate(max);
            }
        }

        if let (Some(first), Some(last)) = (commits.first(), commits.last()) {
            log::info!(
                "History: {} commits ({} .. {}), {} already processed, {} to replay",
                format_number(commits.len()),
                format_unix_timestamp(first.author_time),
                format_unix_timestamp(last.author_time),
                format_number(skipped),
                format_number(pending.len())
            );
        }
        log::info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

        let mut replay = Replay {
            source,
            tracker,
            checkpoint,
            writer: DualStoreWriter::new(self.ledger, self.graph),
            summary: RunSummary {
                total_commits: commits.len(),
                skipped,
                ..RunSummary::default()
            },
        };

        let total = pending.len();
        let interval = self.config.progress_interval.max(1);
        for (done, commit) in pending.into_iter().enumerate() {
            if self.cancel.is_cancelled() {
                log::warn!("⏹ Cancelled after {} of {} commits", done, total);
                replay.summary.cancelled = true;
                break;
            }

            log::debug!(
                "Processing commit {} #{}: {}",
                commit.short_sha(),
                commit.topo_index,
                commit.subject()
            );
            if let Err(e) = self.process_commit(&mut replay, extractor, commit) {
                log::warn!("Failed to process commit {}: {:#}", commit.short_sha(), e);
                replay.summary.store_failures += 1;
            }

            let done = done + 1;
            if done % interval == 0 || done == total {
                log_progress(&replay.summary, done, total, start_time.elapsed());
            }
        }

        if let Err(e) = self.ledger.flush() {
            log::warn!("Failed to flush ledger: {:#}", e);
        }

        let mut summary = replay.summary;
        summary.elapsed_time = start_time.elapsed();
        log_summary(&summary);
        Ok(summary)
    }
}

fn log_progress(summary: &RunSummary, done: usize, total: usize, elapsed: Duration) {
    let speed = if elapsed.as_secs_f64() > 0.0 {
        done as f64 / elapsed.as_secs_f64()
    } else {
        0.0
    };
    let eta = if speed > 0.0 {
        format_duration(Duration::from_secs_f64(
            total.saturating_sub(done) as f64 / speed,
        ))
    } else {
        "calculating...".to_string()
    };
    let pct = if total > 0 { done * 100 / total } else { 100 };

    log::info!(
        "⚡ Commits: {}/{} ({}%) | Events: {} | Blocks: +{} ~{} -{} | Errors: {} | Speed: {:.2} commits/s | ETA: {}",
        format_number(done),
        format_number(total),
        pct,
        format_number(summary.events),
        format_number(summary.counters.created + summary.counters.resurrected),
        format_number(summary.counters.modified + summary.counters.renamed),
        format_number(summary.counters.deleted),
        summary.errors(),
        speed,
        eta
    );
}

fn log_summary(summary: &RunSummary) {
    let counters = &summary.counters;
    log::info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    if summary.cancelled {
        log::info!("⏹ Atomization stopped early");
    } else {
        log::info!("✅ Atomization completed!");
    }
    log::info!("📊 Final Statistics:");
    log::info!("   • Total time:        {}", format_duration(summary.elapsed_time));
    log::info!(
        "   • Commits:           {} processed, {} skipped, {} recovered, {} without code",
        format_number(summary.processed),
        format_number(summary.skipped),
        format_number(summary.recovered),
        format_number(summary.no_code_commits)
    );
    log::info!(
        "   • Events:            {} applied, {} dropped ({} extractor calls)",
        format_number(summary.events),
        format_number(summary.events_dropped),
        format_number(summary.extractor_calls)
    );
    log::info!(
        "   • Blocks:            {} created, {} modified, {} deleted, {} renamed, {} resurrected",
        format_number(counters.created),
        format_number(counters.modified),
        format_number(counters.deleted),
        format_number(counters.renamed),
        format_number(counters.resurrected)
    );
    log::info!(
        "   • Imports:           {} added, {} removed",
        format_number(counters.imports_added),
        format_number(counters.imports_removed)
    );
    if counters.anomalies > 0 {
        log::info!("   • Anomalies:         {} (resolved)", counters.anomalies);
    }
    if summary.graph_failures > 0 {
        log::warn!("   • Graph mirror:      {} failed writes", summary.graph_failures);
    }

    if summary.errors() > 0 {
        log::warn!(
            "   • Errors:            {} ({} extraction, {} diff, {} store); will retry next run",
            summary.errors(),
            summary.extraction_failures,
            summary.diff_failures,
            summary.store_failures
        );
    } else {
        log::info!("   • Errors:            0");
    }
}
