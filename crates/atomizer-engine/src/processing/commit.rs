//! Per-commit protocol

use anyhow::Result;
use atomizer_core::filter::is_source_file;
use atomizer_core::{CommitRecord, FileDiff};

use super::Replay;
use crate::applier::EventApplier;
use crate::atomizer::Atomizer;
use crate::extractor::{Extraction, Extractor};
use crate::source::parent_hash;

impl Atomizer<'_> {
    /// Processes one commit. Every failure except a checkpoint read/write
    /// error is counted in the summary and leaves the commit unprocessed.
    pub(super) fn process_commit(
        &self,
        replay: &mut Replay,
        extractor: &mut dyn Extractor,
        commit: &CommitRecord,
    ) -> Result<()> {
        let checkpoint = &replay.checkpoint;

        // Crash between the ledger write and the checkpoint: the rows are
        // durable, only the mirror and the mark may be missing.
        if checkpoint.is_applied(&commit.sha)? {
            let outcome = replay.writer.remirror_commit(&self.repo, &commit.sha)?;
            replay.summary.graph_failures += outcome.failed;
            checkpoint.mark_processed(&commit.sha)?;
            replay.summary.recovered += 1;
            return Ok(());
        }

        let files = match replay.source.load_diff(commit) {
            Ok(files) => files,
            Err(e) => {
                log::warn!("Failed to load diff of {}: {:#}", commit.short_sha(), e);
                checkpoint.record_failure(commit, &format!("{:#}", e), 0)?;
                replay.summary.diff_failures += 1;
                return Ok(());
            }
        };

        let code_files: Vec<FileDiff> = files
            .into_iter()
            .filter(|f| !f.binary && is_source_file(&f.path))
            .collect();

        let extraction = if code_files.is_empty() {
            log::debug!("Commit {} touches no code files", commit.short_sha());
            replay.summary.no_code_commits += 1;
            Extraction::default()
        } else {
            match extractor.extract(commit, &code_files) {
                Ok(extraction) => extraction,
                Err(e) => {
                    log::warn!(
                        "Extraction failed for {} ({}): {}",
                        commit.short_sha(),
                        commit.subject(),
                        e
                    );
                    checkpoint.record_failure(commit, &e.to_string(), e.attempts())?;
                    replay.summary.extractor_calls += e.attempts() as usize;
                    replay.summary.extraction_failures += 1;
                    return Ok(());
                }
            }
        };
        replay.summary.extractor_calls += extraction.calls as usize;
        replay.summary.events_dropped += extraction.dropped;

        replay.tracker.begin();
        let (batch, counters) = {
            let mut applier = EventApplier::new(
                &mut replay.tracker,
                self.resolver,
                commit,
                &parent_hash(&commit.parents),
                &extraction.summary,
            );
            applier.apply_all(&extraction.events);
            applier.finish()
        };

        match replay.writer.write(&batch) {
            Ok(outcome) => {
                replay.tracker.commit();
                replay.summary.graph_failures += outcome.failed;
            }
            Err(e) => {
                replay.tracker.rollback();
                log::error!("Ledger write failed for {}: {:#}", commit.short_sha(), e);
                checkpoint.record_failure(commit, &format!("{:#}", e), extraction.calls)?;
                replay.summary.store_failures += 1;
                return Ok(());
            }
        }

        checkpoint.mark_processed(&commit.sha)?;
        checkpoint.clear_failure(&commit.sha)?;

        log::debug!(
            "Commit {} applied: {} events, {} records ({})",
            commit.short_sha(),
            extraction.events.len(),
            batch.changes.len(),
            counters
        );
        replay.summary.events += extraction.events.len();
        replay.summary.counters.merge(&counters);
        replay.summary.processed += 1;
        Ok(())
    }
}
