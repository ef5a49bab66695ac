//! Commit replay
//!
//! - Run driver: ordering checks, checkpoint filter, progress (replay.rs)
//! - Per-commit protocol: extract, apply, write, checkpoint (commit.rs)

mod commit;
mod replay;

use crate::checkpoint::CheckpointManager;
use crate::source::CommitSource;
use crate::stats::RunSummary;
use crate::tracker::StateTracker;
use crate::writer::DualStoreWriter;

/// State a run threads through its commits
struct Replay<'r> {
    source: &'r dyn CommitSource,
    tracker: StateTracker,
    checkpoint: CheckpointManager<'r>,
    writer: DualStoreWriter<'r>,
    summary: RunSummary,
}
