//! Atomizer Engine - Chronological replay of commit history into blocks
//!
//! This crate is responsible for:
//! - Walking a git repository in topological order
//! - Extracting typed change events from each commit's code diff
//! - Applying the events to the in-memory block registry
//! - Writing the results to the ledger and the graph mirror, then
//!   checkpointing the commit

mod applier;
mod atomizer;
mod checkpoint;
mod error;
pub mod extractor;
pub mod formatting;
mod git;
mod processing;
mod source;
mod stats;
mod throttle;
mod tracker;
mod writer;

pub use applier::{ApplyCounters, EventApplier};
pub use atomizer::{Atomizer, AtomizerConfig, CancelFlag};
pub use checkpoint::CheckpointManager;
pub use error::{AtomizeError, OrderingError};
pub use extractor::{
    ExtractError, Extraction, Extractor, LlmConfig, LlmExtractor, StubExtractor,
};
pub use git::GitHistory;
pub use source::{parent_hash, verify_topology, CommitSource, ScriptedHistory};
pub use stats::RunSummary;
pub use throttle::{retry_with_backoff, Backoff, Throttle};
pub use tracker::{BlockState, StateTracker};
pub use writer::{DualStoreWriter, MirrorOutcome};
