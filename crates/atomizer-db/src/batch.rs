//! Per-commit write batch and commit bookkeeping rows

use atomizer_core::{CodeBlock, CodeBlockChange, ImportEdge};
use serde::{Deserialize, Serialize};

/// Everything one commit writes to the ledger.
///
/// Applied in a single transaction: either every row becomes durable or
/// none does.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommitBatch {
    pub repo: String,

    pub commit_sha: String,

    pub topo_index: u64,

    /// SHA-256 of the commit's parent list, used for rewrite detection
    pub parent_hash: String,

    /// Final state of every block the commit touched
    pub blocks: Vec<CodeBlock>,

    /// Folded change records, one per (commit, block)
    pub changes: Vec<CodeBlockChange>,

    /// Import edges added or closed by the commit
    pub imports: Vec<ImportEdge>,

    /// Id counter after the commit; persisted with the batch
    pub next_block_id: u64,
}

impl CommitBatch {
    pub fn new(repo: &str, commit_sha: &str, topo_index: u64, parent_hash: &str) -> Self {
        Self {
            repo: repo.to_string(),
            commit_sha: commit_sha.to_string(),
            topo_index,
            parent_hash: parent_hash.to_string(),
            ..Default::default()
        }
    }

    /// True when the commit produced no block or import writes
    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty() && self.changes.is_empty() && self.imports.is_empty()
    }
}

/// Marker written inside the commit transaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppliedCommit {
    pub topo_index: u64,

    pub parent_hash: String,

    pub change_count: u32,
}

/// Extraction failure recorded for a commit that stays unprocessed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedCommit {
    pub topo_index: u64,

    pub reason: String,

    pub attempts: u32,

    /// Unix timestamp of the failure
    pub failed_at: i64,
}
