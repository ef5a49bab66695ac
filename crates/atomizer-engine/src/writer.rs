//! Dual-store writer
//!
//! The ledger write comes first and is all-or-nothing. The graph mirror is
//! written afterwards, one row at a time; its failures are logged and
//! counted but never undo or block the ledger write.

use anyhow::Result;
use atomizer_core::{CodeBlock, CodeBlockChange, ImportEdge};
use atomizer_db::{CommitBatch, GraphStore, LedgerDb};

/// Result of mirroring one commit to the graph store
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MirrorOutcome {
    pub written: usize,
    pub failed: usize,
}

/// Writes commit batches to the ledger, then mirrors them to the graph
pub struct DualStoreWriter<'a> {
    ledger: &'a LedgerDb,
    graph: &'a dyn GraphStore,
}

impl<'a> DualStoreWriter<'a> {
    pub fn new(ledger: &'a LedgerDb, graph: &'a dyn GraphStore) -> Self {
        Self { ledger, graph }
    }

    /// Applies `batch` to the ledger; on success mirrors it to the graph.
    ///
    /// An error means nothing of the commit reached the ledger.
    pub fn write(&self, batch: &CommitBatch) -> Result<MirrorOutcome> {
        self.ledger.apply_commit(batch)?;
        Ok(self.mirror(&batch.blocks, &batch.changes, &batch.imports))
    }

    /// Best-effort graph upserts; every row is attempted
    pub fn mirror(
        &self,
        blocks: &[CodeBlock],
        changes: &[CodeBlockChange],
        imports: &[ImportEdge],
    ) -> MirrorOutcome {
        let mut outcome = MirrorOutcome::default();
        let mut tally = |result: Result<()>, what: &dyn Fn() -> String| match result {
            Ok(()) => outcome.written += 1,
            Err(e) => {
                log::warn!("Graph mirror failed for {}: {:#}", what(), e);
                outcome.failed += 1;
            }
        };

        for block in blocks {
            tally(self.graph.upsert_block(block), &|| format!("block {}", block));
        }
        for change in changes {
            tally(self.graph.record_change(change), &|| format!("change {}", change));
        }
        for edge in imports {
            tally(self.graph.upsert_import(edge), &|| {
                format!("import {} -> {}", edge.source_path, edge.dependency_path)
            });
        }
        outcome
    }

    /// Re-mirrors the durable rows of an already applied commit
    pub fn remirror_commit(&self, repo: &str, sha: &str) -> Result<MirrorOutcome> {
        let changes = self.ledger.changes_for_commit(repo, sha)?;
        let mut blocks = Vec::with_capacity(changes.len());
        for change in &changes {
            if let Some(block) = self.ledger.get_block_by_id(change.block_id)? {
                blocks.push(block);
            }
        }
        let imports: Vec<ImportEdge> = self
            .ledger
            .import_edges(repo)?
            .into_iter()
            .filter(|e| e.added_in == sha || e.removed_in.as_deref() == Some(sha))
            .collect();

        log::info!(
            "Re-mirroring commit {} ({} changes, {} imports)",
            &sha[..sha.len().min(8)],
            changes.len(),
            imports.len()
        );
        Ok(self.mirror(&blocks, &changes, &imports))
    }
}
