//! In-memory block registry for one run
//!
//! The tracker is the single authority on block state while commits are
//! replayed. It is loaded from the ledger at run start and mutated only by
//! the event applier. Mutations made while a commit is open are journaled,
//! so a commit whose ledger write fails can be rolled back to the last
//! durable state.

use std::collections::HashMap;

use anyhow::{Context, Result};
use atomizer_core::{BlockIdentity, BlockStatus, CodeBlock, ImportEdge};
use atomizer_db::LedgerDb;

/// Lifecycle state of an identity at the current replay point
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockState {
    Absent,
    Active,
    Deleted,
}

#[derive(Debug)]
enum Undo {
    Block(BlockIdentity, Option<CodeBlock>),
    Import(String, Option<ImportEdge>),
}

#[derive(Debug)]
struct Journal {
    undo: Vec<Undo>,
    next_id: u64,
}

/// Registry mapping canonical identity to current block state
#[derive(Debug)]
pub struct StateTracker {
    repo: String,
    blocks: HashMap<BlockIdentity, CodeBlock>,
    imports: HashMap<String, ImportEdge>,
    next_id: u64,
    journal: Option<Journal>,
}

impl StateTracker {
    /// Empty registry handing out ids from `next_id`
    pub fn new(repo: &str, next_id: u64) -> Self {
        Self {
            repo: repo.to_string(),
            blocks: HashMap::new(),
            imports: HashMap::new(),
            next_id: next_id.max(1),
            journal: None,
        }
    }

    /// Seeds the registry from everything the ledger holds for `repo`
    pub fn load(ledger: &LedgerDb, repo: &str) -> Result<Self> {
        let mut tracker = Self::new(repo, ledger.next_block_id()?);

        for block in ledger
            .blocks_for_repo(repo)
            .context("Failed to load blocks from ledger")?
        {
            tracker.next_id = tracker.next_id.max(block.id + 1);
            tracker.blocks.insert(block.identity(), block);
        }
        for edge in ledger
            .import_edges(repo)
            .context("Failed to load import edges from ledger")?
        {
            tracker.imports.insert(edge.key(), edge);
        }

        log::info!(
            "Loaded {} blocks ({} active) and {} import edges for {}",
            tracker.blocks.len(),
            tracker.active_count(),
            tracker.imports.len(),
            repo
        );
        Ok(tracker)
    }

    pub fn repo(&self) -> &str {
        &self.repo
    }

    pub fn state(&self, identity: &BlockIdentity) -> BlockState {
        match self.blocks.get(identity) {
            None => BlockState::Absent,
            Some(block) if block.status == BlockStatus::Active => BlockState::Active,
            Some(_) => BlockState::Deleted,
        }
    }

    pub fn get(&self, identity: &BlockIdentity) -> Option<&CodeBlock> {
        self.blocks.get(identity)
    }

    /// Stores `block` under its own identity, replacing what was there
    pub fn put(&mut self, block: CodeBlock) {
        let identity = block.identity();
        let previous = self.blocks.insert(identity.clone(), block);
        if let Some(journal) = &mut self.journal {
            journal.undo.push(Undo::Block(identity, previous));
        }
    }

    pub fn remove(&mut self, identity: &BlockIdentity) -> Option<CodeBlock> {
        let previous = self.blocks.remove(identity);
        if let Some(journal) = &mut self.journal {
            journal.undo.push(Undo::Block(identity.clone(), previous.clone()));
        }
        previous
    }

    /// Hands out the next block id
    pub fn allocate_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    /// First id not yet handed out
    pub fn next_id(&self) -> u64 {
        self.next_id
    }

    pub fn import(&self, source_path: &str, dependency_path: &str) -> Option<&ImportEdge> {
        self.imports
            .get(&ImportEdge::key_for(&self.repo, source_path, dependency_path))
    }

    pub fn put_import(&mut self, edge: ImportEdge) {
        let key = edge.key();
        let previous = self.imports.insert(key.clone(), edge);
        if let Some(journal) = &mut self.journal {
            journal.undo.push(Undo::Import(key, previous));
        }
    }

    // ── commit staging ──────────────────────────────────────────────────────

    /// Starts journaling mutations for one commit
    pub fn begin(&mut self) {
        if self.journal.is_some() {
            log::warn!("Tracker commit opened twice; discarding the previous journal");
        }
        self.journal = Some(Journal {
            undo: Vec::new(),
            next_id: self.next_id,
        });
    }

    /// Keeps the mutations made since `begin`
    pub fn commit(&mut self) {
        self.journal = None;
    }

    /// Reverts every mutation made since `begin`
    pub fn rollback(&mut self) {
        let Some(journal) = self.journal.take() else {
            return;
        };
        for undo in journal.undo.into_iter().rev() {
            match undo {
                Undo::Block(identity, Some(block)) => {
                    self.blocks.insert(identity, block);
                }
                Undo::Block(identity, None) => {
                    self.blocks.remove(&identity);
                }
                Undo::Import(key, Some(edge)) => {
                    self.imports.insert(key, edge);
                }
                Undo::Import(key, None) => {
                    self.imports.remove(&key);
                }
            }
        }
        self.next_id = journal.next_id;
    }

    // ── counters ────────────────────────────────────────────────────────────

    /// Identities known to the registry (live and deleted)
    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn active_count(&self) -> usize {
        self.blocks.values().filter(|b| b.is_active()).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use atomizer_core::BlockType;

    fn block(id: u64, path: &str, name: &str) -> CodeBlock {
        CodeBlock {
            id,
            repo: "acme/app".to_string(),
            canonical_path: path.to_string(),
            block_name: name.to_string(),
            path_at_creation: path.to_string(),
            block_type: BlockType::Function,
            signature: None,
            start_line: None,
            end_line: None,
            language: "python".to_string(),
            complexity: None,
            status: BlockStatus::Active,
            first_seen_sha: "c1".to_string(),
            last_modified_sha: "c1".to_string(),
            last_modified_at: 0,
        }
    }

    #[test]
    fn test_states() {
        let mut tracker = StateTracker::new("acme/app", 1);
        let id = BlockIdentity::new("acme/app", "a.py", "f");
        assert_eq!(tracker.state(&id), BlockState::Absent);

        tracker.put(block(1, "a.py", "f"));
        assert_eq!(tracker.state(&id), BlockState::Active);

        let mut deleted = block(1, "a.py", "f");
        deleted.status = BlockStatus::Deleted;
        tracker.put(deleted);
        assert_eq!(tracker.state(&id), BlockState::Deleted);
    }

    #[test]
    fn test_rollback_restores_previous_state() {
        let mut tracker = StateTracker::new("acme/app", 1);
        tracker.put(block(1, "a.py", "f"));
        tracker.allocate_id();

        tracker.begin();
        let id = tracker.allocate_id();
        tracker.put(block(id, "a.py", "g"));
        let mut moved = tracker
            .remove(&BlockIdentity::new("acme/app", "a.py", "f"))
            .unwrap();
        moved.canonical_path = "b.py".to_string();
        tracker.put(moved);
        tracker.rollback();

        assert_eq!(tracker.len(), 1);
        assert_eq!(tracker.next_id(), 2);
        assert!(tracker.get(&BlockIdentity::new("acme/app", "a.py", "f")).is_some());
        assert!(tracker.get(&BlockIdentity::new("acme/app", "b.py", "f")).is_none());
    }

    #[test]
    fn test_commit_keeps_changes() {
        let mut tracker = StateTracker::new("acme/app", 5);
        tracker.begin();
        let id = tracker.allocate_id();
        tracker.put(block(id, "a.py", "f"));
        tracker.commit();
        tracker.rollback();

        assert_eq!(id, 5);
        assert_eq!(tracker.next_id(), 6);
        assert_eq!(tracker.active_count(), 1);
    }
}
