//! Event applier: the block lifecycle state machine
//!
//! Each identity is Absent, Active or Deleted. Events move identities
//! between those states and stage the resulting writes in a
//! [`CommitBatch`]. Unexpected transitions (duplicate create, orphan
//! modify/delete, rename onto a live block) are resolved deterministically
//! and logged; they never fail the commit.
//!
//! | State          | Event        | Result  | Record   |
//! |----------------|--------------|---------|----------|
//! | Absent         | CREATE       | Active  | created  |
//! | Active         | CREATE       | Active  | modified |
//! | Absent         | MODIFY       | Active  | created  |
//! | Active         | MODIFY       | Active  | modified |
//! | Active         | RENAME       | Active  | renamed  |
//! | Active         | DELETE       | Deleted | deleted  |
//! | Absent/Deleted | DELETE       | -       | -        |
//! | Deleted        | CREATE/MODIFY| Active  | created  |
//!
//! A Deleted identity that comes back keeps its id and history.

use std::collections::HashMap;
use std::fmt;

use atomizer_core::filter::detect_language;
use atomizer_core::identity::FileIdentityResolver;
use atomizer_core::{
    BlockIdentity, BlockStatus, ChangeEvent, ChangeType, CodeBlock, CodeBlockChange, CommitRecord,
    EventKind, ImportEdge,
};
use atomizer_db::CommitBatch;

use crate::tracker::{BlockState, StateTracker};

/// Transition counters for one commit or a whole run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ApplyCounters {
    pub created: usize,
    pub modified: usize,
    pub deleted: usize,
    pub renamed: usize,
    /// Deleted blocks brought back to life
    pub resurrected: usize,
    pub imports_added: usize,
    pub imports_removed: usize,
    /// Events resolved by an anomaly rule or ignored as no-ops
    pub anomalies: usize,
}

impl ApplyCounters {
    pub fn merge(&mut self, other: &ApplyCounters) {
        self.created += other.created;
        self.modified += other.modified;
        self.deleted += other.deleted;
        self.renamed += other.renamed;
        self.resurrected += other.resurrected;
        self.imports_added += other.imports_added;
        self.imports_removed += other.imports_removed;
        self.anomalies += other.anomalies;
    }

    /// Block transitions (imports excluded)
    pub fn block_transitions(&self) -> usize {
        self.created + self.modified + self.deleted + self.renamed + self.resurrected
    }
}

impl fmt::Display for ApplyCounters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} created, {} modified, {} deleted, {} renamed, {} resurrected | imports +{} -{} | {} anomalies",
            self.created,
            self.modified,
            self.deleted,
            self.renamed,
            self.resurrected,
            self.imports_added,
            self.imports_removed,
            self.anomalies
        )
    }
}

/// Applies one commit's events to the tracker and stages its writes
pub struct EventApplier<'a> {
    tracker: &'a mut StateTracker,
    resolver: &'a dyn FileIdentityResolver,
    commit: &'a CommitRecord,
    summary: String,
    batch: CommitBatch,
    /// Final row per touched block id, in first-touch order
    block_slots: HashMap<u64, usize>,
    /// One record per touched block id
    change_slots: HashMap<u64, usize>,
    import_slots: HashMap<String, usize>,
    counters: ApplyCounters,
}

impl<'a> EventApplier<'a> {
    pub fn new(
        tracker: &'a mut StateTracker,
        resolver: &'a dyn FileIdentityResolver,
        commit: &'a CommitRecord,
        parent_hash: &str,
        summary: &str,
    ) -> Self {
        let batch = CommitBatch::new(tracker.repo(), &commit.sha, commit.topo_index, parent_hash);
        Self {
            tracker,
            resolver,
            commit,
            summary: summary.to_string(),
            batch,
            block_slots: HashMap::new(),
            change_slots: HashMap::new(),
            import_slots: HashMap::new(),
            counters: ApplyCounters::default(),
        }
    }

    /// Applies all events in extraction order
    pub fn apply_all(&mut self, events: &[ChangeEvent]) {
        for event in events {
            self.apply(event);
        }
    }

    /// Applies a single event
    pub fn apply(&mut self, event: &ChangeEvent) {
        match event.kind {
            EventKind::CreateBlock => self.apply_create(event),
            EventKind::ModifyBlock => self.apply_modify(event),
            EventKind::DeleteBlock => self.apply_delete(event),
            EventKind::RenameBlock => self.apply_rename(event),
            EventKind::AddImport => self.apply_add_import(event),
            EventKind::RemoveImport => self.apply_remove_import(event),
        }
    }

    /// Consumes the applier, returning the staged batch and its counters
    pub fn finish(mut self) -> (CommitBatch, ApplyCounters) {
        self.batch.next_block_id = self.tracker.next_id();
        (self.batch, self.counters)
    }

    fn identity(&self, file: &str, name: &str) -> BlockIdentity {
        BlockIdentity::new(self.tracker.repo(), self.resolver.resolve(file), name)
    }

    // ── block transitions ───────────────────────────────────────────────────

    fn apply_create(&mut self, event: &ChangeEvent) {
        let identity = self.identity(&event.target_file, event.block_name());
        match self.tracker.state(&identity) {
            BlockState::Absent => {
                self.insert_new(identity, event);
            }
            BlockState::Active => {
                log::warn!(
                    "Duplicate create for live block {} in {}, treating as modify",
                    identity,
                    self.commit.short_sha()
                );
                self.counters.anomalies += 1;
                self.update_live(&identity, event);
            }
            BlockState::Deleted => {
                self.resurrect(&identity, event);
            }
        }
    }

    fn apply_modify(&mut self, event: &ChangeEvent) {
        let identity = self.identity(&event.target_file, event.block_name());
        match self.tracker.state(&identity) {
            BlockState::Active => self.update_live(&identity, event),
            BlockState::Absent => {
                log::warn!(
                    "Modify for unseen block {} in {}, synthesizing it",
                    identity,
                    self.commit.short_sha()
                );
                self.counters.anomalies += 1;
                self.insert_new(identity, event);
            }
            BlockState::Deleted => {
                log::warn!(
                    "Modify for deleted block {} in {}, resurrecting it",
                    identity,
                    self.commit.short_sha()
                );
                self.counters.anomalies += 1;
                self.resurrect(&identity, event);
            }
        }
    }

    fn apply_delete(&mut self, event: &ChangeEvent) {
        let identity = self.identity(&event.target_file, event.block_name());
        if self.tracker.state(&identity) != BlockState::Active {
            log::warn!(
                "Delete for block {} that is not live in {}, ignoring",
                identity,
                self.commit.short_sha()
            );
            self.counters.anomalies += 1;
            return;
        }
        self.mark_deleted(&identity, event);
    }

    fn apply_rename(&mut self, event: &ChangeEvent) {
        let new_identity = self.identity(&event.target_file, event.block_name());
        let old_file = event.old_file.as_deref().unwrap_or(&event.target_file);
        let old_name = event.old_block_name.as_deref().unwrap_or(event.block_name());
        let old_identity = self.identity(old_file, old_name);

        if old_identity == new_identity {
            // both paths resolve to one canonical file
            log::debug!("Rename of {} keeps its identity, applying as modify", new_identity);
            self.apply_modify(event);
            return;
        }

        let old_state = self.tracker.state(&old_identity);
        let new_state = self.tracker.state(&new_identity);
        match (old_state, new_state) {
            (BlockState::Active, BlockState::Active) => {
                log::warn!(
                    "Rename {} -> {} onto a live block in {}, retiring the source",
                    old_identity,
                    new_identity,
                    self.commit.short_sha()
                );
                self.counters.anomalies += 1;
                self.mark_deleted(&old_identity, event);
                self.update_live(&new_identity, event);
            }
            (BlockState::Active, _) => {
                self.move_block(&old_identity, new_identity, event);
            }
            (_, BlockState::Active) => {
                log::warn!(
                    "Rename source {} is not live in {}, treating as modify of {}",
                    old_identity,
                    self.commit.short_sha(),
                    new_identity
                );
                self.counters.anomalies += 1;
                self.update_live(&new_identity, event);
            }
            (_, BlockState::Deleted) => {
                log::warn!(
                    "Rename source {} is not live in {}, resurrecting {}",
                    old_identity,
                    self.commit.short_sha(),
                    new_identity
                );
                self.counters.anomalies += 1;
                self.resurrect(&new_identity, event);
            }
            (_, BlockState::Absent) => {
                log::warn!(
                    "Rename source {} is not live in {}, synthesizing {}",
                    old_identity,
                    self.commit.short_sha(),
                    new_identity
                );
                self.counters.anomalies += 1;
                self.insert_new(new_identity, event);
            }
        }
    }

    fn insert_new(&mut self, identity: BlockIdentity, event: &ChangeEvent) {
        let id = self.tracker.allocate_id();
        let mut block = CodeBlock {
            id,
            repo: identity.repo,
            canonical_path: identity.canonical_path,
            block_name: identity.block_name,
            path_at_creation: event.target_file.clone(),
            block_type: event.block_type.unwrap_or_default(),
            signature: None,
            start_line: None,
            end_line: None,
            language: detect_language(&event.target_file).to_string(),
            complexity: None,
            status: BlockStatus::Active,
            first_seen_sha: self.commit.sha.clone(),
            last_modified_sha: self.commit.sha.clone(),
            last_modified_at: self.commit.author_time,
        };
        self.absorb(&mut block, event);
        self.counters.created += 1;
        self.commit_block(block, ChangeType::Created, event, None);
    }

    fn update_live(&mut self, identity: &BlockIdentity, event: &ChangeEvent) {
        let Some(mut block) = self.tracker.get(identity).cloned() else {
            return;
        };
        self.absorb(&mut block, event);
        self.counters.modified += 1;
        self.commit_block(block, ChangeType::Modified, event, None);
    }

    fn resurrect(&mut self, identity: &BlockIdentity, event: &ChangeEvent) {
        let Some(mut block) = self.tracker.get(identity).cloned() else {
            return;
        };
        log::info!(
            "Block {} (#{}) reappears in {}, relinking its history",
            identity,
            block.id,
            self.commit.short_sha()
        );
        block.status = BlockStatus::Active;
        self.absorb(&mut block, event);
        self.counters.resurrected += 1;
        self.commit_block(block, ChangeType::Created, event, None);
    }

    fn mark_deleted(&mut self, identity: &BlockIdentity, event: &ChangeEvent) {
        let Some(mut block) = self.tracker.get(identity).cloned() else {
            return;
        };
        block.status = BlockStatus::Deleted;
        block.last_modified_sha = self.commit.sha.clone();
        block.last_modified_at = self.commit.author_time;
        self.counters.deleted += 1;
        self.commit_block(block, ChangeType::Deleted, event, None);
    }

    fn move_block(&mut self, from: &BlockIdentity, to: BlockIdentity, event: &ChangeEvent) {
        let Some(mut block) = self.tracker.remove(from) else {
            return;
        };
        block.canonical_path = to.canonical_path;
        block.block_name = to.block_name;
        self.absorb(&mut block, event);
        self.counters.renamed += 1;
        self.commit_block(block, ChangeType::Renamed, event, Some(from.to_string()));
    }

    /// Copies the mutable attributes an event carries onto a block
    fn absorb(&self, block: &mut CodeBlock, event: &ChangeEvent) {
        if let Some(block_type) = event.block_type {
            block.block_type = block_type;
        }
        if event.signature.is_some() {
            block.signature = event.signature.clone();
        }
        if event.start_line.is_some() {
            block.start_line = event.start_line;
        }
        if event.end_line.is_some() {
            block.end_line = event.end_line;
        }
        if event.complexity.is_some() {
            block.complexity = event.complexity;
        }
        block.last_modified_sha = self.commit.sha.clone();
        block.last_modified_at = self.commit.author_time;
    }

    /// Puts the block back into the tracker, stages its row and its record
    fn commit_block(
        &mut self,
        block: CodeBlock,
        change_type: ChangeType,
        event: &ChangeEvent,
        old_name: Option<String>,
    ) {
        let (lines_added, lines_deleted) = event.line_delta();
        let change = CodeBlockChange {
            repo: block.repo.clone(),
            commit_sha: self.commit.sha.clone(),
            topo_index: self.commit.topo_index,
            block_id: block.id,
            canonical_path: block.canonical_path.clone(),
            commit_time_path: event.target_file.clone(),
            block_name: block.block_name.clone(),
            block_type: block.block_type,
            change_type,
            old_name,
            lines_added,
            lines_deleted,
            summary: self.summary.clone(),
            timestamp: self.commit.author_time,
        };

        match self.change_slots.get(&block.id) {
            Some(&slot) => self.batch.changes[slot].fold(change),
            None => {
                self.change_slots.insert(block.id, self.batch.changes.len());
                self.batch.changes.push(change);
            }
        }

        match self.block_slots.get(&block.id) {
            Some(&slot) => self.batch.blocks[slot] = block.clone(),
            None => {
                self.block_slots.insert(block.id, self.batch.blocks.len());
                self.batch.blocks.push(block.clone());
            }
        }

        self.tracker.put(block);
    }

    // ── imports ─────────────────────────────────────────────────────────────

    fn apply_add_import(&mut self, event: &ChangeEvent) {
        let Some(dependency) = event.dependency_path.as_deref() else {
            return;
        };
        let source = self.resolver.resolve(&event.target_file);
        if self
            .tracker
            .import(&source, dependency)
            .is_some_and(|edge| edge.is_live())
        {
            log::debug!("Import {} -> {} already present", source, dependency);
            return;
        }

        let edge = ImportEdge {
            repo: self.tracker.repo().to_string(),
            source_path: source,
            dependency_path: dependency.to_string(),
            added_in: self.commit.sha.clone(),
            removed_in: None,
        };
        self.counters.imports_added += 1;
        self.stage_import(edge);
    }

    fn apply_remove_import(&mut self, event: &ChangeEvent) {
        let Some(dependency) = event.dependency_path.as_deref() else {
            return;
        };
        let source = self.resolver.resolve(&event.target_file);
        let Some(mut edge) = self
            .tracker
            .import(&source, dependency)
            .filter(|edge| edge.is_live())
            .cloned()
        else {
            log::debug!("Import {} -> {} not present, nothing to remove", source, dependency);
            return;
        };

        edge.removed_in = Some(self.commit.sha.clone());
        self.counters.imports_removed += 1;
        self.stage_import(edge);
    }

    fn stage_import(&mut self, edge: ImportEdge) {
        let key = edge.key();
        match self.import_slots.get(&key) {
            Some(&slot) => self.batch.imports[slot] = edge.clone(),
            None => {
                self.import_slots.insert(key, self.batch.imports.len());
                self.batch.imports.push(edge.clone());
            }
        }
        self.tracker.put_import(edge);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use atomizer_core::identity::PathIdentity;
    use atomizer_core::BlockType;

    fn commit(sha: &str, topo_index: u64) -> CommitRecord {
        CommitRecord {
            sha: sha.to_string(),
            parents: vec![],
            author_email: "dev@example.com".to_string(),
            message: String::new(),
            author_time: 1_700_000_000 + topo_index as i64,
            commit_time: 1_700_000_000 + topo_index as i64,
            topo_index,
        }
    }

    fn apply(
        tracker: &mut StateTracker,
        sha: &str,
        topo_index: u64,
        events: &[ChangeEvent],
    ) -> (CommitBatch, ApplyCounters) {
        let record = commit(sha, topo_index);
        let mut applier = EventApplier::new(tracker, &PathIdentity, &record, "", "summary");
        applier.apply_all(events);
        applier.finish()
    }

    fn identity(path: &str, name: &str) -> BlockIdentity {
        BlockIdentity::new("acme/app", path, name)
    }

    #[test]
    fn test_create_then_modify_in_one_commit_folds() {
        let mut tracker = StateTracker::new("acme/app", 1);
        let (batch, counters) = apply(
            &mut tracker,
            "c1",
            0,
            &[
                ChangeEvent::create("a.py", "f").with_lines(1, 5),
                ChangeEvent::modify("a.py", "f").with_lines(1, 8),
            ],
        );

        assert_eq!(batch.blocks.len(), 1);
        assert_eq!(batch.changes.len(), 1);
        assert_eq!(batch.changes[0].change_type, ChangeType::Created);
        assert_eq!(batch.blocks[0].end_line, Some(8));
        assert_eq!(counters.created, 1);
        assert_eq!(counters.modified, 1);
        assert_eq!(batch.next_block_id, 2);
    }

    #[test]
    fn test_duplicate_create_becomes_modify() {
        let mut tracker = StateTracker::new("acme/app", 1);
        apply(&mut tracker, "c1", 0, &[ChangeEvent::create("a.py", "f")]);
        let (batch, counters) = apply(&mut tracker, "c2", 1, &[ChangeEvent::create("a.py", "f")]);

        assert_eq!(batch.changes[0].change_type, ChangeType::Modified);
        assert_eq!(batch.changes[0].block_id, 1);
        assert_eq!(counters.anomalies, 1);
        assert_eq!(tracker.active_count(), 1);
    }

    #[test]
    fn test_orphan_modify_synthesizes_block() {
        let mut tracker = StateTracker::new("acme/app", 1);
        let (batch, _) = apply(
            &mut tracker,
            "c1",
            0,
            &[ChangeEvent::modify("svc.go", "Run")
                .with_type(BlockType::Method)
                .with_signature("func (s *Svc) Run()")],
        );

        assert_eq!(batch.changes.len(), 1);
        assert_eq!(batch.changes[0].change_type, ChangeType::Created);
        let block = tracker.get(&identity("svc.go", "Run")).unwrap();
        assert_eq!(block.block_type, BlockType::Method);
        assert_eq!(block.language, "go");
        assert_eq!(block.first_seen_sha, "c1");
    }

    #[test]
    fn test_delete_of_unknown_block_is_noop() {
        let mut tracker = StateTracker::new("acme/app", 1);
        let (batch, counters) = apply(&mut tracker, "c1", 0, &[ChangeEvent::delete("a.py", "f")]);

        assert!(batch.is_empty());
        assert_eq!(counters.anomalies, 1);
        assert!(tracker.is_empty());
        assert_eq!(batch.next_block_id, 1);
    }

    #[test]
    fn test_resurrection_keeps_id() {
        let mut tracker = StateTracker::new("acme/app", 1);
        apply(&mut tracker, "c1", 0, &[ChangeEvent::create("a.py", "f")]);
        apply(&mut tracker, "c2", 1, &[ChangeEvent::delete("a.py", "f")]);
        assert_eq!(tracker.state(&identity("a.py", "f")), BlockState::Deleted);

        let (batch, counters) = apply(&mut tracker, "c3", 2, &[ChangeEvent::create("a.py", "f")]);
        assert_eq!(batch.changes[0].change_type, ChangeType::Created);
        assert_eq!(batch.changes[0].block_id, 1);
        assert_eq!(counters.resurrected, 1);

        let block = tracker.get(&identity("a.py", "f")).unwrap();
        assert!(block.is_active());
        assert_eq!(block.first_seen_sha, "c1");
    }

    #[test]
    fn test_rename_moves_identity_and_keeps_id() {
        let mut tracker = StateTracker::new("acme/app", 1);
        apply(&mut tracker, "c1", 0, &[ChangeEvent::create("utils.py", "helper")]);
        let (batch, counters) = apply(
            &mut tracker,
            "c2",
            1,
            &[ChangeEvent::rename("utils.py", "helper", "helpers.py", "helper_v2")],
        );

        assert_eq!(counters.renamed, 1);
        assert_eq!(batch.changes[0].change_type, ChangeType::Renamed);
        assert_eq!(batch.changes[0].old_name.as_deref(), Some("utils.py:helper"));
        assert_eq!(tracker.state(&identity("utils.py", "helper")), BlockState::Absent);
        assert_eq!(tracker.get(&identity("helpers.py", "helper_v2")).unwrap().id, 1);
    }

    #[test]
    fn test_rename_onto_live_block_retires_source() {
        let mut tracker = StateTracker::new("acme/app", 1);
        apply(
            &mut tracker,
            "c1",
            0,
            &[ChangeEvent::create("a.py", "f"), ChangeEvent::create("a.py", "g")],
        );
        let (batch, counters) = apply(&mut tracker, "c2", 1, &[ChangeEvent::rename("a.py", "f", "a.py", "g")]);

        assert_eq!(batch.changes.len(), 2);
        assert_eq!(batch.changes[0].change_type, ChangeType::Deleted);
        assert_eq!(batch.changes[1].change_type, ChangeType::Modified);
        assert_eq!(counters.anomalies, 1);
        assert_eq!(tracker.active_count(), 1);
    }

    #[test]
    fn test_rename_without_source_synthesizes_target() {
        let mut tracker = StateTracker::new("acme/app", 1);
        let (batch, _) = apply(&mut tracker, "c1", 0, &[ChangeEvent::rename("a.py", "old", "a.py", "new")]);

        assert_eq!(batch.changes[0].change_type, ChangeType::Created);
        assert_eq!(tracker.state(&identity("a.py", "new")), BlockState::Active);
    }

    #[test]
    fn test_imports() {
        let mut tracker = StateTracker::new("acme/app", 1);
        let (batch, counters) = apply(
            &mut tracker,
            "c1",
            0,
            &[
                ChangeEvent::add_import("a.py", "os"),
                ChangeEvent::add_import("a.py", "os"),
                ChangeEvent::remove_import("a.py", "sys"),
            ],
        );
        assert_eq!(batch.imports.len(), 1);
        assert_eq!(counters.imports_added, 1);
        assert_eq!(counters.imports_removed, 0);
        assert!(batch.blocks.is_empty());

        let (batch, _) = apply(&mut tracker, "c2", 1, &[ChangeEvent::remove_import("a.py", "os")]);
        assert_eq!(batch.imports[0].removed_in.as_deref(), Some("c2"));
    }

    #[test]
    fn test_line_delta_from_snippets() {
        let mut tracker = StateTracker::new("acme/app", 1);
        apply(&mut tracker, "c1", 0, &[ChangeEvent::create("a.py", "f")]);
        let (batch, _) = apply(
            &mut tracker,
            "c2",
            1,
            &[ChangeEvent::modify("a.py", "f").with_snippets("a\nb", "a\nb\nc\nd")],
        );
        assert_eq!(batch.changes[0].lines_added, 2);
        assert_eq!(batch.changes[0].lines_deleted, 0);
    }
}
