//! Transactional block ledger
//!
//! The ledger is the source of truth for blocks, change records, import
//! edges and commit checkpoints. All writes of one commit go through
//! [`LedgerDb::apply_commit`], a single multi-tree sled transaction.

use anyhow::{Context, Result};
use atomizer_core::{BlockIdentity, CodeBlock, CodeBlockChange, ImportEdge, KEY_SEPARATOR};
use serde::de::DeserializeOwned;
use serde::Serialize;
use sled::transaction::{ConflictableTransactionError, TransactionError};
use sled::{Db, Transactional};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crate::batch::{AppliedCommit, CommitBatch, FailedCommit};
use crate::error::LedgerError;

const NEXT_BLOCK_ID: &[u8] = b"next_block_id";

// ---------------------------------------------------------------------------
// Row encoding
// ---------------------------------------------------------------------------

/// Serialize a row into compact binary bytes.
fn pack<T: Serialize>(row: &T) -> Result<Vec<u8>> {
    bincode::serialize(row).context("Failed to serialize ledger row")
}

/// Deserialize a row from compact binary bytes.
fn unpack<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    bincode::deserialize(bytes).context("Failed to deserialize ledger row")
}

fn decode_id(bytes: &[u8]) -> Option<u64> {
    let raw: [u8; 8] = bytes.try_into().ok()?;
    Some(u64::from_be_bytes(raw))
}

/// Key for per-commit rows: "repo␟sha"
fn commit_key(repo: &str, sha: &str) -> String {
    format!("{}{}{}", repo, KEY_SEPARATOR, sha)
}

/// Change rows sort by block, then topological position
fn change_key(change: &CodeBlockChange) -> Vec<u8> {
    let mut key = Vec::with_capacity(16 + change.commit_sha.len());
    key.extend_from_slice(&change.block_id.to_be_bytes());
    key.extend_from_slice(&change.topo_index.to_be_bytes());
    key.extend_from_slice(change.commit_sha.as_bytes());
    key
}

/// Secondary index key: "repo␟sha␟" + block id
fn commit_change_key(repo: &str, sha: &str, block_id: u64) -> Vec<u8> {
    let mut key = commit_key(repo, sha).into_bytes();
    key.push(KEY_SEPARATOR as u8);
    key.extend_from_slice(&block_id.to_be_bytes());
    key
}

fn corrupt(tree: &'static str, err: anyhow::Error) -> ConflictableTransactionError<LedgerError> {
    ConflictableTransactionError::Abort(LedgerError::CorruptRow {
        tree,
        detail: format!("{:#}", err),
    })
}

/// Counters over the ledger contents
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LedgerStats {
    pub blocks: usize,
    pub active_blocks: usize,
    pub changes: usize,
    pub import_edges: usize,
    pub processed_commits: usize,
    pub failed_commits: usize,
}

/// Main structure managing the ledger database
pub struct LedgerDb {
    /// Block rows (key: block id, big-endian)
    blocks: sled::Tree,

    /// Identity index (key: "repo␟path␟name", value: block id)
    identities: sled::Tree,

    /// Change records (key: block id + topo index + sha)
    changes: sled::Tree,

    /// Change lookup by commit (key: "repo␟sha␟" + block id, value: change key)
    commit_changes: sled::Tree,

    /// Import edges (key: "repo␟source␟dependency")
    import_edges: sled::Tree,

    /// Commits whose writes are durable, with their parent hash
    applied_commits: sled::Tree,

    /// Commits fully processed (ledger written, graph attempted)
    processed_commits: sled::Tree,

    /// Commits whose extraction failed
    failed_commits: sled::Tree,

    /// Counters
    meta: sled::Tree,

    /// Sled database instance
    db: Db,

    /// Path to the database directory (for size calculation)
    path: PathBuf,
}

impl LedgerDb {
    /// Opens or creates a ledger at the specified location
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let db = sled::open(path.as_ref())
            .with_context(|| format!("Failed to open ledger at {:?}", path.as_ref()))?;

        let open = |name: &str| {
            db.open_tree(name)
                .with_context(|| format!("Failed to open {} tree", name))
        };

        Ok(Self {
            blocks: open("blocks")?,
            identities: open("identities")?,
            changes: open("changes")?,
            commit_changes: open("commit_changes")?,
            import_edges: open("import_edges")?,
            applied_commits: open("applied_commits")?,
            processed_commits: open("processed_commits")?,
            failed_commits: open("failed_commits")?,
            meta: open("meta")?,
            path: path.as_ref().to_path_buf(),
            db,
        })
    }

    // ── commit transaction ──────────────────────────────────────────────────

    /// Durably applies every write of one commit, or none of them.
    ///
    /// Enforces identity uniqueness: writing a live block under an identity
    /// already held by a different live block aborts with
    /// [`LedgerError::DuplicateIdentity`].
    pub fn apply_commit(&self, batch: &CommitBatch) -> Result<()> {
        let mut block_rows = Vec::with_capacity(batch.blocks.len());
        for block in &batch.blocks {
            block_rows.push((block.id, block.identity().key(), block.is_active(), pack(block)?));
        }

        let mut change_rows = Vec::with_capacity(batch.changes.len());
        for change in &batch.changes {
            let key = change_key(change);
            let index_key = commit_change_key(&batch.repo, &batch.commit_sha, change.block_id);
            change_rows.push((key, index_key, pack(change)?));
        }

        let mut import_rows = Vec::with_capacity(batch.imports.len());
        for edge in &batch.imports {
            import_rows.push((edge.key(), pack(edge)?));
        }

        let applied_key = commit_key(&batch.repo, &batch.commit_sha);
        let applied_row = pack(&AppliedCommit {
            topo_index: batch.topo_index,
            parent_hash: batch.parent_hash.clone(),
            change_count: batch.changes.len() as u32,
        })?;

        let result = (
            &self.blocks,
            &self.identities,
            &self.changes,
            &self.commit_changes,
            &self.import_edges,
            &self.applied_commits,
            &self.meta,
        )
            .transaction(|(blocks, identities, changes, commit_changes, imports, applied, meta)| {
                // Pass 1: write block rows and drop index entries they moved away from
                for (id, identity_key, _, row) in &block_rows {
                    let id_bytes = id.to_be_bytes();
                    if let Some(previous) = blocks.get(&id_bytes[..])? {
                        let previous: CodeBlock =
                            unpack(&previous).map_err(|e| corrupt("blocks", e))?;
                        let previous_key = previous.identity().key();
                        if previous_key != *identity_key {
                            let owner = identities.get(previous_key.as_bytes())?;
                            if owner.as_deref() == Some(&id_bytes[..]) {
                                identities.remove(previous_key.as_bytes())?;
                            }
                        }
                    }
                    blocks.insert(&id_bytes[..], row.as_slice())?;
                }

                // Pass 2: claim identities, one live block per identity
                for (id, identity_key, active, _) in &block_rows {
                    if let Some(owner) = identities.get(identity_key.as_bytes())? {
                        let owner_id = decode_id(&owner).ok_or_else(|| {
                            ConflictableTransactionError::Abort(LedgerError::CorruptRow {
                                tree: "identities",
                                detail: format!("bad block id for {}", identity_key),
                            })
                        })?;
                        if owner_id != *id {
                            if let Some(owner_row) = blocks.get(&owner_id.to_be_bytes()[..])? {
                                let owner_block: CodeBlock =
                                    unpack(&owner_row).map_err(|e| corrupt("blocks", e))?;
                                let owner_holds = owner_block.is_active()
                                    && owner_block.identity().key() == *identity_key;
                                if owner_holds && *active {
                                    return Err(ConflictableTransactionError::Abort(
                                        LedgerError::DuplicateIdentity {
                                            identity: identity_key
                                                .replace(KEY_SEPARATOR, ":"),
                                            existing: owner_id,
                                            incoming: *id,
                                        },
                                    ));
                                }
                                if owner_holds {
                                    // deleted row never displaces a live one
                                    continue;
                                }
                            }
                        }
                    }
                    identities.insert(identity_key.as_bytes(), &id.to_be_bytes()[..])?;
                }

                for (key, index_key, row) in &change_rows {
                    changes.insert(key.as_slice(), row.as_slice())?;
                    commit_changes.insert(index_key.as_slice(), key.as_slice())?;
                }

                for (key, row) in &import_rows {
                    imports.insert(key.as_bytes(), row.as_slice())?;
                }

                let stored_next = meta
                    .get(NEXT_BLOCK_ID)?
                    .and_then(|v| decode_id(&v))
                    .unwrap_or(1);
                let next = stored_next.max(batch.next_block_id);
                meta.insert(NEXT_BLOCK_ID, &next.to_be_bytes()[..])?;

                applied.insert(applied_key.as_bytes(), applied_row.as_slice())?;
                Ok(())
            });

        match result {
            Ok(()) => Ok(()),
            Err(TransactionError::Abort(e)) => Err(anyhow::Error::new(e).context(format!(
                "Ledger transaction aborted for commit {}",
                batch.commit_sha
            ))),
            Err(TransactionError::Storage(e)) => Err(anyhow::Error::new(e).context(format!(
                "Ledger storage error for commit {}",
                batch.commit_sha
            ))),
        }
    }

    /// First block id not yet handed out
    pub fn next_block_id(&self) -> Result<u64> {
        let stored = self
            .meta
            .get(NEXT_BLOCK_ID)
            .context("Failed to read block id counter")?;
        Ok(stored.and_then(|v| decode_id(&v)).unwrap_or(1))
    }

    // ── blocks ──────────────────────────────────────────────────────────────

    /// Retrieves the block currently holding an identity
    pub fn get_block(&self, identity: &BlockIdentity) -> Result<Option<CodeBlock>> {
        match self.identities.get(identity.key().as_bytes())? {
            Some(id) => match decode_id(&id) {
                Some(id) => self.get_block_by_id(id),
                None => Ok(None),
            },
            None => Ok(None),
        }
    }

    /// Retrieves a block row by id
    pub fn get_block_by_id(&self, id: u64) -> Result<Option<CodeBlock>> {
        match self.blocks.get(id.to_be_bytes())? {
            Some(bytes) => Ok(Some(unpack(&bytes).context("Failed to deserialize CodeBlock")?)),
            None => Ok(None),
        }
    }

    /// Every indexed block of one file (live and deleted), sorted by name
    pub fn blocks_in_file(&self, repo: &str, canonical_path: &str) -> Result<Vec<CodeBlock>> {
        let prefix = BlockIdentity::file_prefix(repo, canonical_path);
        let mut results = self.scan_identities(prefix.as_bytes())?;
        results.sort_by(|a, b| a.block_name.cmp(&b.block_name));
        Ok(results)
    }

    /// Every indexed block of one repository (live and deleted)
    pub fn blocks_for_repo(&self, repo: &str) -> Result<Vec<CodeBlock>> {
        self.scan_identities(BlockIdentity::repo_prefix(repo).as_bytes())
    }

    fn scan_identities(&self, prefix: &[u8]) -> Result<Vec<CodeBlock>> {
        let mut results = Vec::new();
        for item in self.identities.scan_prefix(prefix) {
            let (_, id) = item.context("Failed to read from ledger")?;
            let Some(id) = decode_id(&id) else {
                log::warn!("Skipping corrupt identity index entry");
                continue;
            };
            if let Some(block) = self.get_block_by_id(id)? {
                results.push(block);
            }
        }
        Ok(results)
    }

    // ── changes ─────────────────────────────────────────────────────────────

    /// Change history of a block, in topological order
    pub fn changes_for_block(&self, block_id: u64) -> Result<Vec<CodeBlockChange>> {
        let mut results = Vec::new();
        for item in self.changes.scan_prefix(block_id.to_be_bytes()) {
            let (_, value) = item.context("Failed to read from ledger")?;
            results.push(unpack(&value).context("Failed to deserialize CodeBlockChange")?);
        }
        Ok(results)
    }

    /// Change records written by one commit
    pub fn changes_for_commit(&self, repo: &str, sha: &str) -> Result<Vec<CodeBlockChange>> {
        let mut prefix = commit_key(repo, sha).into_bytes();
        prefix.push(KEY_SEPARATOR as u8);

        let mut results = Vec::new();
        for item in self.commit_changes.scan_prefix(prefix) {
            let (_, change_key) = item.context("Failed to read from ledger")?;
            if let Some(value) = self.changes.get(&change_key)? {
                results.push(unpack(&value).context("Failed to deserialize CodeBlockChange")?);
            }
        }
        Ok(results)
    }

    // ── imports ─────────────────────────────────────────────────────────────

    /// Every import edge of a repository, live and removed
    pub fn import_edges(&self, repo: &str) -> Result<Vec<ImportEdge>> {
        let mut results = Vec::new();
        for item in self
            .import_edges
            .scan_prefix(BlockIdentity::repo_prefix(repo).as_bytes())
        {
            let (_, value) = item.context("Failed to read from ledger")?;
            results.push(unpack(&value).context("Failed to deserialize ImportEdge")?);
        }
        Ok(results)
    }

    // ── checkpoints ─────────────────────────────────────────────────────────

    /// Returns the applied marker of a commit, if its writes are durable
    pub fn applied_commit(&self, repo: &str, sha: &str) -> Result<Option<AppliedCommit>> {
        match self.applied_commits.get(commit_key(repo, sha).as_bytes())? {
            Some(bytes) => Ok(Some(unpack(&bytes).context("Failed to deserialize AppliedCommit")?)),
            None => Ok(None),
        }
    }

    /// Every applied commit of a repository as (sha, marker)
    pub fn applied_commits(&self, repo: &str) -> Result<Vec<(String, AppliedCommit)>> {
        let prefix = BlockIdentity::repo_prefix(repo);
        let mut results = Vec::new();
        for item in self.applied_commits.scan_prefix(prefix.as_bytes()) {
            let (key, value) = item.context("Failed to read from ledger")?;
            let sha = String::from_utf8_lossy(&key[prefix.len()..]).into_owned();
            results.push((sha, unpack(&value).context("Failed to deserialize AppliedCommit")?));
        }
        Ok(results)
    }

    /// Marks a commit as processed
    pub fn mark_commit_processed(&self, repo: &str, sha: &str, timestamp: i64) -> Result<()> {
        self.processed_commits
            .insert(commit_key(repo, sha).as_bytes(), &timestamp.to_le_bytes()[..])
            .context("Failed to mark commit as processed")?;
        Ok(())
    }

    /// Checks if a commit has already been processed
    pub fn is_commit_processed(&self, repo: &str, sha: &str) -> Result<bool> {
        Ok(self
            .processed_commits
            .contains_key(commit_key(repo, sha).as_bytes())?)
    }

    /// SHAs of every processed commit of a repository
    pub fn processed_commits(&self, repo: &str) -> Result<HashSet<String>> {
        let prefix = BlockIdentity::repo_prefix(repo);
        let mut results = HashSet::new();
        for item in self.processed_commits.scan_prefix(prefix.as_bytes()).keys() {
            let key = item.context("Failed to read from ledger")?;
            results.insert(String::from_utf8_lossy(&key[prefix.len()..]).into_owned());
        }
        Ok(results)
    }

    /// Records an extraction failure; the commit stays unprocessed
    pub fn record_failure(&self, repo: &str, sha: &str, failure: &FailedCommit) -> Result<()> {
        self.failed_commits
            .insert(commit_key(repo, sha).as_bytes(), pack(failure)?)
            .context("Failed to record commit failure")?;
        Ok(())
    }

    /// Clears a failure entry after the commit succeeded
    pub fn clear_failure(&self, repo: &str, sha: &str) -> Result<()> {
        self.failed_commits
            .remove(commit_key(repo, sha).as_bytes())
            .context("Failed to clear commit failure")?;
        Ok(())
    }

    /// Every recorded failure of a repository as (sha, failure)
    pub fn failed_commits(&self, repo: &str) -> Result<Vec<(String, FailedCommit)>> {
        let prefix = BlockIdentity::repo_prefix(repo);
        let mut results: Vec<(String, FailedCommit)> = Vec::new();
        for item in self.failed_commits.scan_prefix(prefix.as_bytes()) {
            let (key, value) = item.context("Failed to read from ledger")?;
            let sha = String::from_utf8_lossy(&key[prefix.len()..]).into_owned();
            results.push((sha, unpack(&value).context("Failed to deserialize FailedCommit")?));
        }
        results.sort_by_key(|(_, f)| f.topo_index);
        Ok(results)
    }

    // ── maintenance ─────────────────────────────────────────────────────────

    /// Removes every row of a repository: blocks, changes, edges and checkpoints.
    /// Returns the number of blocks removed.
    pub fn clear_repo(&self, repo: &str) -> Result<usize> {
        let prefix = BlockIdentity::repo_prefix(repo);

        let mut block_keys = Vec::new();
        for item in self.blocks.iter() {
            let (key, value) = item.context("Failed to read from ledger")?;
            let block: CodeBlock = unpack(&value).context("Failed to deserialize CodeBlock")?;
            if block.repo == repo {
                block_keys.push(key);
            }
        }

        let mut change_keys = Vec::new();
        for item in self.changes.iter() {
            let (key, value) = item.context("Failed to read from ledger")?;
            let change: CodeBlockChange =
                unpack(&value).context("Failed to deserialize CodeBlockChange")?;
            if change.repo == repo {
                change_keys.push(key);
            }
        }

        for key in &block_keys {
            self.blocks.remove(key)?;
        }
        for key in &change_keys {
            self.changes.remove(key)?;
        }

        for tree in [
            &self.identities,
            &self.commit_changes,
            &self.import_edges,
            &self.applied_commits,
            &self.processed_commits,
            &self.failed_commits,
        ] {
            let keys: Vec<_> = tree
                .scan_prefix(prefix.as_bytes())
                .keys()
                .collect::<Result<_, _>>()
                .context("Failed to read from ledger")?;
            for key in keys {
                tree.remove(key)?;
            }
        }

        self.flush()?;
        log::info!(
            "Cleared {} blocks and {} change records of {}",
            block_keys.len(),
            change_keys.len(),
            repo
        );
        Ok(block_keys.len())
    }

    // ── counters ────────────────────────────────────────────────────────────

    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    pub fn change_count(&self) -> usize {
        self.changes.len()
    }

    pub fn processed_commit_count(&self) -> usize {
        self.processed_commits.len()
    }

    pub fn failed_commit_count(&self) -> usize {
        self.failed_commits.len()
    }

    /// Checks if the ledger is empty (nothing atomized yet)
    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Counters for one repository
    pub fn repo_stats(&self, repo: &str) -> Result<LedgerStats> {
        let blocks = self.blocks_for_repo(repo)?;
        let mut changes = 0;
        for block in &blocks {
            changes += self.changes.scan_prefix(block.id.to_be_bytes()).count();
        }
        Ok(LedgerStats {
            active_blocks: blocks.iter().filter(|b| b.is_active()).count(),
            blocks: blocks.len(),
            changes,
            import_edges: self.import_edges(repo)?.len(),
            processed_commits: self.processed_commits(repo)?.len(),
            failed_commits: self.failed_commits(repo)?.len(),
        })
    }

    /// Counters over the whole ledger
    pub fn stats(&self) -> Result<LedgerStats> {
        let mut active_blocks = 0;
        for item in self.blocks.iter() {
            let (_, value) = item.context("Failed to read from ledger")?;
            let block: CodeBlock = unpack(&value).context("Failed to deserialize CodeBlock")?;
            if block.is_active() {
                active_blocks += 1;
            }
        }
        Ok(LedgerStats {
            blocks: self.block_count(),
            active_blocks,
            changes: self.change_count(),
            import_edges: self.import_edges.len(),
            processed_commits: self.processed_commit_count(),
            failed_commits: self.failed_commit_count(),
        })
    }

    /// Returns total on-disk size of the ledger directory in bytes.
    pub fn db_size_bytes(&self) -> u64 {
        fn dir_size(path: &Path) -> u64 {
            let Ok(entries) = std::fs::read_dir(path) else { return 0; };
            entries
                .flatten()
                .map(|e| {
                    let p = e.path();
                    if p.is_dir() {
                        dir_size(&p)
                    } else {
                        e.metadata().map(|m| m.len()).unwrap_or(0)
                    }
                })
                .sum()
        }
        dir_size(&self.path)
    }

    /// Flushes all pending operations to disk
    pub fn flush(&self) -> Result<()> {
        self.db.flush().context("Failed to flush ledger")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use atomizer_core::{BlockStatus, BlockType, ChangeType};
    use tempfile::TempDir;

    fn block(id: u64, path: &str, name: &str) -> CodeBlock {
        CodeBlock {
            id,
            repo: "r".to_string(),
            canonical_path: path.to_string(),
            block_name: name.to_string(),
            path_at_creation: path.to_string(),
            block_type: BlockType::Function,
            signature: None,
            start_line: Some(1),
            end_line: Some(5),
            language: "python".to_string(),
            complexity: None,
            status: BlockStatus::Active,
            first_seen_sha: "c1".to_string(),
            last_modified_sha: "c1".to_string(),
            last_modified_at: 0,
        }
    }

    fn created(b: &CodeBlock, sha: &str, topo: u64) -> CodeBlockChange {
        CodeBlockChange {
            repo: b.repo.clone(),
            commit_sha: sha.to_string(),
            topo_index: topo,
            block_id: b.id,
            canonical_path: b.canonical_path.clone(),
            commit_time_path: b.canonical_path.clone(),
            block_name: b.block_name.clone(),
            block_type: b.block_type,
            change_type: ChangeType::Created,
            old_name: None,
            lines_added: 0,
            lines_deleted: 0,
            summary: String::new(),
            timestamp: 0,
        }
    }

    #[test]
    fn test_apply_commit_writes_all_rows() -> Result<()> {
        let tmp = TempDir::new()?;
        let db = LedgerDb::open(tmp.path())?;

        let b = block(1, "a.py", "foo");
        let mut batch = CommitBatch::new("r", "c1", 0, "h0");
        batch.changes.push(created(&b, "c1", 0));
        batch.blocks.push(b.clone());
        batch.next_block_id = 2;
        db.apply_commit(&batch)?;

        assert_eq!(db.get_block(&b.identity())?, Some(b));
        assert_eq!(db.changes_for_commit("r", "c1")?.len(), 1);
        assert_eq!(db.next_block_id()?, 2);
        assert!(db.applied_commit("r", "c1")?.is_some());
        assert!(!db.is_commit_processed("r", "c1")?);
        Ok(())
    }

    #[test]
    fn test_duplicate_identity_aborts_whole_commit() -> Result<()> {
        let tmp = TempDir::new()?;
        let db = LedgerDb::open(tmp.path())?;

        let mut first = CommitBatch::new("r", "c1", 0, "h0");
        first.blocks.push(block(1, "a.py", "foo"));
        db.apply_commit(&first)?;

        let mut second = CommitBatch::new("r", "c2", 1, "h1");
        second.blocks.push(block(2, "b.py", "bar"));
        second.blocks.push(block(3, "a.py", "foo"));
        let err = db.apply_commit(&second).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<LedgerError>(),
            Some(LedgerError::DuplicateIdentity { existing: 1, incoming: 3, .. })
        ));

        // nothing of the aborted commit is durable
        assert!(db.get_block_by_id(2)?.is_none());
        assert!(db.applied_commit("r", "c2")?.is_none());
        Ok(())
    }
}
