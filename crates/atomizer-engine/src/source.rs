//! Commit sources
//!
//! A commit source hands out the full history in replay order and loads a
//! commit's diff on demand. [`crate::git::GitHistory`] reads a real
//! repository; [`ScriptedHistory`] is an in-memory history for tests.

use std::collections::HashMap;

use anyhow::{anyhow, Result};
use atomizer_core::{CommitRecord, FileDiff};
use data_encoding::HEXLOWER;
use sha2::{Digest, Sha256};

use crate::error::OrderingError;

/// Ordered commit history with per-commit diffs
pub trait CommitSource {
    /// Every commit, ancestors before descendants, `topo_index` = position
    fn commits(&self) -> Result<Vec<CommitRecord>, OrderingError>;

    /// Per-file diff of a commit against its first parent
    fn load_diff(&self, commit: &CommitRecord) -> Result<Vec<FileDiff>>;
}

/// SHA-256 over the parent SHAs joined by `\n`, lowercase hex
pub fn parent_hash(parents: &[String]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(parents.join("\n").as_bytes());
    HEXLOWER.encode(&hasher.finalize())
}

/// Checks that every parent present in `commits` comes before its child.
/// Parents outside the list (shallow history) are ignored.
pub fn verify_topology(commits: &[CommitRecord]) -> Result<(), OrderingError> {
    let positions: HashMap<&str, usize> = commits
        .iter()
        .enumerate()
        .map(|(i, c)| (c.sha.as_str(), i))
        .collect();

    for (i, commit) in commits.iter().enumerate() {
        if commit.topo_index != i as u64 {
            return Err(OrderingError::Walk(format!(
                "commit {} has topological index {} at position {}",
                commit.short_sha(),
                commit.topo_index,
                i
            )));
        }
        for parent in &commit.parents {
            if let Some(&p) = positions.get(parent.as_str()) {
                if p >= i {
                    return Err(OrderingError::Topology {
                        commit: commit.sha.clone(),
                        parent: parent.clone(),
                    });
                }
            }
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// ScriptedHistory
// ---------------------------------------------------------------------------

/// In-memory commit history built commit by commit
#[derive(Debug, Clone, Default)]
pub struct ScriptedHistory {
    commits: Vec<CommitRecord>,
    diffs: HashMap<String, Vec<FileDiff>>,
}

impl ScriptedHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a commit; it takes the next topological index
    pub fn commit(mut self, sha: &str, parents: &[&str], files: Vec<FileDiff>) -> Self {
        let index = self.commits.len() as u64;
        let time = 1_700_000_000 + index as i64 * 60;
        self.commits.push(CommitRecord {
            sha: sha.to_string(),
            parents: parents.iter().map(|p| p.to_string()).collect(),
            author_email: "dev@example.com".to_string(),
            message: format!("commit {}", sha),
            author_time: time,
            commit_time: time,
            topo_index: index,
        });
        self.diffs.insert(sha.to_string(), files);
        self
    }

    /// Drops the diff of `sha` so that loading it fails
    pub fn without_diff(mut self, sha: &str) -> Self {
        self.diffs.remove(sha);
        self
    }
}

impl CommitSource for ScriptedHistory {
    fn commits(&self) -> Result<Vec<CommitRecord>, OrderingError> {
        Ok(self.commits.clone())
    }

    fn load_diff(&self, commit: &CommitRecord) -> Result<Vec<FileDiff>> {
        self.diffs
            .get(&commit.sha)
            .cloned()
            .ok_or_else(|| anyhow!("No diff for commit {}", commit.sha))
    }
}
