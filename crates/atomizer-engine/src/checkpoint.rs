//! Per-commit checkpoints and history-rewrite detection

use std::collections::{HashMap, HashSet};

use anyhow::Result;
use atomizer_core::CommitRecord;
use atomizer_db::{FailedCommit, GraphStore, LedgerDb};

use crate::error::{AtomizeError, OrderingError};
use crate::source::parent_hash;

/// Tracks which commits of a repository are durably processed
pub struct CheckpointManager<'a> {
    ledger: &'a LedgerDb,
    repo: String,
}

impl<'a> CheckpointManager<'a> {
    pub fn new(ledger: &'a LedgerDb, repo: &str) -> Self {
        Self {
            ledger,
            repo: repo.to_string(),
        }
    }

    pub fn is_processed(&self, sha: &str) -> Result<bool> {
        self.ledger.is_commit_processed(&self.repo, sha)
    }

    /// Marks a commit processed. Call only after its ledger write succeeded
    /// and its graph mirror was attempted.
    pub fn mark_processed(&self, sha: &str) -> Result<()> {
        self.ledger
            .mark_commit_processed(&self.repo, sha, chrono::Utc::now().timestamp())
    }

    /// True when the commit's ledger transaction is durable
    pub fn is_applied(&self, sha: &str) -> Result<bool> {
        Ok(self.ledger.applied_commit(&self.repo, sha)?.is_some())
    }

    /// Commits still to replay, in their original order. With `force`
    /// every commit is returned.
    pub fn pending<'c>(
        &self,
        commits: &'c [CommitRecord],
        force: bool,
    ) -> Result<Vec<&'c CommitRecord>> {
        if force {
            return Ok(commits.iter().collect());
        }
        let processed = self.ledger.processed_commits(&self.repo)?;
        Ok(commits
            .iter()
            .filter(|c| !processed.contains(&c.sha))
            .collect())
    }

    pub fn record_failure(&self, commit: &CommitRecord, reason: &str, attempts: u32) -> Result<()> {
        let failure = FailedCommit {
            topo_index: commit.topo_index,
            reason: reason.to_string(),
            attempts,
            failed_at: chrono::Utc::now().timestamp(),
        };
        self.ledger.record_failure(&self.repo, &commit.sha, &failure)
    }

    pub fn clear_failure(&self, sha: &str) -> Result<()> {
        self.ledger.clear_failure(&self.repo, sha)
    }

    /// Compares stored parent hashes with the observed history.
    ///
    /// Fails when an applied commit now has a different parent list, or a
    /// processed commit is no longer reachable.
    pub fn verify_history(&self, commits: &[CommitRecord]) -> Result<(), AtomizeError> {
        let observed: HashMap<&str, &CommitRecord> =
            commits.iter().map(|c| (c.sha.as_str(), c)).collect();

        let applied_commits = self
            .ledger
            .applied_commits(&self.repo)
            .map_err(AtomizeError::Store)?;
        for (sha, applied) in applied_commits {
            let Some(commit) = observed.get(sha.as_str()) else {
                return Err(OrderingError::HistoryRewritten {
                    commit: sha,
                    detail: "applied commit is no longer in history".to_string(),
                }
                .into());
            };
            if parent_hash(&commit.parents) != applied.parent_hash {
                return Err(OrderingError::HistoryRewritten {
                    commit: sha,
                    detail: "parent list changed".to_string(),
                }
                .into());
            }
        }

        let observed: HashSet<&str> = observed.into_keys().collect();
        let processed = self
            .ledger
            .processed_commits(&self.repo)
            .map_err(AtomizeError::Store)?;
        if let Some(missing) = processed
            .into_iter()
            .find(|sha| !observed.contains(sha.as_str()))
        {
            return Err(OrderingError::HistoryRewritten {
                commit: missing,
                detail: "processed commit is no longer in history".to_string(),
            }
            .into());
        }

        Ok(())
    }

    /// Drops every ledger row and checkpoint of the repository, and the
    /// graph mirror on a best-effort basis
    pub fn reset(&self, graph: &dyn GraphStore) -> Result<usize> {
        let removed = self.ledger.clear_repo(&self.repo)?;
        if let Err(e) = graph.clear_repo(&self.repo) {
            log::warn!("Failed to clear graph mirror for {}: {:#}", self.repo, e);
        }
        log::info!("Cleared {} ledger rows for {}", removed, self.repo);
        Ok(removed)
    }
}
