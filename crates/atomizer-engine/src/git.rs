//! Commit source backed by a local git repository

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use atomizer_core::filter::is_source_file;
use atomizer_core::{CommitRecord, FileDiff, FileStatus};
use git2::{Delta, DiffFindOptions, DiffOptions, Oid, Patch, Repository, Sort};

use crate::error::OrderingError;
use crate::source::{verify_topology, CommitSource};

/// Reads history from a git repository with `git2`
pub struct GitHistory {
    repo: Repository,
    path: PathBuf,
    rev: Option<String>,
}

impl GitHistory {
    /// Opens the repository at `path`
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let repo = Repository::open(path.as_ref())
            .with_context(|| format!("Failed to open repository at {:?}", path.as_ref()))?;
        Ok(Self {
            repo,
            path: path.as_ref().to_path_buf(),
            rev: None,
        })
    }

    /// Walks from `rev` instead of HEAD
    pub fn with_rev(mut self, rev: &str) -> Self {
        self.rev = Some(rev.to_string());
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn walk(&self) -> Result<Vec<CommitRecord>, git2::Error> {
        let mut revwalk = self.repo.revwalk()?;
        revwalk.set_sorting(Sort::TOPOLOGICAL | Sort::REVERSE)?;
        match &self.rev {
            Some(rev) => {
                let tip = self.repo.revparse_single(rev)?.peel_to_commit()?;
                revwalk.push(tip.id())?;
            }
            None => revwalk.push_head()?,
        }

        let mut commits = Vec::new();
        for (index, oid) in revwalk.enumerate() {
            let commit = self.repo.find_commit(oid?)?;
            let author = commit.author();
            commits.push(CommitRecord {
                sha: commit.id().to_string(),
                parents: commit.parent_ids().map(|p| p.to_string()).collect(),
                author_email: author.email().unwrap_or("").to_string(),
                message: commit.message().unwrap_or("").to_string(),
                author_time: author.when().seconds(),
                commit_time: commit.time().seconds(),
                topo_index: index as u64,
            });
        }
        Ok(commits)
    }
}

fn file_status(delta: Delta) -> FileStatus {
    match delta {
        Delta::Added | Delta::Copied => FileStatus::Added,
        Delta::Deleted => FileStatus::Deleted,
        Delta::Renamed => FileStatus::Renamed,
        _ => FileStatus::Modified,
    }
}

impl CommitSource for GitHistory {
    fn commits(&self) -> Result<Vec<CommitRecord>, OrderingError> {
        let commits = self
            .walk()
            .map_err(|e| OrderingError::Walk(e.message().to_string()))?;
        verify_topology(&commits)?;
        log::debug!("Walked {} commits from {:?}", commits.len(), self.path);
        Ok(commits)
    }

    fn load_diff(&self, record: &CommitRecord) -> Result<Vec<FileDiff>> {
        let oid = Oid::from_str(&record.sha).context("Invalid commit SHA")?;
        let commit = self.repo.find_commit(oid).context("Failed to find commit")?;
        let tree = commit.tree().context("Failed to get commit tree")?;
        let parent_tree = if commit.parent_count() > 0 {
            Some(commit.parent(0)?.tree().context("Failed to get parent tree")?)
        } else {
            None
        };

        let mut opts = DiffOptions::new();
        opts.context_lines(3);
        let mut diff = self
            .repo
            .diff_tree_to_tree(parent_tree.as_ref(), Some(&tree), Some(&mut opts))
            .context("Failed to diff commit against its parent")?;

        let mut find = DiffFindOptions::new();
        find.renames(true);
        diff.find_similar(Some(&mut find))
            .context("Failed to detect renames")?;

        let mut files = Vec::with_capacity(diff.deltas().len());
        for (idx, delta) in diff.deltas().enumerate() {
            let status = file_status(delta.status());
            let new_path = delta.new_file().path().map(|p| p.to_string_lossy().into_owned());
            let old_path = delta.old_file().path().map(|p| p.to_string_lossy().into_owned());
            let Some(path) = (match status {
                FileStatus::Deleted => old_path.clone(),
                _ => new_path.clone(),
            }) else {
                continue;
            };

            let mut binary = delta.flags().is_binary()
                || delta.new_file().is_binary()
                || delta.old_file().is_binary();
            let mut patch_text = String::new();

            if !binary && is_source_file(&path) {
                if let Some(mut patch) = Patch::from_diff(&diff, idx)
                    .with_context(|| format!("Failed to build patch for {}", path))?
                {
                    binary = patch.delta().flags().is_binary();
                    if !binary {
                        let buf = patch.to_buf()?;
                        patch_text = String::from_utf8_lossy(&buf).into_owned();
                    }
                }
            }

            files.push(FileDiff {
                old_path: if status == FileStatus::Renamed { old_path } else { None },
                path,
                status,
                binary,
                patch: patch_text,
            });
        }

        Ok(files)
    }
}
