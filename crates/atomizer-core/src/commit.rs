//! Commit records handed out by a commit source

use serde::{Deserialize, Serialize};

/// A commit in replay position
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitRecord {
    pub sha: String,

    /// Parent SHAs in git order (first parent first)
    pub parents: Vec<String>,

    pub author_email: String,

    pub message: String,

    /// Author timestamp (Unix epoch). Not monotonic across history.
    pub author_time: i64,

    /// Committer timestamp (Unix epoch)
    pub commit_time: i64,

    /// Position in ancestor-before-descendant order
    pub topo_index: u64,
}

impl CommitRecord {
    /// First 8 characters of the SHA
    pub fn short_sha(&self) -> &str {
        &self.sha[..self.sha.len().min(8)]
    }

    /// First line of the commit message
    pub fn subject(&self) -> &str {
        self.message.lines().next().unwrap_or("")
    }
}

/// How a file changed in a commit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FileStatus {
    Added,
    Modified,
    Deleted,
    Renamed,
}

/// One file's part of a commit diff
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileDiff {
    /// New path; the old path for deletions
    pub path: String,

    /// Previous path for renames
    pub old_path: Option<String>,

    pub status: FileStatus,

    pub binary: bool,

    /// Unified patch text for this file
    pub patch: String,
}

impl FileDiff {
    pub fn new(path: &str, status: FileStatus, patch: &str) -> Self {
        Self {
            path: path.to_string(),
            old_path: None,
            status,
            binary: false,
            patch: patch.to_string(),
        }
    }
}
