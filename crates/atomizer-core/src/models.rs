//! Core data models for the block ledger

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::CoreError;

/// Separator used inside storage keys (ASCII unit separator).
/// Paths and block names coming out of git or the extractor never contain it.
pub const KEY_SEPARATOR: char = '\u{1f}';

/// Canonical identity of a code block
///
/// Stable across line drift and file renames: the path is always the
/// canonical path produced by the file identity lookup, never the path
/// observed at commit time. Line position is deliberately absent.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BlockIdentity {
    /// Repository identifier (e.g., "acme/webapp")
    pub repo: String,

    /// Canonical file path
    pub canonical_path: String,

    /// Short block name (e.g., "parseExpression", "UserService")
    pub block_name: String,
}

impl BlockIdentity {
    /// Creates a new block identity
    pub fn new(
        repo: impl Into<String>,
        canonical_path: impl Into<String>,
        block_name: impl Into<String>,
    ) -> Self {
        Self {
            repo: repo.into(),
            canonical_path: canonical_path.into(),
            block_name: block_name.into(),
        }
    }

    /// Parses a `<path>:<name>` reference as typed on the command line
    pub fn parse_ref(repo: &str, reference: &str) -> Result<Self, CoreError> {
        match reference.split_once(':') {
            Some((path, name)) if !path.is_empty() && !name.is_empty() => {
                Ok(Self::new(repo, path, name))
            }
            _ => Err(CoreError::InvalidBlockRef(reference.to_string())),
        }
    }

    /// Generates a key for database storage
    /// Format: "repo␟canonical_path␟block_name"
    pub fn key(&self) -> String {
        format!(
            "{}{sep}{}{sep}{}",
            self.repo,
            self.canonical_path,
            self.block_name,
            sep = KEY_SEPARATOR
        )
    }

    /// Key prefix shared by every block of one file
    pub fn file_prefix(repo: &str, canonical_path: &str) -> String {
        format!("{}{sep}{}{sep}", repo, canonical_path, sep = KEY_SEPARATOR)
    }

    /// Key prefix shared by every block of one repository
    pub fn repo_prefix(repo: &str) -> String {
        format!("{}{}", repo, KEY_SEPARATOR)
    }
}

impl fmt::Display for BlockIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.canonical_path, self.block_name)
    }
}

/// Kind of source construct
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BlockType {
    #[default]
    Function,
    Method,
    Class,
    Component,
}

impl BlockType {
    pub fn as_str(&self) -> &'static str {
        match self {
            BlockType::Function => "function",
            BlockType::Method => "method",
            BlockType::Class => "class",
            BlockType::Component => "component",
        }
    }

    /// Parses one of the four tracked block types (case-insensitive)
    pub fn parse(s: &str) -> Result<Self, CoreError> {
        match s.trim().to_ascii_lowercase().as_str() {
            "function" => Ok(BlockType::Function),
            "method" => Ok(BlockType::Method),
            "class" => Ok(BlockType::Class),
            "component" => Ok(BlockType::Component),
            other => Err(CoreError::UnknownBlockType(other.to_string())),
        }
    }
}

impl fmt::Display for BlockType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle status of a persisted block.
/// "Absent" is represented by the block not existing at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BlockStatus {
    Active,
    Deleted,
}

impl fmt::Display for BlockStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BlockStatus::Active => f.write_str("active"),
            BlockStatus::Deleted => f.write_str("deleted"),
        }
    }
}

/// A named, typed source construct tracked across its lifetime
///
/// Rows are stored with bincode, so this type must not use any
/// `skip_serializing_if` style attributes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeBlock {
    /// Ledger-assigned id, preserved across renames and resurrection
    pub id: u64,

    pub repo: String,

    /// Canonical file path (part of the identity)
    pub canonical_path: String,

    /// Block name (part of the identity)
    pub block_name: String,

    /// Path the block was first observed at
    pub path_at_creation: String,

    pub block_type: BlockType,

    pub signature: Option<String>,

    /// Last observed start line (best effort)
    pub start_line: Option<u32>,

    /// Last observed end line (best effort)
    pub end_line: Option<u32>,

    pub language: String,

    pub complexity: Option<u32>,

    pub status: BlockStatus,

    /// Commit that first created the block
    pub first_seen_sha: String,

    /// Commit that last touched the block
    pub last_modified_sha: String,

    /// Author timestamp of `last_modified_sha` (Unix epoch)
    pub last_modified_at: i64,
}

impl CodeBlock {
    /// Returns the canonical identity of this block
    pub fn identity(&self) -> BlockIdentity {
        BlockIdentity::new(&self.repo, &self.canonical_path, &self.block_name)
    }

    pub fn is_active(&self) -> bool {
        self.status == BlockStatus::Active
    }

    /// Formats the observed line span ("12-40", "12-?" or "-")
    pub fn line_span(&self) -> String {
        match (self.start_line, self.end_line) {
            (Some(start), Some(end)) => format!("{}-{}", start, end),
            (Some(start), None) => format!("{}-?", start),
            _ => "-".to_string(),
        }
    }
}

impl fmt::Display for CodeBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "#{} {} {}:{} [{}]",
            self.id, self.block_type, self.canonical_path, self.block_name, self.status
        )
    }
}

/// Type of a change record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeType {
    Created,
    Modified,
    Deleted,
    Renamed,
}

impl ChangeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeType::Created => "created",
            ChangeType::Modified => "modified",
            ChangeType::Deleted => "deleted",
            ChangeType::Renamed => "renamed",
        }
    }

    /// Resulting type when a later change of the same commit folds into `self`
    pub fn fold(self, later: ChangeType) -> ChangeType {
        match (self, later) {
            // resurrected within the same commit
            (ChangeType::Deleted, ChangeType::Created) => ChangeType::Created,
            (_, ChangeType::Deleted) | (ChangeType::Deleted, _) => ChangeType::Deleted,
            (ChangeType::Created, _) | (_, ChangeType::Created) => ChangeType::Created,
            (ChangeType::Renamed, _) | (_, ChangeType::Renamed) => ChangeType::Renamed,
            (ChangeType::Modified, ChangeType::Modified) => ChangeType::Modified,
        }
    }
}

impl fmt::Display for ChangeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One immutable record per (commit, block)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeBlockChange {
    pub repo: String,

    pub commit_sha: String,

    /// Topological index of the commit, used to order a block's history
    pub topo_index: u64,

    pub block_id: u64,

    /// Canonical path at the time of the change (after the change for renames)
    pub canonical_path: String,

    /// Path as it appeared in the commit
    pub commit_time_path: String,

    pub block_name: String,

    pub block_type: BlockType,

    pub change_type: ChangeType,

    /// Previous name for renames ("path:name")
    pub old_name: Option<String>,

    pub lines_added: u32,

    pub lines_deleted: u32,

    /// Intent summary reported by the extractor
    pub summary: String,

    /// Author timestamp of the commit (Unix epoch)
    pub timestamp: i64,
}

impl CodeBlockChange {
    /// Folds a later change for the same (commit, block) into this record
    pub fn fold(&mut self, later: CodeBlockChange) {
        self.change_type = self.change_type.fold(later.change_type);
        if self.old_name.is_none() {
            self.old_name = later.old_name;
        }
        self.canonical_path = later.canonical_path;
        self.commit_time_path = later.commit_time_path;
        self.block_name = later.block_name;
        self.block_type = later.block_type;
        self.lines_added = self.lines_added.saturating_add(later.lines_added);
        self.lines_deleted = self.lines_deleted.saturating_add(later.lines_deleted);
        if !later.summary.is_empty() {
            self.summary = later.summary;
        }
    }
}

impl fmt::Display for CodeBlockChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {}:{} @ {}",
            self.change_type,
            self.canonical_path,
            self.block_name,
            &self.commit_sha[..self.commit_sha.len().min(8)]
        )?;
        if let Some(old) = &self.old_name {
            write!(f, " (from {})", old)?;
        }
        Ok(())
    }
}

/// Directed dependency edge from a source file to an imported module
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportEdge {
    pub repo: String,

    /// Canonical path of the importing file
    pub source_path: String,

    /// Imported module / package path as written in the source
    pub dependency_path: String,

    /// Commit that added the import
    pub added_in: String,

    /// Commit that removed the import, if it is gone
    pub removed_in: Option<String>,
}

impl ImportEdge {
    /// Generates a key for database storage
    pub fn key(&self) -> String {
        Self::key_for(&self.repo, &self.source_path, &self.dependency_path)
    }

    pub fn key_for(repo: &str, source_path: &str, dependency_path: &str) -> String {
        format!(
            "{}{sep}{}{sep}{}",
            repo,
            source_path,
            dependency_path,
            sep = KEY_SEPARATOR
        )
    }

    pub fn is_live(&self) -> bool {
        self.removed_in.is_none()
    }
}
