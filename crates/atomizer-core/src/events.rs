//! Typed change events produced by the extractor

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::models::BlockType;

/// What a change event does
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventKind {
    CreateBlock,
    ModifyBlock,
    DeleteBlock,
    RenameBlock,
    AddImport,
    RemoveImport,
}

impl EventKind {
    /// Parses the wire name (e.g., "CREATE_BLOCK"); tolerant of case and padding
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "CREATE_BLOCK" => Some(EventKind::CreateBlock),
            "MODIFY_BLOCK" => Some(EventKind::ModifyBlock),
            "DELETE_BLOCK" => Some(EventKind::DeleteBlock),
            "RENAME_BLOCK" => Some(EventKind::RenameBlock),
            "ADD_IMPORT" => Some(EventKind::AddImport),
            "REMOVE_IMPORT" => Some(EventKind::RemoveImport),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::CreateBlock => "CREATE_BLOCK",
            EventKind::ModifyBlock => "MODIFY_BLOCK",
            EventKind::DeleteBlock => "DELETE_BLOCK",
            EventKind::RenameBlock => "RENAME_BLOCK",
            EventKind::AddImport => "ADD_IMPORT",
            EventKind::RemoveImport => "REMOVE_IMPORT",
        }
    }

    /// Block events name a block; import events name a dependency
    pub fn is_block_event(&self) -> bool {
        !matches!(self, EventKind::AddImport | EventKind::RemoveImport)
    }

    /// Priority used when several chunk results describe the same block
    pub fn merge_priority(&self) -> u8 {
        match self {
            EventKind::RenameBlock => 4,
            EventKind::ModifyBlock => 3,
            EventKind::CreateBlock => 2,
            EventKind::DeleteBlock => 1,
            EventKind::AddImport | EventKind::RemoveImport => 0,
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A validated change event
///
/// `target_file` is the path as it appears in the commit; canonicalisation
/// happens in the applier through the file identity lookup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub kind: EventKind,

    pub target_file: String,

    /// Required for block events
    pub target_block_name: Option<String>,

    /// Renames: file the block lived in before (defaults to `target_file`)
    pub old_file: Option<String>,

    /// Renames: name before the rename (defaults to `target_block_name`)
    pub old_block_name: Option<String>,

    pub block_type: Option<BlockType>,

    pub signature: Option<String>,

    /// Required for import events
    pub dependency_path: Option<String>,

    pub start_line: Option<u32>,

    pub end_line: Option<u32>,

    pub complexity: Option<u32>,

    /// Code before the change (best effort)
    pub old_version: Option<String>,

    /// Code after the change (best effort)
    pub new_version: Option<String>,
}

impl ChangeEvent {
    fn bare(kind: EventKind, target_file: &str) -> Self {
        Self {
            kind,
            target_file: target_file.to_string(),
            target_block_name: None,
            old_file: None,
            old_block_name: None,
            block_type: None,
            signature: None,
            dependency_path: None,
            start_line: None,
            end_line: None,
            complexity: None,
            old_version: None,
            new_version: None,
        }
    }

    fn block(kind: EventKind, file: &str, name: &str) -> Self {
        let mut event = Self::bare(kind, file);
        event.target_block_name = Some(name.to_string());
        event
    }

    pub fn create(file: &str, name: &str) -> Self {
        Self::block(EventKind::CreateBlock, file, name)
    }

    pub fn modify(file: &str, name: &str) -> Self {
        Self::block(EventKind::ModifyBlock, file, name)
    }

    pub fn delete(file: &str, name: &str) -> Self {
        Self::block(EventKind::DeleteBlock, file, name)
    }

    pub fn rename(old_file: &str, old_name: &str, new_file: &str, new_name: &str) -> Self {
        let mut event = Self::block(EventKind::RenameBlock, new_file, new_name);
        event.old_file = Some(old_file.to_string());
        event.old_block_name = Some(old_name.to_string());
        event
    }

    pub fn add_import(file: &str, dependency: &str) -> Self {
        let mut event = Self::bare(EventKind::AddImport, file);
        event.dependency_path = Some(dependency.to_string());
        event
    }

    pub fn remove_import(file: &str, dependency: &str) -> Self {
        let mut event = Self::bare(EventKind::RemoveImport, file);
        event.dependency_path = Some(dependency.to_string());
        event
    }

    pub fn with_lines(mut self, start: u32, end: u32) -> Self {
        self.start_line = Some(start);
        self.end_line = Some(end);
        self
    }

    pub fn with_type(mut self, block_type: BlockType) -> Self {
        self.block_type = Some(block_type);
        self
    }

    pub fn with_signature(mut self, signature: &str) -> Self {
        self.signature = Some(signature.to_string());
        self
    }

    pub fn with_snippets(mut self, old_version: &str, new_version: &str) -> Self {
        self.old_version = Some(old_version.to_string());
        self.new_version = Some(new_version.to_string());
        self
    }

    /// Block name, or an empty string for import events
    pub fn block_name(&self) -> &str {
        self.target_block_name.as_deref().unwrap_or("")
    }

    /// Best-effort (added, deleted) line counts from the snippets.
    /// Zero unless both snippets are present.
    pub fn line_delta(&self) -> (u32, u32) {
        match (&self.old_version, &self.new_version) {
            (Some(old), Some(new)) if !old.is_empty() && !new.is_empty() => {
                let old_lines = old.lines().count() as u32;
                let new_lines = new.lines().count() as u32;
                if new_lines > old_lines {
                    (new_lines - old_lines, 0)
                } else {
                    (0, old_lines - new_lines)
                }
            }
            _ => (0, 0),
        }
    }
}

impl fmt::Display for ChangeEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.target_block_name, &self.dependency_path) {
            (Some(name), _) => write!(f, "{} {}:{}", self.kind, self.target_file, name),
            (None, Some(dep)) => write!(f, "{} {} -> {}", self.kind, self.target_file, dep),
            (None, None) => write!(f, "{} {}", self.kind, self.target_file),
        }
    }
}
