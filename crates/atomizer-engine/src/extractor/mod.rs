//! Change extraction
//!
//! Turns a commit's code-file diffs into typed change events. The
//! production backend asks a language model; its output is untrusted and
//! is repaired, validated and (for chunked commits) merged before it
//! leaves this module.

mod chunk;
mod error;
mod llm;
mod parse;
mod patterns;
mod prompt;
mod stub;

use atomizer_core::{ChangeEvent, CommitRecord, FileDiff};

pub use chunk::{chunk_files, merge_chunk_events};
pub use error::ExtractError;
pub use llm::{LlmConfig, LlmExtractor, DEFAULT_ENDPOINT, DEFAULT_MODEL};
pub use parse::{parse_response, repair_json, Validator, MAX_BLOCK_NAME_LEN};
pub use patterns::Patterns;
pub use prompt::build_prompt;
pub use stub::StubExtractor;

/// Validated result of extracting one commit
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Extraction {
    /// Intent summary attached to every change record of the commit
    pub summary: String,

    /// Events in extraction order
    pub events: Vec<ChangeEvent>,

    /// Events discarded by validation
    pub dropped: usize,

    /// Backend calls made, retries included
    pub calls: u32,
}

/// Source of change events for a commit
pub trait Extractor {
    /// Extracts change events from the commit's (already filtered) code files
    fn extract(&mut self, commit: &CommitRecord, files: &[FileDiff])
        -> Result<Extraction, ExtractError>;
}
