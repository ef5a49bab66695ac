//! Deterministic extractor for tests and dry runs

use std::collections::{HashMap, VecDeque};

use atomizer_core::{ChangeEvent, CommitRecord, FileDiff};

use super::error::ExtractError;
use super::{Extraction, Extractor};

/// Extractor that replays scripted events keyed by commit SHA.
///
/// Unscripted commits yield an empty extraction. Scripted failures are
/// consumed one per call, so a commit can fail once and succeed on the
/// next run.
#[derive(Debug, Default)]
pub struct StubExtractor {
    scripts: HashMap<String, (String, Vec<ChangeEvent>)>,
    failures: HashMap<String, VecDeque<ExtractError>>,
    seen: Vec<String>,
}

impl StubExtractor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Scripts the summary and events returned for `sha`
    pub fn with_events(mut self, sha: &str, summary: &str, events: Vec<ChangeEvent>) -> Self {
        self.scripts
            .insert(sha.to_string(), (summary.to_string(), events));
        self
    }

    /// Makes the next extraction of `sha` fail with `error`
    pub fn fail_next(mut self, sha: &str, error: ExtractError) -> Self {
        self.failures
            .entry(sha.to_string())
            .or_default()
            .push_back(error);
        self
    }

    /// Number of extraction calls made so far
    pub fn calls(&self) -> usize {
        self.seen.len()
    }

    /// SHAs extracted so far, in call order
    pub fn seen(&self) -> &[String] {
        &self.seen
    }
}

impl Extractor for StubExtractor {
    fn extract(
        &mut self,
        commit: &CommitRecord,
        _files: &[FileDiff],
    ) -> Result<Extraction, ExtractError> {
        self.seen.push(commit.sha.clone());

        if let Some(error) = self
            .failures
            .get_mut(&commit.sha)
            .and_then(|queue| queue.pop_front())
        {
            return Err(error);
        }

        let (summary, events) = self
            .scripts
            .get(&commit.sha)
            .cloned()
            .unwrap_or_default();
        Ok(Extraction {
            summary,
            events,
            dropped: 0,
            calls: 1,
        })
    }
}
