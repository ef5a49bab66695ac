//! Model response repair, parsing and validation
//!
//! The model is untrusted: anything that does not describe a usable event
//! is dropped with a warning. Only a response that cannot be read at all
//! is an error.

use atomizer_core::identity::normalize_path;
use atomizer_core::{BlockType, ChangeEvent, EventKind, FileDiff};
use serde::Deserialize;
use serde_json::Value;

use super::error::ExtractError;
use super::patterns::Patterns;

/// Longest block name accepted from the model
pub const MAX_BLOCK_NAME_LEN: usize = 100;

/// Block types that are not tracked as blocks
const SKIPPED_BLOCK_TYPES: &[&str] = &[
    "variable",
    "var",
    "constant",
    "const",
    "text",
    "documentation",
    "doc",
    "markdown",
];

/// Response object as the model writes it
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawResponse {
    #[serde(default)]
    pub llm_intent_summary: Option<String>,

    #[serde(default)]
    pub change_events: Option<Vec<RawEvent>>,
}

/// One event as the model writes it; every field is optional until validated
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawEvent {
    #[serde(default)]
    pub behavior: Option<String>,
    #[serde(default)]
    pub target_file: Option<String>,
    #[serde(default)]
    pub target_block_name: Option<String>,
    #[serde(default)]
    pub old_file: Option<String>,
    #[serde(default)]
    pub old_block_name: Option<String>,
    #[serde(default)]
    pub block_type: Option<String>,
    #[serde(default)]
    pub signature: Option<String>,
    #[serde(default)]
    pub dependency_path: Option<String>,
    #[serde(default)]
    pub start_line: Option<Value>,
    #[serde(default)]
    pub end_line: Option<Value>,
    #[serde(default)]
    pub complexity: Option<Value>,
    #[serde(default)]
    pub old_version: Option<String>,
    #[serde(default)]
    pub new_version: Option<String>,
}

/// Strips Markdown fences and unwraps a top-level array to its first element
pub fn repair_json(text: &str) -> String {
    let stripped = text
        .replace("```json", "")
        .replace("```JSON", "")
        .replace("```", "");
    let trimmed = stripped.trim();

    if trimmed.starts_with('[') && trimmed.ends_with(']') {
        if let Ok(items) = serde_json::from_str::<Vec<Value>>(trimmed) {
            if let Some(first) = items.into_iter().next() {
                return first.to_string();
            }
        }
    }
    trimmed.to_string()
}

/// Parses the model output, repairing it once if needed
pub fn parse_response(text: &str) -> Result<RawResponse, ExtractError> {
    match serde_json::from_str::<RawResponse>(text) {
        Ok(response) => Ok(response),
        Err(original) => serde_json::from_str::<RawResponse>(&repair_json(text)).map_err(|e| {
            ExtractError::InvalidResponse(format!("{} (before repair: {})", e, original))
        }),
    }
}

/// Accepts a number or a numeric string
fn coerce_u32(value: &Option<Value>) -> Option<u32> {
    match value.as_ref()? {
        Value::Number(n) => n.as_u64().and_then(|n| u32::try_from(n).ok()),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

/// Validates raw events against the files actually changed in the commit
pub struct Validator<'a> {
    files: &'a [FileDiff],
    patterns: &'a Patterns,
}

impl<'a> Validator<'a> {
    pub fn new(files: &'a [FileDiff], patterns: &'a Patterns) -> Self {
        Self { files, patterns }
    }

    /// Turns a raw response into typed events. Returns the events and the
    /// number of events dropped.
    pub fn validate(&self, raw: RawResponse) -> (Vec<ChangeEvent>, usize) {
        let mut events = Vec::new();
        let mut dropped = 0;
        for (idx, raw_event) in raw.change_events.unwrap_or_default().into_iter().enumerate() {
            match self.validate_event(raw_event) {
                Ok(event) => events.push(event),
                Err(reason) => {
                    log::warn!("Dropping extracted event #{}: {}", idx, reason);
                    dropped += 1;
                }
            }
        }
        (events, dropped)
    }

    fn validate_event(&self, raw: RawEvent) -> Result<ChangeEvent, String> {
        let behavior = non_empty(&raw.behavior).ok_or("missing behavior")?;
        let kind =
            EventKind::parse(behavior).ok_or_else(|| format!("unknown behavior '{}'", behavior))?;

        let target_file = self.resolve_target(non_empty(&raw.target_file))?;

        let mut event = if kind.is_block_event() {
            let name = non_empty(&raw.target_block_name).ok_or("missing target_block_name")?;
            if name.chars().count() > MAX_BLOCK_NAME_LEN {
                return Err(format!("block name longer than {} chars", MAX_BLOCK_NAME_LEN));
            }
            match kind {
                EventKind::RenameBlock => {
                    let old_name = non_empty(&raw.old_block_name);
                    let old_file = non_empty(&raw.old_file);
                    if old_name.is_none() && old_file.is_none() {
                        return Err("rename without old name or old file".to_string());
                    }
                    let old_file = match old_file {
                        Some(f) => self.resolve_old_path(f),
                        None => target_file.clone(),
                    };
                    ChangeEvent::rename(&old_file, old_name.unwrap_or(name), &target_file, name)
                }
                EventKind::CreateBlock => ChangeEvent::create(&target_file, name),
                EventKind::ModifyBlock => ChangeEvent::modify(&target_file, name),
                _ => ChangeEvent::delete(&target_file, name),
            }
        } else {
            let dependency = non_empty(&raw.dependency_path).ok_or("missing dependency_path")?;
            match kind {
                EventKind::AddImport => ChangeEvent::add_import(&target_file, dependency),
                _ => ChangeEvent::remove_import(&target_file, dependency),
            }
        };

        if kind.is_block_event() {
            if let Some(block_type) = non_empty(&raw.block_type) {
                event.block_type = Some(match BlockType::parse(block_type) {
                    Ok(t) => t,
                    Err(_) => {
                        let lower = block_type.to_ascii_lowercase();
                        if SKIPPED_BLOCK_TYPES.contains(&lower.as_str()) {
                            return Err(format!("untracked block type '{}'", block_type));
                        }
                        log::debug!("Normalising block type '{}' to function", block_type);
                        BlockType::Function
                    }
                });
            }

            event.signature = non_empty(&raw.signature).map(str::to_string);
            event.complexity = coerce_u32(&raw.complexity);
            event.old_version = raw.old_version.filter(|s| !s.is_empty());
            event.new_version = raw.new_version.filter(|s| !s.is_empty());

            event.start_line = coerce_u32(&raw.start_line);
            event.end_line = coerce_u32(&raw.end_line);
            if event.start_line.is_none() && event.end_line.is_none() && kind != EventKind::DeleteBlock {
                if let Some((start, end)) = self.hunk_span(&target_file) {
                    event.start_line = Some(start);
                    event.end_line = Some(end);
                }
            }
        }

        Ok(event)
    }

    /// Matches the model's file against the commit's files: exact match,
    /// then without leading slash, then a unique path-suffix match. A missing
    /// file is only accepted when the commit touched exactly one file.
    fn resolve_target(&self, target: Option<&str>) -> Result<String, String> {
        let Some(target) = target else {
            return match self.files {
                [only] => Ok(only.path.clone()),
                _ => Err("missing target_file".to_string()),
            };
        };

        if let Some(file) = self.files.iter().find(|f| f.path == target) {
            return Ok(file.path.clone());
        }

        let trimmed = normalize_path(target);
        if let Some(file) = self.files.iter().find(|f| f.path == trimmed) {
            return Ok(file.path.clone());
        }

        let suffix = format!("/{}", trimmed);
        let mut candidates = self.files.iter().filter(|f| f.path.ends_with(&suffix));
        match (candidates.next(), candidates.next()) {
            (Some(file), None) => Ok(file.path.clone()),
            (Some(_), Some(_)) => Err(format!("ambiguous target_file '{}'", target)),
            _ => Err(format!("target_file '{}' not in commit", target)),
        }
    }

    /// Old side of a rename: may name a file's previous path
    fn resolve_old_path(&self, old: &str) -> String {
        let trimmed = normalize_path(old);
        let known = self
            .files
            .iter()
            .flat_map(|f| std::iter::once(&f.path).chain(f.old_path.iter()))
            .find(|p| **p == trimmed || p.ends_with(&format!("/{}", trimmed)));
        match known {
            Some(path) => path.clone(),
            None => trimmed,
        }
    }

    fn hunk_span(&self, path: &str) -> Option<(u32, u32)> {
        let file = self.files.iter().find(|f| f.path == path)?;
        self.patterns.hunk_span(&file.patch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use atomizer_core::FileStatus;

    fn files() -> Vec<FileDiff> {
        vec![
            FileDiff::new("src/utils.py", FileStatus::Modified, "@@ -1,3 +1,5 @@\n+x\n"),
            FileDiff::new("src/app/main.py", FileStatus::Added, "@@ -0,0 +1,9 @@\n+y\n"),
        ]
    }

    fn validate(json: &str) -> (Vec<ChangeEvent>, usize) {
        let files = files();
        let patterns = Patterns::new().unwrap();
        let raw = parse_response(json).unwrap();
        Validator::new(&files, &patterns).validate(raw)
    }

    #[test]
    fn test_repair_strips_fences_and_unwraps_array() {
        let text = "```json\n[{\"llm_intent_summary\": \"x\"}, {}]\n```";
        let raw = parse_response(text).unwrap();
        assert_eq!(raw.llm_intent_summary.as_deref(), Some("x"));
    }

    #[test]
    fn test_unreadable_response_is_an_error() {
        assert!(matches!(
            parse_response("the model refused"),
            Err(ExtractError::InvalidResponse(_))
        ));
    }

    #[test]
    fn test_valid_events_are_typed() {
        let (events, dropped) = validate(
            r#"{"llm_intent_summary": "s", "change_events": [
                {"behavior": "CREATE_BLOCK", "target_file": "src/utils.py", "target_block_name": "helper", "block_type": "function", "start_line": "2", "end_line": 4},
                {"behavior": "ADD_IMPORT", "target_file": "src/utils.py", "dependency_path": "os"}
            ]}"#,
        );
        assert_eq!(dropped, 0);
        assert_eq!(events[0], ChangeEvent::create("src/utils.py", "helper").with_type(BlockType::Function).with_lines(2, 4));
        assert_eq!(events[1], ChangeEvent::add_import("src/utils.py", "os"));
    }

    #[test]
    fn test_invalid_events_are_dropped() {
        let long_name = "x".repeat(MAX_BLOCK_NAME_LEN + 1);
        let json = format!(
            r#"{{"change_events": [
                {{"behavior": "EXPLODE_BLOCK", "target_file": "src/utils.py", "target_block_name": "a"}},
                {{"behavior": "MODIFY_BLOCK", "target_file": "src/utils.py"}},
                {{"behavior": "MODIFY_BLOCK", "target_file": "src/utils.py", "target_block_name": "{}"}},
                {{"behavior": "ADD_IMPORT", "target_file": "src/utils.py"}},
                {{"behavior": "RENAME_BLOCK", "target_file": "src/utils.py", "target_block_name": "b"}},
                {{"behavior": "CREATE_BLOCK", "target_file": "src/utils.py", "target_block_name": "MAX", "block_type": "constant"}},
                {{"behavior": "CREATE_BLOCK", "target_file": "README.md", "target_block_name": "c"}}
            ]}}"#,
            long_name
        );
        let (events, dropped) = validate(&json);
        assert!(events.is_empty());
        assert_eq!(dropped, 7);
    }

    #[test]
    fn test_unknown_block_type_becomes_function() {
        let (events, _) = validate(
            r#"{"change_events": [{"behavior": "CREATE_BLOCK", "target_file": "src/utils.py", "target_block_name": "h", "block_type": "lambda"}]}"#,
        );
        assert_eq!(events[0].block_type, Some(BlockType::Function));
    }

    #[test]
    fn test_target_file_suffix_match_and_hunk_lines() {
        let (events, _) = validate(
            r#"{"change_events": [{"behavior": "MODIFY_BLOCK", "target_file": "/main.py", "target_block_name": "run"}]}"#,
        );
        assert_eq!(events[0].target_file, "src/app/main.py");
        assert_eq!((events[0].start_line, events[0].end_line), (Some(1), Some(9)));
    }

    #[test]
    fn test_missing_target_file_needs_single_file_commit() {
        let patterns = Patterns::new().unwrap();
        let one = vec![FileDiff::new("a.go", FileStatus::Modified, "")];
        let raw = parse_response(r#"{"change_events": [{"behavior": "DELETE_BLOCK", "target_block_name": "f"}]}"#).unwrap();
        let (events, _) = Validator::new(&one, &patterns).validate(raw.clone());
        assert_eq!(events[0].target_file, "a.go");

        let two = files();
        let (events, dropped) = Validator::new(&two, &patterns).validate(raw);
        assert!(events.is_empty());
        assert_eq!(dropped, 1);
    }

    #[test]
    fn test_rename_defaults_old_name() {
        let (events, _) = validate(
            r#"{"change_events": [{"behavior": "RENAME_BLOCK", "target_file": "src/app/main.py", "target_block_name": "run", "old_file": "src/utils.py"}]}"#,
        );
        assert_eq!(events[0].old_file.as_deref(), Some("src/utils.py"));
        assert_eq!(events[0].old_block_name.as_deref(), Some("run"));
    }
}
