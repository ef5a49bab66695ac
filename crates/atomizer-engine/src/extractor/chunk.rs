//! Splitting large commits into prompt-sized chunks and merging the results

use std::collections::HashMap;

use atomizer_core::{ChangeEvent, FileDiff};

use super::patterns::Patterns;

const CHUNK_BOUNDARY: &str = "\n\n// [Chunk boundary]\n\n";

/// Renders one file's patch with a `diff --git` header
fn render_file(file: &FileDiff) -> String {
    if file.patch.starts_with("diff --git") {
        return file.patch.clone();
    }
    let old = file.old_path.as_deref().unwrap_or(&file.path);
    format!("diff --git a/{} b/{}\n{}", old, file.path, file.patch)
}

/// Cuts `text` to at most `max_chars` bytes on a char boundary, with a marker
fn truncate(text: String, max_chars: usize) -> String {
    if text.len() <= max_chars {
        return text;
    }
    let mut cut = max_chars;
    while !text.is_char_boundary(cut) {
        cut -= 1;
    }
    format!(
        "{}\n\n[DIFF TRUNCATED - Original size: {} chars]\n",
        &text[..cut],
        text.len()
    )
}

/// Packs file patches into chunks of at most `max_chars`, splitting only on
/// file boundaries. A single oversized patch is truncated.
pub fn chunk_files(files: &[FileDiff], max_chars: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current = String::new();

    for file in files {
        let rendered = truncate(render_file(file), max_chars);
        if !current.is_empty() && current.len() + rendered.len() + 1 > max_chars {
            chunks.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push('\n');
        }
        current.push_str(&rendered);
    }

    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

/// Collapses events describing the same block in different chunks.
///
/// Events group by (file, name, normalised signature); the highest-priority
/// kind survives (RENAME > MODIFY > CREATE > DELETE) and snippets from the
/// whole group are joined. Import events only collapse exact duplicates.
/// First-seen order is preserved.
pub fn merge_chunk_events(chunks: Vec<Vec<ChangeEvent>>, patterns: &Patterns) -> Vec<ChangeEvent> {
    let mut groups: Vec<Vec<ChangeEvent>> = Vec::new();
    let mut index: HashMap<(String, String, String, String), usize> = HashMap::new();

    for event in chunks.into_iter().flatten() {
        let key = if event.kind.is_block_event() {
            (
                "block".to_string(),
                event.target_file.clone(),
                event.block_name().to_string(),
                patterns.normalize_signature(event.signature.as_deref().unwrap_or("")),
            )
        } else {
            (
                event.kind.as_str().to_string(),
                event.target_file.clone(),
                event.dependency_path.clone().unwrap_or_default(),
                String::new(),
            )
        };
        match index.get(&key) {
            Some(&i) => groups[i].push(event),
            None => {
                index.insert(key, groups.len());
                groups.push(vec![event]);
            }
        }
    }

    groups.into_iter().filter_map(merge_group).collect()
}

fn merge_group(group: Vec<ChangeEvent>) -> Option<ChangeEvent> {
    if group.len() == 1 {
        return group.into_iter().next();
    }

    let first_signature = group[0].signature.clone();
    for event in &group[1..] {
        if event.signature != first_signature {
            log::warn!(
                "Signature mismatch while merging {}: {:?} vs {:?}, keeping the first",
                event,
                first_signature,
                event.signature
            );
        }
    }

    let old_version = join_snippets(group.iter().map(|e| e.old_version.as_deref()));
    let new_version = join_snippets(group.iter().map(|e| e.new_version.as_deref()));

    let mut winner = group
        .iter()
        .fold(None::<&ChangeEvent>, |best, e| match best {
            Some(b) if b.kind.merge_priority() >= e.kind.merge_priority() => Some(b),
            _ => Some(e),
        })?
        .clone();
    winner.old_version = old_version;
    winner.new_version = new_version;
    Some(winner)
}

fn join_snippets<'a>(snippets: impl Iterator<Item = Option<&'a str>>) -> Option<String> {
    let parts: Vec<&str> = snippets.flatten().filter(|s| !s.is_empty()).collect();
    if parts.is_empty() {
        None
    } else {
        Some(parts.join(CHUNK_BOUNDARY))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use atomizer_core::{EventKind, FileStatus};

    #[test]
    fn test_chunks_split_on_file_boundaries() {
        let files = vec![
            FileDiff::new("a.py", FileStatus::Modified, &"a".repeat(40)),
            FileDiff::new("b.py", FileStatus::Modified, &"b".repeat(40)),
            FileDiff::new("c.py", FileStatus::Modified, &"c".repeat(40)),
        ];
        let chunks = chunk_files(&files, 150);
        assert_eq!(chunks.len(), 2);
        assert!(chunks[0].contains("diff --git a/a.py b/a.py"));
        assert!(chunks[0].contains("b/b.py"));
        assert!(chunks[1].contains("b/c.py"));
    }

    #[test]
    fn test_oversized_file_is_truncated() {
        let files = vec![FileDiff::new("big.py", FileStatus::Added, &"x".repeat(500))];
        let chunks = chunk_files(&files, 100);
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].contains("[DIFF TRUNCATED"));
    }

    #[test]
    fn test_merge_keeps_highest_priority_and_joins_snippets() {
        let patterns = Patterns::new().unwrap();
        let merged = merge_chunk_events(
            vec![
                vec![ChangeEvent::create("a.py", "f").with_snippets("", "part one")],
                vec![
                    ChangeEvent::modify("a.py", "f").with_snippets("", "part two"),
                    ChangeEvent::add_import("a.py", "os"),
                ],
                vec![ChangeEvent::add_import("a.py", "os")],
            ],
            &patterns,
        );
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].kind, EventKind::ModifyBlock);
        assert_eq!(
            merged[0].new_version.as_deref(),
            Some("part one\n\n// [Chunk boundary]\n\npart two")
        );
        assert_eq!(merged[1].kind, EventKind::AddImport);
    }

    #[test]
    fn test_merge_distinguishes_signatures() {
        let patterns = Patterns::new().unwrap();
        let merged = merge_chunk_events(
            vec![
                vec![ChangeEvent::create("a.go", "New").with_signature("func New(a int64)")],
                vec![ChangeEvent::create("a.go", "New").with_signature("func New(a int, b int)")],
            ],
            &patterns,
        );
        assert_eq!(merged.len(), 2);
    }
}
