//! Compiled patterns shared by response validation and chunk merging

use anyhow::{Context, Result};
use regex::Regex;

/// Regexes compiled once per extractor
#[derive(Debug, Clone)]
pub struct Patterns {
    hunk_header: Regex,
    whitespace: Regex,
    str_type: Regex,
    bool_type: Regex,
}

impl Patterns {
    pub fn new() -> Result<Self> {
        // @@ -42,10 +42,15 @@ optional context
        let hunk_header = Regex::new(r"(?m)^@@ -\d+(?:,\d+)? \+(\d+)(?:,(\d+))? @@")
            .context("Failed to compile hunk header regex")?;
        let whitespace = Regex::new(r"\s+").context("Failed to compile whitespace regex")?;
        let str_type = Regex::new(r":str([,)])").context("Failed to compile str type regex")?;
        let bool_type =
            Regex::new(r":bool([,)]|$)").context("Failed to compile bool type regex")?;

        Ok(Self {
            hunk_header,
            whitespace,
            str_type,
            bool_type,
        })
    }

    /// Line span on the new side covered by every hunk of a patch
    pub fn hunk_span(&self, patch: &str) -> Option<(u32, u32)> {
        let mut span: Option<(u32, u32)> = None;
        for caps in self.hunk_header.captures_iter(patch) {
            let start: u32 = caps.get(1)?.as_str().parse().ok()?;
            let count: u32 = match caps.get(2) {
                Some(c) => c.as_str().parse().ok()?,
                None => 1,
            };
            if count == 0 {
                // pure deletion hunk, nothing on the new side
                continue;
            }
            let end = start + count - 1;
            span = Some(match span {
                Some((lo, hi)) => (lo.min(start), hi.max(end)),
                None => (start, end),
            });
        }
        span
    }

    /// Canonical form of a signature for matching across chunks:
    /// whitespace removed and common type aliases unified
    pub fn normalize_signature(&self, signature: &str) -> String {
        if signature.is_empty() {
            return String::new();
        }
        let normalized = self.whitespace.replace_all(signature, "");
        let normalized = normalized.replace("int64", "int").replace("int32", "int");
        let normalized = self.str_type.replace_all(&normalized, ":string$1");
        self.bool_type
            .replace_all(&normalized, ":boolean$1")
            .into_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hunk_span_covers_all_hunks() {
        let p = Patterns::new().unwrap();
        let patch = "diff --git a/x.py b/x.py\n@@ -1,3 +1,5 @@\n+a\n@@ -20,2 +22,4 @@ def f():\n+b\n";
        assert_eq!(p.hunk_span(patch), Some((1, 25)));
    }

    #[test]
    fn test_hunk_span_single_line_and_deletions() {
        let p = Patterns::new().unwrap();
        assert_eq!(p.hunk_span("@@ -3 +3 @@\n-a\n+b\n"), Some((3, 3)));
        assert_eq!(p.hunk_span("@@ -1,4 +0,0 @@\n-a\n"), None);
        assert_eq!(p.hunk_span("no hunks here"), None);
    }

    #[test]
    fn test_normalize_signature() {
        let p = Patterns::new().unwrap();
        assert_eq!(p.normalize_signature("func f(a int64, b int32)"), "funcf(aint,bint)");
        assert_eq!(p.normalize_signature("def g(name: str, ok: bool)"), "defg(name:string,ok:boolean)");
        assert_eq!(p.normalize_signature(""), "");
    }
}
