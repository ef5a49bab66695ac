//! File identity lookup
//!
//! Rename resolution is done by an upstream stage; the atomizer only
//! consumes its result as a `historical path -> canonical path` mapping.

use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result};

use crate::error::CoreError;

/// Maps any historically observed path to its canonical path
pub trait FileIdentityResolver {
    fn resolve(&self, path_at_commit_time: &str) -> String;
}

/// Identity lookup where every path is its own canonical form
#[derive(Debug, Default, Clone, Copy)]
pub struct PathIdentity;

impl FileIdentityResolver for PathIdentity {
    fn resolve(&self, path_at_commit_time: &str) -> String {
        normalize_path(path_at_commit_time)
    }
}

/// Identity lookup backed by an explicit mapping table.
/// Unmapped paths resolve to themselves.
#[derive(Debug, Default, Clone)]
pub struct IdentityMap {
    mapping: HashMap<String, String>,
}

impl IdentityMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records that `historical` is known as `canonical`
    pub fn insert(&mut self, historical: &str, canonical: &str) {
        self.mapping
            .insert(normalize_path(historical), normalize_path(canonical));
    }

    /// Parses a JSON object of `{"historical": "canonical"}` pairs
    pub fn from_json_str(json: &str) -> Result<Self, CoreError> {
        let raw: HashMap<String, String> = serde_json::from_str(json)
            .map_err(|e| CoreError::InvalidIdentityMap(e.to_string()))?;

        let mut map = Self::new();
        for (historical, canonical) in &raw {
            if canonical.trim().is_empty() {
                return Err(CoreError::InvalidIdentityMap(format!(
                    "empty canonical path for '{}'",
                    historical
                )));
            }
            map.insert(historical, canonical);
        }
        Ok(map)
    }

    /// Loads a mapping file written by the rename-resolution stage
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read identity map {}", path.display()))?;
        let map = Self::from_json_str(&content)
            .with_context(|| format!("Failed to parse identity map {}", path.display()))?;
        log::info!("Loaded {} file identity mappings", map.len());
        Ok(map)
    }

    pub fn len(&self) -> usize {
        self.mapping.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mapping.is_empty()
    }
}

impl FileIdentityResolver for IdentityMap {
    fn resolve(&self, path_at_commit_time: &str) -> String {
        let path = normalize_path(path_at_commit_time);
        match self.mapping.get(&path) {
            Some(canonical) => canonical.clone(),
            None => path,
        }
    }
}

/// Strips `./` and leading slashes, and collapses doubled separators
pub fn normalize_path(path: &str) -> String {
    path.trim()
        .trim_start_matches("./")
        .split('/')
        .filter(|s| !s.is_empty() && *s != ".")
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_path() {
        assert_eq!(normalize_path("./src//lib.rs"), "src/lib.rs");
        assert_eq!(normalize_path("/app/main.py"), "app/main.py");
        assert_eq!(normalize_path("a.go"), "a.go");
    }

    #[test]
    fn test_path_identity_is_passthrough() {
        assert_eq!(PathIdentity.resolve("utils.py"), "utils.py");
    }

    #[test]
    fn test_identity_map_resolves_historical_paths() {
        let map = IdentityMap::from_json_str(r#"{"old/utils.py": "lib/utils.py"}"#).unwrap();
        assert_eq!(map.resolve("old/utils.py"), "lib/utils.py");
        assert_eq!(map.resolve("./old/utils.py"), "lib/utils.py");
        assert_eq!(map.resolve("other.py"), "other.py");
    }

    #[test]
    fn test_identity_map_rejects_bad_json() {
        assert!(IdentityMap::from_json_str("[1, 2]").is_err());
        assert!(IdentityMap::from_json_str(r#"{"a.py": "  "}"#).is_err());
    }
}
