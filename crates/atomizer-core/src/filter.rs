//! Source-file classification
//!
//! Decides which changed paths are worth sending to the extractor.
//! Everything here is pure and cheap; it runs before any diff text is
//! rendered.

/// Directory names excluded anywhere in a path
const EXCLUDED_DIRS: &[&str] = &[
    "vendor",
    "node_modules",
    "build",
    "dist",
    "target",
    "out",
    "bin",
    "obj",
    "__pycache__",
    "coverage",
    "third_party",
    "site-packages",
];

/// Lockfiles and generated manifests, matched on the file name
const EXCLUDED_FILES: &[&str] = &[
    "cargo.lock",
    "package-lock.json",
    "yarn.lock",
    "pnpm-lock.yaml",
    "go.sum",
    "poetry.lock",
    "pipfile.lock",
    "composer.lock",
    "gemfile.lock",
];

/// Extensions treated as source code
const SOURCE_EXTENSIONS: &[&str] = &[
    "go", "py", "js", "jsx", "ts", "tsx", "java", "c", "h", "cpp", "cc", "hpp", "cs", "rs", "rb",
    "php", "swift", "kt", "scala", "clj", "sh", "sql",
];

/// Returns true when `path` is a source file the extractor should see.
///
/// Excludes dot-segments, vendored/build directories, lockfiles, and any
/// extension outside the allow-list (docs, config, media, binaries).
pub fn is_source_file(path: &str) -> bool {
    let path = path.trim_start_matches("./").trim_start_matches('/');
    if path.is_empty() {
        return false;
    }

    let segments: Vec<&str> = path.split('/').collect();
    let Some((file_name, dirs)) = segments.split_last() else {
        return false;
    };

    if segments.iter().any(|s| s.starts_with('.')) {
        return false;
    }

    if dirs.iter().any(|d| EXCLUDED_DIRS.contains(&d.to_ascii_lowercase().as_str())) {
        return false;
    }

    let lower = file_name.to_ascii_lowercase();
    if EXCLUDED_FILES.contains(&lower.as_str()) || lower.ends_with(".min.js") {
        return false;
    }

    match extension(&lower) {
        Some(ext) => SOURCE_EXTENSIONS.contains(&ext),
        None => false,
    }
}

/// Maps a path to a language tag; "unknown" when the extension is not recognised
pub fn detect_language(path: &str) -> &'static str {
    let lower = path.to_ascii_lowercase();
    match extension(&lower) {
        Some("go") => "go",
        Some("py") => "python",
        Some("js") | Some("jsx") => "javascript",
        Some("ts") | Some("tsx") => "typescript",
        Some("java") => "java",
        Some("c") | Some("h") => "c",
        Some("cpp") | Some("cc") | Some("hpp") => "cpp",
        Some("cs") => "csharp",
        Some("rs") => "rust",
        Some("rb") => "ruby",
        Some("php") => "php",
        Some("swift") => "swift",
        Some("kt") => "kotlin",
        Some("scala") => "scala",
        Some("clj") => "clojure",
        Some("sh") => "shell",
        Some("sql") => "sql",
        _ => "unknown",
    }
}

fn extension(file_name: &str) -> Option<&str> {
    let name = file_name.rsplit('/').next().unwrap_or(file_name);
    match name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => Some(ext),
        _ => None,
    }
}
