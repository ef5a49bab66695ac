//! Error types for atomizer-engine

/// Failure to establish a trustworthy replay order. Always fatal.
#[derive(Debug, thiserror::Error)]
pub enum OrderingError {
    #[error("Failed to walk commit history: {0}")]
    Walk(String),

    #[error("Commit {commit} appears before its parent {parent}")]
    Topology { commit: String, parent: String },

    #[error("History rewritten at commit {commit} ({detail}); resync required")]
    HistoryRewritten { commit: String, detail: String },
}

/// Errors that abort an atomizer run
#[derive(Debug, thiserror::Error)]
pub enum AtomizeError {
    #[error(transparent)]
    Ordering(#[from] OrderingError),

    #[error("Ledger unavailable: {0:#}")]
    Store(anyhow::Error),
}

impl AtomizeError {
    /// Ordering failures leave the ledger untouched but need an external resync
    pub fn is_ordering(&self) -> bool {
        matches!(self, AtomizeError::Ordering(_))
    }
}
