//! Error types for atomizer-core

/// Errors specific to atomizer-core
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Invalid block reference '{0}' (expected <path>:<name>)")]
    InvalidBlockRef(String),

    #[error("Invalid identity map: {0}")]
    InvalidIdentityMap(String),

    #[error("Unknown block type: {0}")]
    UnknownBlockType(String),
}
