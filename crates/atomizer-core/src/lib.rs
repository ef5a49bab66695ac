//! Atomizer Core - Shared data models for the block ledger
//!
//! This crate defines the data structures used throughout the project:
//! code blocks and their identity, change records, change events coming
//! out of the extractor, commit records, the source-file filter and the
//! file identity lookup.

mod models;
mod error;
mod events;
mod commit;
pub mod filter;
pub mod identity;

pub use models::{
    BlockIdentity, BlockStatus, BlockType, ChangeType, CodeBlock, CodeBlockChange, ImportEdge,
    KEY_SEPARATOR,
};
pub use events::{ChangeEvent, EventKind};
pub use commit::{CommitRecord, FileDiff, FileStatus};
pub use error::CoreError;
pub use filter::{detect_language, is_source_file};
pub use identity::{FileIdentityResolver, IdentityMap, PathIdentity};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_identity_key() {
        let id = BlockIdentity::new("acme/web", "src/a.py", "helper");
        assert_eq!(id.key(), "acme/web\u{1f}src/a.py\u{1f}helper");
        assert!(id.key().starts_with(&BlockIdentity::file_prefix("acme/web", "src/a.py")));
    }

    #[test]
    fn test_change_type_fold() {
        use ChangeType::*;
        assert_eq!(Created.fold(Modified), Created);
        assert_eq!(Created.fold(Renamed), Created);
        assert_eq!(Modified.fold(Renamed), Renamed);
        assert_eq!(Renamed.fold(Modified), Renamed);
        assert_eq!(Modified.fold(Deleted), Deleted);
        assert_eq!(Deleted.fold(Modified), Deleted);
        assert_eq!(Deleted.fold(Created), Created);
        assert_eq!(Modified.fold(Modified), Modified);
    }
}
