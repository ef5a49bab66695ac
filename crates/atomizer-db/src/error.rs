//! Error types for atomizer-db

/// Errors that abort a ledger transaction
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LedgerError {
    #[error("Block identity {identity} already belongs to live block #{existing} (writing #{incoming})")]
    DuplicateIdentity {
        identity: String,
        existing: u64,
        incoming: u64,
    },

    #[error("Corrupt row in tree '{tree}': {detail}")]
    CorruptRow { tree: &'static str, detail: String },
}
