//! Atomizer DB - Ledger and graph mirror persistence
//!
//! This crate manages the local sled databases: the transactional block
//! ledger (source of truth, one transaction per commit) and the graph
//! mirror (a best-effort derived cache behind the `GraphStore` trait).

mod batch;
mod error;
mod ledger;
pub mod fakes;
pub mod graph;

pub use batch::{AppliedCommit, CommitBatch, FailedCommit};
pub use error::LedgerError;
pub use graph::{coverage, GraphStore, SledGraph, STALENESS_THRESHOLD};
pub use ledger::{LedgerDb, LedgerStats};
