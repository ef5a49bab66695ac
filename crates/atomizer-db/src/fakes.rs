//! In-memory fakes for the graph store (testing only)
//!
//! Provides `MemoryGraph`, which satisfies the `GraphStore` contract without
//! touching disk, and `UnavailableGraph`, which fails every call.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use anyhow::{bail, Result};
use atomizer_core::{CodeBlock, CodeBlockChange, ImportEdge};

use crate::graph::GraphStore;

// ---------------------------------------------------------------------------
// MemoryGraph
// ---------------------------------------------------------------------------

/// In-memory graph mirror backed by `HashMap`s.
#[derive(Debug, Default)]
pub struct MemoryGraph {
    nodes: Mutex<HashMap<(String, u64), CodeBlock>>,
    changes: Mutex<HashMap<(String, String, u64), CodeBlockChange>>,
    imports: Mutex<HashMap<String, ImportEdge>>,
}

impl MemoryGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total change edges across repositories
    pub fn change_count(&self) -> usize {
        self.changes.lock().unwrap().len()
    }

    /// Total import edges across repositories
    pub fn import_count(&self) -> usize {
        self.imports.lock().unwrap().len()
    }

    pub fn node(&self, repo: &str, block_id: u64) -> Option<CodeBlock> {
        self.nodes
            .lock()
            .unwrap()
            .get(&(repo.to_string(), block_id))
            .cloned()
    }
}

impl GraphStore for MemoryGraph {
    fn upsert_block(&self, block: &CodeBlock) -> Result<()> {
        let mut nodes = self.nodes.lock().unwrap();
        nodes.insert((block.repo.clone(), block.id), block.clone());
        Ok(())
    }

    fn record_change(&self, change: &CodeBlockChange) -> Result<()> {
        let mut changes = self.changes.lock().unwrap();
        changes.insert(
            (change.repo.clone(), change.commit_sha.clone(), change.block_id),
            change.clone(),
        );
        Ok(())
    }

    fn upsert_import(&self, edge: &ImportEdge) -> Result<()> {
        let mut imports = self.imports.lock().unwrap();
        imports.insert(edge.key(), edge.clone());
        Ok(())
    }

    fn clear_repo(&self, repo: &str) -> Result<()> {
        self.nodes.lock().unwrap().retain(|(r, _), _| r != repo);
        self.changes.lock().unwrap().retain(|(r, _, _), _| r != repo);
        self.imports.lock().unwrap().retain(|_, e| e.repo != repo);
        Ok(())
    }

    fn block_count(&self, repo: &str) -> Result<usize> {
        let nodes = self.nodes.lock().unwrap();
        Ok(nodes.keys().filter(|(r, _)| r == repo).count())
    }
}

// ---------------------------------------------------------------------------
// UnavailableGraph
// ---------------------------------------------------------------------------

/// Graph store that is always down. Counts the calls it rejected.
#[derive(Debug, Default)]
pub struct UnavailableGraph {
    rejected: AtomicUsize,
}

impl UnavailableGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of calls rejected so far
    pub fn rejected(&self) -> usize {
        self.rejected.load(Ordering::SeqCst)
    }

    fn reject<T>(&self) -> Result<T> {
        self.rejected.fetch_add(1, Ordering::SeqCst);
        bail!("graph store unavailable")
    }
}

impl GraphStore for UnavailableGraph {
    fn upsert_block(&self, _block: &CodeBlock) -> Result<()> {
        self.reject()
    }

    fn record_change(&self, _change: &CodeBlockChange) -> Result<()> {
        self.reject()
    }

    fn upsert_import(&self, _edge: &ImportEdge) -> Result<()> {
        self.reject()
    }

    fn clear_repo(&self, _repo: &str) -> Result<()> {
        self.reject()
    }

    fn block_count(&self, _repo: &str) -> Result<usize> {
        self.reject()
    }
}
