//! Graph mirror of the ledger
//!
//! The graph store is a derived cache: blocks become nodes, change records
//! become `commit -> block` edges and import edges become `file -> module`
//! edges. It never owns data; every row can be rebuilt from the ledger.

use anyhow::{Context, Result};
use atomizer_core::{CodeBlock, CodeBlockChange, ImportEdge, KEY_SEPARATOR};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Store contract for the graph mirror.
///
/// Every write is an idempotent upsert: mirroring the same row twice leaves
/// the graph unchanged. Implementations may fail at any time; callers treat
/// failures as non-fatal.
pub trait GraphStore {
    /// Creates or updates the node for a block
    fn upsert_block(&self, block: &CodeBlock) -> Result<()>;

    /// Records a change as an edge from its commit to its block
    fn record_change(&self, change: &CodeBlockChange) -> Result<()>;

    /// Creates or updates a file-to-module dependency edge
    fn upsert_import(&self, edge: &ImportEdge) -> Result<()>;

    /// Drops every node and edge of a repository
    fn clear_repo(&self, repo: &str) -> Result<()>;

    /// Number of block nodes of a repository
    fn block_count(&self, repo: &str) -> Result<usize>;
}

/// Block node as stored in the mirror
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphNode {
    pub block_id: u64,
    pub label: String,
    pub block_type: String,
    pub active: bool,
    pub last_modified_sha: String,
}

/// Typed edge as stored in the mirror
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphEdge {
    pub kind: String,
    pub from: String,
    pub to: String,
    pub live: bool,
}

fn node_key(repo: &str, block_id: u64) -> Vec<u8> {
    let mut key = format!("{}{}", repo, KEY_SEPARATOR).into_bytes();
    key.extend_from_slice(&block_id.to_be_bytes());
    key
}

fn edge_key(repo: &str, kind: &str, from: &str, to: &str) -> String {
    format!(
        "{}{sep}{}{sep}{}{sep}{}",
        repo,
        kind,
        from,
        to,
        sep = KEY_SEPARATOR
    )
}

/// Graph mirror persisted in its own sled database
pub struct SledGraph {
    /// Block nodes (key: "repo␟" + block id)
    nodes: sled::Tree,

    /// Edges (key: "repo␟kind␟from␟to")
    edges: sled::Tree,

    db: sled::Db,
}

impl SledGraph {
    /// Opens or creates a graph mirror at the specified location
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let db = sled::open(path.as_ref())
            .with_context(|| format!("Failed to open graph store at {:?}", path.as_ref()))?;
        let nodes = db.open_tree("nodes").context("Failed to open nodes tree")?;
        let edges = db.open_tree("edges").context("Failed to open edges tree")?;
        Ok(Self { nodes, edges, db })
    }

    /// Retrieves a block node
    pub fn node(&self, repo: &str, block_id: u64) -> Result<Option<GraphNode>> {
        match self.nodes.get(node_key(repo, block_id))? {
            Some(bytes) => Ok(Some(
                bincode::deserialize(&bytes).context("Failed to deserialize GraphNode")?,
            )),
            None => Ok(None),
        }
    }

    /// Number of block nodes across all repositories
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Number of edges of a repository
    pub fn edge_count(&self, repo: &str) -> usize {
        self.edges
            .scan_prefix(format!("{}{}", repo, KEY_SEPARATOR).as_bytes())
            .count()
    }

    /// Flushes all pending operations to disk
    pub fn flush(&self) -> Result<()> {
        self.db.flush().context("Failed to flush graph store")?;
        Ok(())
    }

    fn put_edge(&self, repo: &str, edge: &GraphEdge) -> Result<()> {
        let key = edge_key(repo, &edge.kind, &edge.from, &edge.to);
        let value = bincode::serialize(edge).context("Failed to serialize GraphEdge")?;
        self.edges
            .insert(key.as_bytes(), value)
            .context("Failed to write graph edge")?;
        Ok(())
    }
}

impl GraphStore for SledGraph {
    fn upsert_block(&self, block: &CodeBlock) -> Result<()> {
        let node = GraphNode {
            block_id: block.id,
            label: block.identity().to_string(),
            block_type: block.block_type.to_string(),
            active: block.is_active(),
            last_modified_sha: block.last_modified_sha.clone(),
        };
        let value = bincode::serialize(&node).context("Failed to serialize GraphNode")?;
        self.nodes
            .insert(node_key(&block.repo, block.id), value)
            .context("Failed to write graph node")?;
        Ok(())
    }

    fn record_change(&self, change: &CodeBlockChange) -> Result<()> {
        self.put_edge(
            &change.repo,
            &GraphEdge {
                kind: change.change_type.to_string(),
                from: change.commit_sha.clone(),
                to: change.block_id.to_string(),
                live: true,
            },
        )
    }

    fn upsert_import(&self, edge: &ImportEdge) -> Result<()> {
        self.put_edge(
            &edge.repo,
            &GraphEdge {
                kind: "imports".to_string(),
                from: edge.source_path.clone(),
                to: edge.dependency_path.clone(),
                live: edge.is_live(),
            },
        )
    }

    fn clear_repo(&self, repo: &str) -> Result<()> {
        let prefix = format!("{}{}", repo, KEY_SEPARATOR);
        for tree in [&self.nodes, &self.edges] {
            let keys: Vec<_> = tree
                .scan_prefix(prefix.as_bytes())
                .keys()
                .collect::<Result<_, _>>()
                .context("Failed to read from graph store")?;
            for key in keys {
                tree.remove(key)?;
            }
        }
        Ok(())
    }

    fn block_count(&self, repo: &str) -> Result<usize> {
        Ok(self
            .nodes
            .scan_prefix(format!("{}{}", repo, KEY_SEPARATOR).as_bytes())
            .count())
    }
}

/// Share of ledger blocks present in the graph mirror
pub fn coverage(graph_blocks: usize, ledger_blocks: usize) -> f64 {
    if ledger_blocks == 0 {
        return 1.0;
    }
    graph_blocks as f64 / ledger_blocks as f64
}

/// Coverage below which the mirror is considered stale
pub const STALENESS_THRESHOLD: f64 = 0.95;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_coverage() {
        assert_eq!(coverage(0, 0), 1.0);
        assert_eq!(coverage(19, 20), 0.95);
        assert!(coverage(18, 20) < STALENESS_THRESHOLD);
    }
}
