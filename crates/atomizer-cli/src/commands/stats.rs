//! Stats command implementation

use anyhow::{Context, Result};
use atomizer_db::{coverage, GraphStore, LedgerDb, SledGraph, STALENESS_THRESHOLD};
use atomizer_engine::formatting::format_number;
use colored::Colorize;
use std::path::Path;

use crate::helpers::format_bytes;

/// Displays ledger and graph mirror statistics
pub fn cmd_stats(repo_id: Option<&str>, graph_path: &Path, ledger: &LedgerDb) -> Result<()> {
    let stats = match repo_id {
        Some(repo) => ledger.repo_stats(repo)?,
        None => ledger.stats()?,
    };

    let title = match repo_id {
        Some(repo) => format!("Ledger Statistics ({}):", repo),
        None => "Ledger Statistics:".to_string(),
    };
    println!("{}", title.bright_cyan().bold());
    println!(
        "  {}: {} ({} active)",
        "Blocks".bright_yellow(),
        format_number(stats.blocks).bold(),
        format_number(stats.active_blocks)
    );
    println!("  {}: {}", "Change records".bright_yellow(), format_number(stats.changes).bold());
    println!("  {}: {}", "Import edges".bright_yellow(), format_number(stats.import_edges).bold());
    println!("  {}: {}", "Processed commits".bright_yellow(), format_number(stats.processed_commits).bold());
    if stats.failed_commits > 0 {
        println!(
            "  {}: {}",
            "Failed commits".bright_yellow(),
            stats.failed_commits.to_string().red().bold()
        );
    } else {
        println!("  {}: 0", "Failed commits".bright_yellow());
    }
    println!("  {}: {}", "Size on disk".bright_yellow(), format_bytes(ledger.db_size_bytes()));

    let graph = SledGraph::open(graph_path)
        .with_context(|| format!("Failed to open graph store at {:?}", graph_path))?;
    let graph_blocks = match repo_id {
        Some(repo) => graph.block_count(repo)?,
        None => graph.node_count(),
    };
    let ratio = coverage(graph_blocks, stats.blocks);
    let pct = format!("{:.1}%", ratio * 100.0);

    println!("\n{}", "Graph Mirror:".bright_cyan().bold());
    println!("  {}: {}", "Block nodes".bright_yellow(), format_number(graph_blocks).bold());
    if let Some(repo) = repo_id {
        println!("  {}: {}", "Edges".bright_yellow(), format_number(graph.edge_count(repo)).bold());
    }
    if ratio < STALENESS_THRESHOLD {
        println!(
            "  {}: {} {}",
            "Coverage".bright_yellow(),
            pct.red().bold(),
            "(stale, rebuild from the ledger)".dimmed()
        );
    } else {
        println!("  {}: {}", "Coverage".bright_yellow(), pct.green().bold());
    }

    Ok(())
}
