//! Atomize command implementation

use anyhow::{Context, Result};
use atomizer_core::{FileIdentityResolver, IdentityMap, PathIdentity};
use atomizer_db::{LedgerDb, SledGraph};
use atomizer_engine::{Atomizer, AtomizerConfig, GitHistory, LlmConfig, LlmExtractor};
use colored::Colorize;
use std::path::Path;
use std::time::Duration;

use crate::RunArgs;

/// Atomizes a repository (from scratch when `force` is set)
pub fn cmd_atomize(run: RunArgs, force: bool, graph_path: &Path, ledger: &LedgerDb) -> Result<()> {
    log::info!("Starting atomization of repository at {:?} as {}", run.repo, run.repo_id);

    let graph = SledGraph::open(graph_path)
        .with_context(|| format!("Failed to open graph store at {:?}", graph_path))?;

    let mut history = GitHistory::open(&run.repo)
        .with_context(|| format!("Failed to open repository at {:?}", run.repo))?;
    if let Some(rev) = &run.rev {
        log::info!("Replaying history up to {}", rev);
        history = history.with_rev(rev);
    }

    let resolver: Box<dyn FileIdentityResolver> = match &run.identity_map {
        Some(path) => Box::new(IdentityMap::from_json_file(path)?),
        None => Box::new(PathIdentity),
    };

    let config = AtomizerConfig {
        batch_size: run.batch_size,
        batch_delay: Duration::from_secs(run.batch_delay_secs),
        max_retries: run.max_retries,
        progress_interval: run.progress_interval,
        force,
        max_commits: run.max_commits,
        ..AtomizerConfig::default()
    };
    log::info!(
        "Throttle: {} calls per {}s window, {} retries",
        config.batch_size,
        run.batch_delay_secs,
        config.max_retries
    );

    let llm = LlmConfig {
        endpoint: run.endpoint,
        model: run.model,
        api_key: run.api_key.filter(|k| !k.is_empty()),
        timeout: Duration::from_secs(run.llm_timeout_secs),
        ..LlmConfig::default()
    };
    log::info!("Model: {}", llm.model);
    let mut extractor = LlmExtractor::new(llm, &config)
        .context("Failed to create extractor")?;

    let atomizer = Atomizer::new(&run.repo_id, ledger, &graph, resolver.as_ref())
        .with_config(config);
    let summary = atomizer
        .run(&history, &mut extractor)
        .with_context(|| format!("Atomization of {} aborted", run.repo_id))?;

    if let Err(e) = graph.flush() {
        log::warn!("Failed to flush graph store: {:#}", e);
    }

    println!("\n{} {}", "✅".green(), summary);
    if summary.errors() > 0 {
        println!(
            "{} {} commits failed and stay unprocessed; run {} again to retry them",
            "⚠️".yellow(),
            summary.errors().to_string().bold(),
            "atomize".bright_cyan()
        );
    }
    if summary.graph_failures > 0 {
        println!(
            "{} {} graph rows were not mirrored; the ledger is complete",
            "⚠️".yellow(),
            summary.graph_failures.to_string().bold()
        );
    }

    Ok(())
}
