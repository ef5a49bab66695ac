//! Code-Atomizer CLI - User interface for the block history ledger
//!
//! Provides:
//! - Chronological atomization of a git repository into code blocks
//! - Forced reprocessing of a repository from scratch
//! - Ledger and graph mirror statistics
//! - Block and change-history queries

mod commands;
mod helpers;
mod output;

use anyhow::{Context, Result};
use atomizer_db::LedgerDb;
use atomizer_engine::extractor::{DEFAULT_ENDPOINT, DEFAULT_MODEL};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use commands::{cmd_atomize, cmd_block, cmd_history, cmd_stats};

#[derive(Parser)]
#[command(name = "code-atomizer")]
#[command(about = "Replays git history into a ledger of semantic code blocks", long_about = None)]
#[command(version)]
struct Cli {
    /// Path to the ledger database
    #[arg(short, long, default_value = "./atomizer.db")]
    database: PathBuf,

    /// Path to the graph mirror database
    #[arg(short, long, default_value = "./atomizer-graph.db")]
    graph: PathBuf,

    /// Log level
    #[arg(long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

/// Options shared by `atomize` and `reprocess`
#[derive(Args)]
pub struct RunArgs {
    /// Path to local git repository
    #[arg(short, long)]
    pub repo: PathBuf,

    /// Repository identifier used in block identities (e.g., "acme/webapp")
    #[arg(long)]
    pub repo_id: String,

    /// Revision to replay up to (default: HEAD)
    #[arg(long)]
    pub rev: Option<String>,

    /// JSON file mapping historical paths to canonical paths
    #[arg(long)]
    pub identity_map: Option<PathBuf>,

    /// Extractor calls per throttle window
    #[arg(short = 'b', long, default_value = "10")]
    pub batch_size: usize,

    /// Pause between throttle windows, in seconds
    #[arg(long, default_value = "2")]
    pub batch_delay_secs: u64,

    /// Retries after a rate-limited or failed extractor call
    #[arg(long, default_value = "5")]
    pub max_retries: u32,

    /// Maximum number of commits to process in this run
    #[arg(short, long)]
    pub max_commits: Option<usize>,

    /// Log a progress line every N commits
    #[arg(long, default_value = "25")]
    pub progress_interval: usize,

    /// Model API key
    #[arg(long, env = "GEMINI_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    /// Model name
    #[arg(long, env = "ATOMIZER_LLM_MODEL", default_value = DEFAULT_MODEL)]
    pub model: String,

    /// Model API base URL
    #[arg(long, env = "ATOMIZER_LLM_ENDPOINT", default_value = DEFAULT_ENDPOINT)]
    pub endpoint: String,

    /// Per-request timeout for model calls, in seconds
    #[arg(long, default_value = "120")]
    pub llm_timeout_secs: u64,
}

#[derive(Subcommand)]
enum Commands {
    /// Atomizes the unprocessed commits of a repository
    Atomize {
        #[command(flatten)]
        run: RunArgs,

        /// Clear the repository's ledger and graph rows and replay everything
        #[arg(long)]
        force: bool,
    },

    /// Clears a repository and atomizes its whole history again
    Reprocess {
        #[command(flatten)]
        run: RunArgs,
    },

    /// Show ledger and graph mirror statistics
    Stats {
        /// Restrict counters to one repository
        #[arg(long)]
        repo_id: Option<String>,
    },

    /// Shows one block, or every block of a file
    Block {
        /// Repository identifier
        #[arg(long)]
        repo_id: String,

        /// Canonical file path
        path: String,

        /// Block name (optional - displays all blocks of the file)
        name: Option<String>,
    },

    /// Shows change records of a block or of a commit
    History {
        /// Repository identifier
        #[arg(long)]
        repo_id: String,

        /// Block reference as <path>:<name>
        #[arg(long, conflicts_with = "commit", required_unless_present = "commit")]
        block: Option<String>,

        /// Commit SHA
        #[arg(long)]
        commit: Option<String>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Configure logger
    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(&cli.log_level)
    ).init();

    // Open ledger
    let ledger = LedgerDb::open(&cli.database)
        .with_context(|| format!("Failed to open ledger at {:?}", cli.database))?;

    match cli.command {
        Commands::Atomize { run, force } => {
            cmd_atomize(run, force, &cli.graph, &ledger)?;
        }
        Commands::Reprocess { run } => {
            cmd_atomize(run, true, &cli.graph, &ledger)?;
        }
        Commands::Stats { repo_id } => {
            cmd_stats(repo_id.as_deref(), &cli.graph, &ledger)?;
        }
        Commands::Block { repo_id, path, name } => {
            cmd_block(&repo_id, &path, name.as_deref(), &ledger)?;
        }
        Commands::History { repo_id, block, commit } => {
            cmd_history(&repo_id, block.as_deref(), commit.as_deref(), &ledger)?;
        }
    }

    Ok(())
}
