//! Atomizer entry point and run configuration

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use atomizer_core::FileIdentityResolver;
use atomizer_db::{GraphStore, LedgerDb};

/// Run tuning
#[derive(Debug, Clone)]
pub struct AtomizerConfig {
    /// Extractor calls per batch before pausing
    pub batch_size: usize,

    /// Pause after each full batch
    pub batch_delay: Duration,

    /// Retries after a rate limit or transport failure
    pub max_retries: u32,

    /// First backoff delay; doubles on every retry
    pub backoff_base: Duration,

    /// Largest diff chunk sent in one extractor call
    pub max_chunk_chars: usize,

    /// Commits between progress lines
    pub progress_interval: usize,

    /// Clear the repository and replay everything
    pub force: bool,

    /// Stop after this many pending commits
    pub max_commits: Option<usize>,
}

impl Default for AtomizerConfig {
    fn default() -> Self {
        Self {
            batch_size: 10,
            batch_delay: Duration::from_secs(2),
            max_retries: 5,
            backoff_base: Duration::from_secs(5),
            max_chunk_chars: 15_000,
            progress_interval: 25,
            force: false,
            max_commits: None,
        }
    }
}

/// Shared stop request, honoured between commits
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Replays a repository's history into the block ledger
pub struct Atomizer<'a> {
    /// Repository identifier (e.g., "acme/webapp")
    pub(crate) repo: String,

    pub(crate) ledger: &'a LedgerDb,

    pub(crate) graph: &'a dyn GraphStore,

    pub(crate) resolver: &'a dyn FileIdentityResolver,

    pub(crate) config: AtomizerConfig,

    pub(crate) cancel: CancelFlag,
}

impl<'a> Atomizer<'a> {
    pub fn new(
        repo: &str,
        ledger: &'a LedgerDb,
        graph: &'a dyn GraphStore,
        resolver: &'a dyn FileIdentityResolver,
    ) -> Self {
        Self {
            repo: repo.to_string(),
            ledger,
            graph,
            resolver,
            config: AtomizerConfig::default(),
            cancel: CancelFlag::new(),
        }
    }

    pub fn with_config(mut self, config: AtomizerConfig) -> Self {
        self.config = config;
        self
    }

    /// Uses an externally owned cancel flag (e.g., wired to Ctrl-C)
    pub fn with_cancel_flag(mut self, cancel: CancelFlag) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancel_flag(&self) -> CancelFlag {
        self.cancel.clone()
    }

    pub fn repo(&self) -> &str {
        &self.repo
    }

    pub fn config(&self) -> &AtomizerConfig {
        &self.config
    }
}
