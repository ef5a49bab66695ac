//! Command implementations

mod atomize;
mod block;
mod history;
mod stats;

pub use atomize::cmd_atomize;
pub use block::cmd_block;
pub use history::cmd_history;
pub use stats::cmd_stats;
