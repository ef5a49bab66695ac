//! History command implementation

use anyhow::Result;
use atomizer_core::BlockIdentity;
use atomizer_db::LedgerDb;
use colored::Colorize;
use tabled::{Table, settings::{Style, Color, Modify, object::Rows}};

use crate::helpers::change_row;
use crate::output::ChangeRow;

/// Shows the change records of a block (`path:name`) or of a commit
pub fn cmd_history(
    repo: &str,
    block_ref: Option<&str>,
    commit: Option<&str>,
    ledger: &LedgerDb,
) -> Result<()> {
    let (title, changes) = match (block_ref, commit) {
        (Some(reference), _) => {
            let identity = BlockIdentity::parse_ref(repo, reference)?;
            let Some(block) = ledger.get_block(&identity)? else {
                eprintln!("{} Block {} not found in ledger", "❌".red(), identity.to_string().bold());
                std::process::exit(1);
            };
            (identity.to_string(), ledger.changes_for_block(block.id)?)
        }
        (None, Some(sha)) => (format!("commit {}", sha), ledger.changes_for_commit(repo, sha)?),
        (None, None) => anyhow::bail!("Either --block or --commit is required"),
    };

    if changes.is_empty() {
        println!("{} No change records for {}", "❌".red(), title.bold());
        return Ok(());
    }

    println!("\n{} {}", "📜".bright_cyan(), title.bold().bright_white());
    println!("{}", "━".repeat(60).bright_black());
    println!("  {} {}", "Changes:".bright_yellow(), changes.len().to_string().bold());
    println!();

    let rows: Vec<ChangeRow> = changes.iter().map(change_row).collect();
    let mut table = Table::new(rows);
    table.with(Style::rounded())
        .with(Modify::new(Rows::first()).with(Color::FG_BRIGHT_CYAN));
    println!("{}", table);

    Ok(())
}
