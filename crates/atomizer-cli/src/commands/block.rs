//! Block command implementation

use anyhow::Result;
use atomizer_core::identity::normalize_path;
use atomizer_core::BlockIdentity;
use atomizer_db::LedgerDb;
use colored::Colorize;
use tabled::{Table, settings::{Style, Color, Modify, object::Rows}};

use crate::helpers::{block_row, change_row, format_timestamp, short_sha};
use crate::output::{BlockRow, ChangeRow};

/// Shows one block with its history, or lists every block of a file
pub fn cmd_block(repo: &str, path: &str, name: Option<&str>, ledger: &LedgerDb) -> Result<()> {
    let path = normalize_path(path);

    let Some(name) = name else {
        let blocks = ledger.blocks_in_file(repo, &path)?;
        if blocks.is_empty() {
            println!("{} No blocks recorded for {}", "❌".red(), path.bold());
            return Ok(());
        }

        let active = blocks.iter().filter(|b| b.is_active()).count();
        println!("\n{} {}", "📄".bright_cyan(), path.bold().bright_white());
        println!("{}", "━".repeat(60).bright_black());
        println!(
            "  {} {}  {} {}",
            "Blocks:".bright_yellow(),
            blocks.len().to_string().bold(),
            "Active:".bright_green(),
            active.to_string().green().bold()
        );
        println!();

        let rows: Vec<BlockRow> = blocks.iter().map(block_row).collect();
        let mut table = Table::new(rows);
        table.with(Style::rounded())
            .with(Modify::new(Rows::first()).with(Color::FG_BRIGHT_CYAN));
        println!("{}", table);
        return Ok(());
    };

    let identity = BlockIdentity::new(repo, path, name);
    let Some(block) = ledger.get_block(&identity)? else {
        eprintln!("{} Block {} not found in ledger", "❌".red(), identity.to_string().bold());
        let siblings = ledger.blocks_in_file(repo, &identity.canonical_path)?;
        if !siblings.is_empty() {
            let names: Vec<&str> = siblings.iter().map(|b| b.block_name.as_str()).collect();
            eprintln!("\n{} Blocks in {}: {}", "💡".yellow(), identity.canonical_path.bold(), names.join(", "));
        }
        std::process::exit(1);
    };

    println!("\n{} {}", "🧱 Block:".bright_cyan(), identity.to_string().bold());
    println!("{}", "━".repeat(60).bright_black());
    println!("  {}         {}", "Id:".bright_yellow(), block.id);
    println!("  {}       {}", "Type:".bright_yellow(), block.block_type);
    println!("  {}   {}", "Language:".bright_yellow(), block.language);
    if block.is_active() {
        println!("  {}     {}", "Status:".bright_yellow(), block.status.to_string().green());
    } else {
        println!("  {}     {}", "Status:".bright_yellow(), block.status.to_string().red());
    }
    println!("  {}      {}", "Lines:".bright_yellow(), block.line_span());
    if let Some(signature) = &block.signature {
        println!("  {}  {}", "Signature:".bright_yellow(), signature.bright_white());
    }
    if let Some(complexity) = block.complexity {
        println!("  {} {}", "Complexity:".bright_yellow(), complexity);
    }
    if block.path_at_creation != block.canonical_path {
        println!("  {}   {}", "Born as:".bright_yellow(), block.path_at_creation);
    }
    println!("  {} {}", "First seen:".bright_yellow(), short_sha(&block.first_seen_sha));
    println!(
        "  {}   {} ({})",
        "Touched:".bright_yellow(),
        short_sha(&block.last_modified_sha),
        format_timestamp(block.last_modified_at)
    );

    let changes = ledger.changes_for_block(block.id)?;
    if !changes.is_empty() {
        println!("\n{} {} changes", "📜".bright_cyan(), changes.len().to_string().bold());
        let rows: Vec<ChangeRow> = changes.iter().map(change_row).collect();
        let mut table = Table::new(rows);
        table.with(Style::rounded())
            .with(Modify::new(Rows::first()).with(Color::FG_BRIGHT_CYAN));
        println!("{}", table);
    }

    Ok(())
}
