//! Output formatting structures for CLI display

use tabled::Tabled;

/// Table row for displaying blocks of a file
#[derive(Tabled)]
pub struct BlockRow {
    #[tabled(rename = "Id")]
    pub id: u64,
    #[tabled(rename = "Block")]
    pub name: String,
    #[tabled(rename = "Type")]
    pub block_type: String,
    #[tabled(rename = "Lines")]
    pub lines: String,
    #[tabled(rename = "Status")]
    pub status: String,
    #[tabled(rename = "Last Commit")]
    pub last_commit: String,
    #[tabled(rename = "Modified")]
    pub modified: String,
}

/// Table row for displaying change records
#[derive(Tabled)]
pub struct ChangeRow {
    #[tabled(rename = "Commit")]
    pub commit: String,
    #[tabled(rename = "Change")]
    pub change: String,
    #[tabled(rename = "Block")]
    pub block: String,
    #[tabled(rename = "+/-")]
    pub lines: String,
    #[tabled(rename = "Date")]
    pub date: String,
    #[tabled(rename = "Summary")]
    pub summary: String,
}
