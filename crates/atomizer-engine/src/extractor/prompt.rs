//! Prompt sent to the model for each commit chunk

use atomizer_core::CommitRecord;

const PROMPT_TEMPLATE: &str = r#"You extract code block changes from a git commit.

COMMIT MESSAGE:
{message}

DIFF:
{diff}

Return ONE JSON object and nothing else:
{
  "llm_intent_summary": "one sentence describing the intent of the change",
  "change_events": [
    {
      "behavior": "MODIFY_BLOCK",
      "target_file": "src/auth/session.py",
      "target_block_name": "login",
      "block_type": "function",
      "signature": "def login(user, password)",
      "start_line": 12,
      "end_line": 40
    }
  ]
}

Rules:
- behavior is one of CREATE_BLOCK, MODIFY_BLOCK, DELETE_BLOCK, RENAME_BLOCK, ADD_IMPORT, REMOVE_IMPORT.
- target_file is the file path exactly as it appears in the diff header.
- target_block_name is only the short name of the function, method or class (at most 100 characters).
- block_type is one of function, method, class, component. Ignore variables, constants and documentation.
- RENAME_BLOCK also carries old_block_name and, when the block moved between files, old_file.
- ADD_IMPORT and REMOVE_IMPORT carry dependency_path instead of target_block_name and block_type.
- old_version and new_version (code snippets) are optional.
- Use an empty change_events array when no code block changed.
"#;

/// Builds the extraction prompt for one chunk of a commit's diff
pub fn build_prompt(commit: &CommitRecord, diff: &str) -> String {
    PROMPT_TEMPLATE
        .replace("{message}", commit.message.trim())
        .replace("{diff}", diff)
}
