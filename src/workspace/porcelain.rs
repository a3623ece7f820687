//! Parser for `git worktree list --porcelain`.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// One entry of the worktree listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorktreeInfo {
    pub path: PathBuf,
    /// Checked-out commit; empty for bare entries.
    pub head: String,
    /// Short branch name, `None` when detached.
    pub branch: Option<String>,
    pub locked: bool,
}

/// Parse porcelain output: one attribute per line, records separated by a
/// blank line. Unknown attributes (`bare`, `detached`, `prunable ...`) are
/// skipped.
pub fn parse_worktree_list(output: &str) -> Vec<WorktreeInfo> {
    let mut entries = Vec::new();
    let mut current: Option<WorktreeInfo> = None;

    for line in output.lines() {
        let line = line.trim_end();
        if line.is_empty() {
            entries.extend(current.take());
            continue;
        }

        if let Some(path) = line.strip_prefix("worktree ") {
            entries.extend(current.take());
            current = Some(WorktreeInfo {
                path: PathBuf::from(path),
                head: String::new(),
                branch: None,
                locked: false,
            });
            continue;
        }

        let Some(entry) = current.as_mut() else {
            continue;
        };
        if let Some(head) = line.strip_prefix("HEAD ") {
            entry.head = head.to_string();
        } else if let Some(branch) = line.strip_prefix("branch ") {
            let short = branch.strip_prefix("refs/heads/").unwrap_or(branch);
            entry.branch = Some(short.to_string());
        } else if line == "locked" || line.starts_with("locked ") {
            entry.locked = true;
        }
    }

    entries.extend(current);
    entries
}
