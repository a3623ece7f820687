//! Per-task git worktrees and their reconciliation into the main line.

pub mod git;
mod manager;
mod porcelain;

pub use manager::{MergeOutcome, Workspace, WorkspaceConfig, WorkspaceManager, WORKTREES_DIR};
pub use porcelain::{parse_worktree_list, WorktreeInfo};
