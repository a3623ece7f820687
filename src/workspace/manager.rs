//! Isolated per-task checkouts of the shared repository.
//!
//! Each workspace is a git worktree on its own branch, rooted at the commit
//! the shared tree pointed to when the workspace was created. Accepted work
//! is folded back with a non-fast-forward merge into the main line.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI64, Ordering};

use git2::{BranchType, Repository};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use super::git::{self, git};
use super::porcelain::{parse_worktree_list, WorktreeInfo};
use crate::error::{Error, Result};
use crate::util::blocking;
use crate::{clog, clog_debug, clog_warn};

/// Directory under the repository root reserved for workspaces.
pub const WORKTREES_DIR: &str = ".conclave/worktrees";

static LAST_MARKER: AtomicI64 = AtomicI64::new(0);

/// Creation marker: the current time in milliseconds, bumped past the last
/// marker handed out so two workspaces created in the same millisecond
/// still get distinct names.
fn next_marker() -> i64 {
    let now = chrono::Utc::now().timestamp_millis();
    let previous = LAST_MARKER
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| {
            Some(now.max(last + 1))
        })
        .unwrap_or(now);
    now.max(previous + 1)
}

/// Replace anything git would reject in a ref or directory name.
fn sanitize(name: &str) -> String {
    let cleaned: String = name
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '-'
            }
        })
        .collect();
    if cleaned.is_empty() {
        "task".to_string()
    } else {
        cleaned
    }
}

/// Naming inputs for a new workspace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkspaceConfig {
    pub prefix: String,
    pub instance_id: String,
}

impl WorkspaceConfig {
    pub fn new(prefix: &str, instance_id: &str) -> Self {
        Self {
            prefix: prefix.to_string(),
            instance_id: instance_id.to_string(),
        }
    }
}

/// An isolated checkout owned by one task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Workspace {
    pub path: PathBuf,
    pub branch: String,
    /// Commit of the shared tree the branch was created from.
    pub base_commit: String,
}

/// Result of folding a workspace back into the main line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum MergeOutcome {
    /// The merge commit now on the main line.
    Merged { commit: String },
    /// Paths git reported as unmerged. The attempted merge has been aborted.
    Conflict { paths: Vec<PathBuf> },
}

impl MergeOutcome {
    pub fn is_merged(&self) -> bool {
        matches!(self, MergeOutcome::Merged { .. })
    }

    pub fn commit(&self) -> Option<&str> {
        match self {
            MergeOutcome::Merged { commit } => Some(commit),
            MergeOutcome::Conflict { .. } => None,
        }
    }
}

/// Creates, commits, merges and removes workspaces of one repository.
///
/// `merge` switches the shared tree's branch, so merges are serialized on an
/// internal lock. Everything else only touches the workspace's own directory.
pub struct WorkspaceManager {
    repo_root: PathBuf,
    main_branch: String,
    merge_lock: Mutex<()>,
}

impl WorkspaceManager {
    /// Open the repository containing `path`. When `main_branch` is `None`
    /// the main line is `main`, else `master`, else whatever HEAD points to.
    pub async fn open(path: &Path, main_branch: Option<String>) -> Result<Self> {
        let path = path.to_path_buf();
        let (repo_root, detected) = blocking(move || {
            let repo = Repository::discover(&path)?;
            let root = repo
                .workdir()
                .ok_or_else(|| Error::Validation("bare repositories are not supported".into()))?
                .to_path_buf();
            exclude_worktrees_dir(&repo)?;
            Ok((root, detect_main_line(&repo)))
        })
        .await?;

        let main_branch = match main_branch {
            Some(branch) => branch,
            None => detected?,
        };
        clog_debug!(
            "WorkspaceManager::open root={} main={}",
            repo_root.display(),
            main_branch
        );

        Ok(Self {
            repo_root,
            main_branch,
            merge_lock: Mutex::new(()),
        })
    }

    pub fn repo_root(&self) -> &Path {
        &self.repo_root
    }

    pub fn main_branch(&self) -> &str {
        &self.main_branch
    }

    pub fn worktrees_dir(&self) -> PathBuf {
        self.repo_root.join(WORKTREES_DIR)
    }

    /// Branch a new workspace off the shared tree's current tip.
    pub async fn create(&self, config: &WorkspaceConfig) -> Result<Workspace> {
        self.create_with_marker(config, next_marker()).await
    }

    async fn create_with_marker(&self, config: &WorkspaceConfig, marker: i64) -> Result<Workspace> {
        let base_commit = git(&self.repo_root, &["rev-parse", "HEAD"])
            .await
            .map_err(|e| Error::WorkspaceCreation(e.to_string()))?;

        let prefix = sanitize(&config.prefix);
        let instance = sanitize(&config.instance_id);
        let path = self
            .worktrees_dir()
            .join(format!("{}-{}-{}", prefix, instance, marker));
        let branch = format!("{}/{}-{}", prefix, instance, marker);

        if path.exists() {
            clog_warn!("Replacing stale workspace at {}", path.display());
            self.destroy_path(&path, &branch)
                .await
                .map_err(|e| Error::WorkspaceCreation(e.to_string()))?;
        }
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| Error::WorkspaceCreation(e.to_string()))?;
        }

        let path_arg = path.to_string_lossy();
        git(
            &self.repo_root,
            &["worktree", "add", "-b", &branch, &path_arg, &base_commit],
        )
        .await
        .map_err(|e| Error::WorkspaceCreation(e.to_string()))?;

        clog!(
            "Created workspace {} on {} from {}",
            path.display(),
            branch,
            base_commit
        );
        Ok(Workspace {
            path,
            branch,
            base_commit,
        })
    }

    /// Stage everything in the workspace and commit it. Fails with `Commit`
    /// when there is nothing to commit.
    pub async fn commit(&self, workspace: &Workspace, message: &str) -> Result<String> {
        git(&workspace.path, &["add", "-A"])
            .await
            .map_err(|e| Error::Commit(e.to_string()))?;
        git(&workspace.path, &["commit", "-m", message])
            .await
            .map_err(|e| Error::Commit(e.to_string()))?;
        let commit = git(&workspace.path, &["rev-parse", "HEAD"])
            .await
            .map_err(|e| Error::Commit(e.to_string()))?;
        clog_debug!("Committed {} on {}", commit, workspace.branch);
        Ok(commit)
    }

    /// True when the workspace has uncommitted or untracked changes.
    pub async fn is_dirty(&self, workspace: &Workspace) -> Result<bool> {
        let status = git(&workspace.path, &["status", "--porcelain"]).await?;
        Ok(!status.is_empty())
    }

    /// Merge the workspace's branch into the main line with a merge commit.
    ///
    /// Conflicts are an ordinary outcome; any other git failure is an error.
    pub async fn merge(&self, workspace: &Workspace) -> Result<MergeOutcome> {
        let _guard = self.merge_lock.lock().await;
        let root = &self.repo_root;

        git(root, &["checkout", &self.main_branch])
            .await
            .map_err(|e| Error::Merge(e.to_string()))?;

        let message = format!("Merge {}", workspace.branch);
        let attempt = git::run(
            root,
            &[
                "merge",
                &workspace.branch,
                "--no-ff",
                "--no-edit",
                "-m",
                &message,
            ],
        )
        .await
        .map_err(|e| Error::Merge(e.to_string()))?;

        if attempt.success {
            let commit = git(root, &["rev-parse", "HEAD"])
                .await
                .map_err(|e| Error::Merge(e.to_string()))?;
            clog!("Merged {} into {} at {}", workspace.branch, self.main_branch, commit);
            return Ok(MergeOutcome::Merged { commit });
        }

        let unmerged = git(root, &["diff", "--name-only", "--diff-filter=U"])
            .await
            .map_err(|e| Error::Merge(e.to_string()))?;
        let paths: Vec<PathBuf> = unmerged
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(PathBuf::from)
            .collect();

        if paths.is_empty() {
            return Err(Error::Merge(attempt.message));
        }

        if let Err(e) = git(root, &["merge", "--abort"]).await {
            clog_warn!("Could not abort conflicted merge of {}: {}", workspace.branch, e);
        }
        clog!(
            "Merge of {} conflicted on {} path(s)",
            workspace.branch,
            paths.len()
        );
        Ok(MergeOutcome::Conflict { paths })
    }

    /// Force-remove the workspace. Removing one that is already gone is not
    /// an error. The branch is kept.
    pub async fn remove(&self, workspace: &Workspace) -> Result<()> {
        let path_arg = workspace.path.to_string_lossy();
        let output = git::run(&self.repo_root, &["worktree", "remove", &path_arg, "--force"])
            .await
            .map_err(|e| Error::WorkspaceRemoval(e.to_string()))?;

        if output.success {
            clog_debug!("Removed workspace {}", workspace.path.display());
            return Ok(());
        }
        if output.message.contains("is not a working tree") {
            clog_debug!("Workspace {} already removed", workspace.path.display());
            return Ok(());
        }
        Err(Error::WorkspaceRemoval(output.message))
    }

    /// Every worktree git knows about, including the shared tree itself.
    pub async fn list_all(&self) -> Result<Vec<WorktreeInfo>> {
        let listing = git(&self.repo_root, &["worktree", "list", "--porcelain"]).await?;
        Ok(parse_worktree_list(&listing))
    }

    /// Clear whatever occupies `path`: the registered worktree if any, the
    /// directory, git's bookkeeping for it, and the branch it was created on.
    async fn destroy_path(&self, path: &Path, branch: &str) -> Result<()> {
        let path_arg = path.to_string_lossy();
        let removed =
            git::run(&self.repo_root, &["worktree", "remove", &path_arg, "--force"]).await?;
        if !removed.success {
            clog_debug!("worktree remove on stale path: {}", removed.message);
        }
        if path.exists() {
            tokio::fs::remove_dir_all(path).await?;
        }
        git::run(&self.repo_root, &["worktree", "prune"]).await?;

        let deleted = git::run(&self.repo_root, &["branch", "-D", branch]).await?;
        if !deleted.success && !deleted.message.contains("not found") {
            return Err(Error::GitCommand {
                command: format!("branch -D {}", branch),
                message: deleted.message,
            });
        }
        Ok(())
    }
}

impl std::fmt::Debug for WorkspaceManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkspaceManager")
            .field("repo_root", &self.repo_root)
            .field("main_branch", &self.main_branch)
            .finish()
    }
}

fn detect_main_line(repo: &Repository) -> Result<String> {
    for candidate in ["main", "master"] {
        if repo.find_branch(candidate, BranchType::Local).is_ok() {
            return Ok(candidate.to_string());
        }
    }
    let head = repo.head()?;
    if head.is_branch() {
        if let Some(name) = head.shorthand() {
            return Ok(name.to_string());
        }
    }
    Err(Error::Validation(
        "cannot determine the main branch; set main_branch in the config".into(),
    ))
}

/// Keep the workspaces directory out of the shared tree's status.
fn exclude_worktrees_dir(repo: &Repository) -> Result<()> {
    let info_dir = repo.path().join("info");
    let exclude = info_dir.join("exclude");
    let existing = std::fs::read_to_string(&exclude).unwrap_or_default();
    if existing.lines().any(|l| l.trim() == "/.conclave/") {
        return Ok(());
    }
    std::fs::create_dir_all(&info_dir)?;
    let mut contents = existing;
    if !contents.is_empty() && !contents.ends_with('\n') {
        contents.push('\n');
    }
    contents.push_str("/.conclave/\n");
    std::fs::write(&exclude, contents)?;
    Ok(())
}
