//! Thin async wrapper around the `git` binary.
//!
//! Workspace operations shell out rather than going through libgit2 so the
//! exact commands are the ones a user would type, and so worktree and merge
//! behavior matches the installed git.

use std::path::Path;

use tokio::process::Command;

use crate::error::{Error, Result};
use crate::util::command_message;
use crate::{clog_debug, clog_trace};

/// Captured result of one git invocation.
#[derive(Debug, Clone)]
pub struct GitOutput {
    pub success: bool,
    pub stdout: String,
    pub message: String,
}

/// Run `git <args>` in `cwd`. Only a failure to start git is an error; a
/// non-zero exit is reported through [`GitOutput::success`].
pub async fn run(cwd: &Path, args: &[&str]) -> Result<GitOutput> {
    let command = args.join(" ");
    clog_debug!("git {} (in {})", command, cwd.display());

    let output = Command::new("git")
        .args(args)
        .current_dir(cwd)
        .output()
        .await
        .map_err(|e| Error::GitCommand {
            command: command.clone(),
            message: format!("failed to run git: {}", e),
        })?;

    let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
    clog_trace!("git {} -> {:?}: {}", command, output.status.code(), stdout);

    Ok(GitOutput {
        success: output.status.success(),
        message: command_message(&output),
        stdout,
    })
}

/// Run `git <args>` in `cwd` and return trimmed stdout, failing on a
/// non-zero exit.
pub async fn git(cwd: &Path, args: &[&str]) -> Result<String> {
    let output = run(cwd, args).await?;
    if output.success {
        Ok(output.stdout)
    } else {
        Err(Error::GitCommand {
            command: args.join(" "),
            message: output.message,
        })
    }
}
