//! Shared utility functions.

use tokio::task::spawn_blocking;

use crate::{Error, Result};

/// Run synchronous work (libgit2 calls, hashing large files) off the async
/// worker threads.
pub async fn blocking<F, T>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    spawn_blocking(f)
        .await
        .map_err(|e| Error::TaskJoin(e.to_string()))?
}

/// Render a process's stderr (or stdout when stderr is empty) as a one-line
/// error message.
pub fn command_message(output: &std::process::Output) -> String {
    let stderr = String::from_utf8_lossy(&output.stderr);
    let stderr = stderr.trim();
    if !stderr.is_empty() {
        return stderr.to_string();
    }
    let stdout = String::from_utf8_lossy(&output.stdout);
    let stdout = stdout.trim();
    if !stdout.is_empty() {
        return stdout.to_string();
    }
    format!("exited with code {}", output.status.code().unwrap_or(-1))
}
