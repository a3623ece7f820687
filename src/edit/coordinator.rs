//! Hash-verified file writes.
//!
//! A writer states the hash it believes the file has (the preimage). The
//! write goes through only if the file still hashes to that value; otherwise
//! the file is left alone and the caller gets the actual hash back so it can
//! re-read, reconcile and retry. No locks are taken: writers to different
//! files never interact, and racing writers to the same file are told apart
//! by the hash check.

use std::path::{Component, Path, PathBuf};

use futures::future::join_all;
use serde::{Deserialize, Serialize};

use super::hash::{hash_content, hash_file};
use crate::error::{Error, Result};
use crate::{clog_debug, clog_warn};

/// One write into a tree rooted at `repo_root`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EditRequest {
    pub repo_root: PathBuf,
    /// Path relative to `repo_root`.
    pub path: PathBuf,
    /// Full new content of the file.
    pub content: String,
    /// Hash the caller expects the file to have. `None` writes unconditionally.
    #[serde(default)]
    pub preimage: Option<String>,
}

impl EditRequest {
    pub fn new(
        repo_root: impl Into<PathBuf>,
        path: impl Into<PathBuf>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            repo_root: repo_root.into(),
            path: path.into(),
            content: content.into(),
            preimage: None,
        }
    }

    pub fn with_preimage(mut self, hash: impl Into<String>) -> Self {
        self.preimage = Some(hash.into());
        self
    }
}

/// Outcome of an [`EditRequest`].
///
/// On success `hash` is the file's hash after the write; on a rejected write
/// it is the file's actual current hash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EditResult {
    pub success: bool,
    pub hash: String,
    pub error: Option<String>,
}

impl EditResult {
    fn written(hash: String) -> Self {
        Self {
            success: true,
            hash,
            error: None,
        }
    }

    fn rejected(actual: String, expected: &str) -> Self {
        let error = format!("preimage mismatch: expected {}, found {}", expected, actual);
        Self {
            success: false,
            hash: actual,
            error: Some(error),
        }
    }

    pub fn is_conflict(&self) -> bool {
        !self.success
    }
}

/// Performs optimistic writes. Stateless; share freely.
#[derive(Debug, Clone, Copy, Default)]
pub struct OptimisticWriter;

impl OptimisticWriter {
    pub fn new() -> Self {
        Self
    }

    /// Write one file. A preimage mismatch is an `Ok` result with
    /// `success == false`; only I/O failures are errors.
    pub async fn write(&self, request: &EditRequest) -> Result<EditResult> {
        let target = resolve(&request.repo_root, &request.path)?;
        let current = hash_file(&target).await?;

        if let Some(expected) = request.preimage.as_deref() {
            if !expected.eq_ignore_ascii_case(&current) {
                clog_debug!(
                    "Rejected write to {}: preimage {} != {}",
                    target.display(),
                    expected,
                    current
                );
                return Ok(EditResult::rejected(current, expected));
            }
        }

        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| Error::DirectoryCreation {
                    path: parent.to_path_buf(),
                    message: e.to_string(),
                })?;
        }

        tokio::fs::write(&target, request.content.as_bytes())
            .await
            .map_err(|e| Error::Write {
                path: target.clone(),
                message: e.to_string(),
            })?;

        let hash = hash_content(&request.content);
        clog_debug!("Wrote {} ({} -> {})", target.display(), current, hash);
        Ok(EditResult::written(hash))
    }

    /// Apply every request independently and concurrently. Results line up
    /// with the requests; one conflict or failure does not affect the others.
    pub async fn batch_write(&self, requests: &[EditRequest]) -> Vec<Result<EditResult>> {
        let results = join_all(requests.iter().map(|request| self.write(request))).await;
        let conflicts = results
            .iter()
            .filter(|r| matches!(r, Ok(result) if !result.success))
            .count();
        if conflicts > 0 {
            clog_warn!("{} of {} batched writes conflicted", conflicts, requests.len());
        }
        results
    }

    /// Current text and hash of a file; a missing file reads as empty
    /// content with [`super::EMPTY_HASH`]. Only text files can be read this
    /// way: content that is not UTF-8 fails with `Read`. Use
    /// [`Self::read_bytes`] for anything else.
    pub async fn read(&self, repo_root: &Path, path: &Path) -> Result<(String, String)> {
        let (bytes, hash) = self.read_bytes(repo_root, path).await?;
        let content = String::from_utf8(bytes).map_err(|e| Error::Read {
            path: repo_root.join(path),
            message: format!("not valid UTF-8: {}", e.utf8_error()),
        })?;
        Ok((content, hash))
    }

    /// Raw bytes and hash of a file. The hash is the one `write` compares
    /// preimages against.
    pub async fn read_bytes(&self, repo_root: &Path, path: &Path) -> Result<(Vec<u8>, String)> {
        let target = resolve(repo_root, path)?;
        match tokio::fs::read(&target).await {
            Ok(bytes) => {
                let hash = hash_content(&bytes);
                Ok((bytes, hash))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Ok((Vec::new(), super::EMPTY_HASH.to_string()))
            }
            Err(e) => Err(Error::Read {
                path: target,
                message: e.to_string(),
            }),
        }
    }
}

/// Join `path` onto `root`, refusing anything that could land outside it.
fn resolve(root: &Path, path: &Path) -> Result<PathBuf> {
    let escapes = path.components().any(|c| {
        matches!(
            c,
            Component::ParentDir | Component::RootDir | Component::Prefix(_)
        )
    });
    if escapes || path.as_os_str().is_empty() {
        return Err(Error::Validation(format!(
            "edit path must be relative and stay inside the root: {}",
            path.display()
        )));
    }
    Ok(root.join(path))
}
