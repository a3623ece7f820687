//! Content hashing for optimistic writes.

use std::io::ErrorKind;
use std::path::Path;

use sha2::{Digest, Sha256};

use crate::error::{Error, Result};

/// SHA-256 of the empty string. Stands in for the hash of a file that does
/// not exist yet.
pub const EMPTY_HASH: &str = "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";

/// Lowercase hex SHA-256 of `content`.
pub fn hash_content(content: impl AsRef<[u8]>) -> String {
    hex::encode(Sha256::digest(content.as_ref()))
}

/// Hash of the file's current bytes, or [`EMPTY_HASH`] when it is missing.
pub async fn hash_file(path: &Path) -> Result<String> {
    match tokio::fs::read(path).await {
        Ok(bytes) => Ok(hash_content(bytes)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(EMPTY_HASH.to_string()),
        Err(e) => Err(Error::Read {
            path: path.to_path_buf(),
            message: e.to_string(),
        }),
    }
}
