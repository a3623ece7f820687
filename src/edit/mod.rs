//! Optimistic, hash-verified file writes.

mod coordinator;
mod hash;

pub use coordinator::{EditRequest, EditResult, OptimisticWriter};
pub use hash::{hash_content, hash_file, EMPTY_HASH};
