use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Git error: {0}")]
    Git(#[from] git2::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("No home directory")]
    NoHomeDir,

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Task join error: {0}")]
    TaskJoin(String),

    #[error("git {command} failed: {message}")]
    GitCommand { command: String, message: String },

    #[error("Workspace creation failed: {0}")]
    WorkspaceCreation(String),

    #[error("Workspace removal failed: {0}")]
    WorkspaceRemoval(String),

    #[error("Commit failed: {0}")]
    Commit(String),

    #[error("Merge failed: {0}")]
    Merge(String),

    #[error("Failed to create directory {path}: {message}")]
    DirectoryCreation { path: PathBuf, message: String },

    #[error("Failed to write {path}: {message}")]
    Write { path: PathBuf, message: String },

    #[error("Failed to read {path}: {message}")]
    Read { path: PathBuf, message: String },

    #[error("Unknown agent type: {0}")]
    UnknownAgentType(String),

    #[error("Dependency cycle detected: {0}")]
    CycleDetected(String),

    #[error("Dependency deadlock: no runnable steps among {pending:?}")]
    DependencyDeadlock { pending: Vec<String> },

    #[error("Agent binary not found: {0}")]
    AgentBinaryNotFound(String),

    #[error("Timeout after {0:?}")]
    Timeout(std::time::Duration),

    #[error("Unknown consensus strategy: {0}")]
    UnknownStrategy(String),

    #[error("Consensus not reached: {0}")]
    ConsensusNotReached(String),

    #[error("No candidates to choose from")]
    NoCandidates,

    #[error("No votes were cast")]
    NoVotes,

    #[error("Vote winner {0} is not a candidate")]
    UnknownCandidate(String),
}

impl Error {
    /// True for errors that mean consensus could not pick a winner, as opposed
    /// to a malformed request such as an unknown strategy.
    pub fn is_consensus_failure(&self) -> bool {
        matches!(
            self,
            Error::ConsensusNotReached(_)
                | Error::NoCandidates
                | Error::NoVotes
                | Error::UnknownCandidate(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;
