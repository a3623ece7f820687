//! How many assignments may run at once.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Execution strategy, mapped to a concurrency budget by [`concurrency_budget`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStrategy {
    /// One assignment at a time.
    Sequential,
    /// Up to the configured maximum.
    Parallel,
    /// Half the configured maximum, never fewer than two.
    #[default]
    Hybrid,
}

impl ExecutionStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStrategy::Sequential => "sequential",
            ExecutionStrategy::Parallel => "parallel",
            ExecutionStrategy::Hybrid => "hybrid",
        }
    }
}

impl std::fmt::Display for ExecutionStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ExecutionStrategy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sequential" => Ok(ExecutionStrategy::Sequential),
            "parallel" => Ok(ExecutionStrategy::Parallel),
            "hybrid" => Ok(ExecutionStrategy::Hybrid),
            other => Err(Error::Validation(format!(
                "unknown execution strategy: {}",
                other
            ))),
        }
    }
}

/// Number of assignments allowed to be active at once.
///
/// `max_agents` of zero is treated as one so a parallel run can still make
/// progress.
pub fn concurrency_budget(strategy: ExecutionStrategy, max_agents: usize) -> usize {
    match strategy {
        ExecutionStrategy::Sequential => 1,
        ExecutionStrategy::Parallel => max_agents.max(1),
        ExecutionStrategy::Hybrid => (max_agents / 2).max(2),
    }
}
