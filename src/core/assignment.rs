//! Assignments: the schedulable units of work.
//!
//! An assignment names the kind of agent that should perform it, the steps it
//! waits for, and a priority used to order otherwise-ready work.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// The closed set of agent kinds the orchestrator can dispatch to.
///
/// Assignment files carry the kind as a lowercase tag. Unknown tags are
/// rejected when the assignment is parsed rather than silently ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentKind {
    Claude,
    Codex,
    Gemini,
}

impl AgentKind {
    pub const ALL: [AgentKind; 3] = [AgentKind::Claude, AgentKind::Codex, AgentKind::Gemini];

    pub fn as_str(&self) -> &'static str {
        match self {
            AgentKind::Claude => "claude",
            AgentKind::Codex => "codex",
            AgentKind::Gemini => "gemini",
        }
    }

    /// Command line used to invoke this kind of agent when the configuration
    /// does not override it. The task description is appended as the last
    /// argument.
    pub fn default_command(&self) -> &'static str {
        match self {
            AgentKind::Claude => "claude -p",
            AgentKind::Codex => "codex exec",
            AgentKind::Gemini => "gemini -p",
        }
    }
}

impl std::fmt::Display for AgentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for AgentKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let tag = s.trim().to_ascii_lowercase();
        AgentKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == tag)
            .ok_or_else(|| Error::UnknownAgentType(s.to_string()))
    }
}

/// One schedulable unit of work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Assignment {
    /// Identifier unique within one scheduling run.
    pub step_id: String,
    /// Which kind of agent performs the step.
    pub agent_type: AgentKind,
    /// What the agent is asked to do.
    pub description: String,
    /// Step ids that must complete before this one may start.
    #[serde(default)]
    pub depends_on: Vec<String>,
    /// Free-form grouping label.
    #[serde(default)]
    pub domain: String,
    /// Higher runs first among otherwise-ready steps.
    #[serde(default)]
    pub priority: i32,
}

impl Assignment {
    pub fn new(step_id: &str, agent_type: AgentKind, description: &str) -> Self {
        Self {
            step_id: step_id.to_string(),
            agent_type,
            description: description.to_string(),
            depends_on: Vec::new(),
            domain: String::new(),
            priority: 0,
        }
    }

    pub fn depends_on<I, S>(mut self, steps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.depends_on.extend(steps.into_iter().map(Into::into));
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_domain(mut self, domain: &str) -> Self {
        self.domain = domain.to_string();
        self
    }
}
