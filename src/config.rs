use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::consensus::{ConsensusStrategy, ScoringWeights};
use crate::core::AgentKind;
use crate::events::WebhookDestination;
use crate::orchestration::ExecutionStrategy;
use crate::{clog_debug, Error, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub max_parallel_agents: usize,
    pub strategy: ExecutionStrategy,
    pub consensus: ConsensusStrategy,
    pub worktree_prefix: String,
    /// Branch accepted work is merged into; detected when unset.
    pub main_branch: Option<String>,
    /// Per-step limit for external agents.
    pub agent_timeout_secs: Option<u64>,
    pub weights: ScoringWeights,
    /// Agent kind tag to command line.
    pub agents: BTreeMap<String, String>,
    pub webhooks: Vec<WebhookDestination>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_parallel_agents: 4,
            strategy: ExecutionStrategy::default(),
            consensus: ConsensusStrategy::default(),
            worktree_prefix: "agent".to_string(),
            main_branch: None,
            agent_timeout_secs: None,
            weights: ScoringWeights::default(),
            agents: AgentKind::ALL
                .into_iter()
                .map(|kind| (kind.to_string(), kind.default_command().to_string()))
                .collect(),
            webhooks: Vec::new(),
        }
    }
}

impl Config {
    pub fn conclave_dir() -> Result<PathBuf> {
        Ok(dirs::home_dir().ok_or(Error::NoHomeDir)?.join(".conclave"))
    }

    pub fn config_path() -> Result<PathBuf> {
        Ok(Self::conclave_dir()?.join("conclave.toml"))
    }

    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        clog_debug!("Config::load path={}", path.display());
        if !path.exists() {
            clog_debug!("Config file not found, using defaults");
            return Ok(Self::default());
        }
        let config: Self = toml::from_str(&fs::read_to_string(path)?)?;
        clog_debug!(
            "Config loaded: max_parallel_agents={}, strategy={}, consensus={}, webhooks={}",
            config.max_parallel_agents,
            config.strategy,
            config.consensus,
            config.webhooks.len()
        );
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        let dir = Self::conclave_dir()?;
        if !dir.exists() {
            clog_debug!("Creating conclave directory: {}", dir.display());
            fs::create_dir_all(&dir)?;
        }
        let path = Self::config_path()?;
        fs::write(&path, toml::to_string_pretty(self)?)?;
        clog_debug!("Config saved to {}", path.display());
        Ok(())
    }

    /// Command lines keyed by agent kind. Unknown kind tags are an error.
    pub fn agent_commands(&self) -> Result<HashMap<AgentKind, String>> {
        self.agents
            .iter()
            .map(|(tag, command)| Ok((tag.parse::<AgentKind>()?, command.clone())))
            .collect()
    }

    pub fn agent_timeout(&self) -> Option<Duration> {
        self.agent_timeout_secs.map(Duration::from_secs)
    }
}
