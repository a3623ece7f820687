use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use serde::Deserialize;

use conclave::config::Config;
use conclave::consensus::{AgentVote, ConsensusEngine, ConsensusStrategy};
use conclave::core::{topological_sort, Assignment};
use conclave::edit::hash_file;
use conclave::events::{EventDispatcher, OutboundEvent};
use conclave::orchestration::{
    CommandExecutor, ExecutionStrategy, OrchestrationReport, OrchestrationRequest, Orchestrator,
    Scheduler, TaskExecutor, WorkspaceExecutor,
};
use conclave::workspace::WorkspaceManager;
use conclave::{clog, clog_debug, clog_warn, Result};
use tokio::sync::mpsc;

/// Conclave - run competing agents in isolated workspaces and pick a winner
#[derive(Parser, Debug)]
#[command(name = "conclave")]
#[command(version, about, long_about = None)]
#[command(
    after_help = "ENVIRONMENT:\n    CONCLAVE_DEBUG=1     Enable debug logging (alternative to --debug)"
)]
pub struct Cli {
    /// Enable debug logging (writes to ~/.conclave/conclave.log)
    #[arg(short = 'd', long)]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Execute a plan file and print the report as JSON
    Run {
        /// Plan file: {"assignments": [...], "votes": [...], "consensus": "..."}
        plan: PathBuf,

        /// Run every assignment in its own git worktree
        #[arg(long)]
        isolate: bool,

        /// Merge the winning workspace into the main branch and remove the rest
        #[arg(long, requires = "isolate")]
        merge: bool,

        /// Override the configured execution strategy
        #[arg(long)]
        strategy: Option<ExecutionStrategy>,

        /// Print queued webhook events to stderr as JSON lines
        #[arg(long)]
        events: bool,
    },

    /// Validate a plan file and print its execution order
    Plan {
        plan: PathBuf,
    },

    /// List the worktrees of the current repository
    Worktrees,

    /// Print the content hash of a file
    Hash {
        file: PathBuf,
    },
}

/// Plan file as written by users; unset fields fall back to the config.
#[derive(Debug, Deserialize)]
struct PlanFile {
    assignments: Vec<Assignment>,
    #[serde(default)]
    consensus: Option<ConsensusStrategy>,
    #[serde(default)]
    votes: Vec<AgentVote>,
}

fn read_plan(path: &Path) -> Result<PlanFile> {
    let text = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&text)?)
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    conclave::log::init(cli.debug);

    match cli.command {
        Command::Run {
            plan,
            isolate,
            merge,
            strategy,
            events,
        } => run_plan(&plan, isolate, merge, strategy, events),
        Command::Plan { plan } => show_plan(&plan),
        Command::Worktrees => list_worktrees(),
        Command::Hash { file } => print_hash(&file),
    }
}

fn run_plan(
    path: &Path,
    isolate: bool,
    merge: bool,
    strategy: Option<ExecutionStrategy>,
    print_events: bool,
) -> Result<()> {
    clog!(
        "Run command: plan={}, isolate={}, merge={}",
        path.display(),
        isolate,
        merge
    );

    let config = Config::load()?;
    let plan = read_plan(path)?;
    let request = OrchestrationRequest {
        assignments: plan.assignments,
        consensus: plan.consensus.unwrap_or(config.consensus),
        votes: plan.votes,
    };
    let repo_path = std::env::current_dir()?;

    let mut executor = CommandExecutor::new().with_commands(&config.agent_commands()?);
    if let Some(timeout) = config.agent_timeout() {
        executor = executor.with_timeout(timeout);
    }

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async {
        let (dispatcher, rx) = EventDispatcher::new(config.webhooks.clone());
        let drain = tokio::spawn(drain_events(rx, print_events));

        let report = if isolate {
            let manager = WorkspaceManager::open(&repo_path, config.main_branch.clone()).await?;
            let isolated = Arc::new(
                WorkspaceExecutor::new(executor, Arc::new(manager), &config.worktree_prefix)
                    .with_events(dispatcher.clone()),
            );
            let report = orchestrate(
                Arc::clone(&isolated),
                &config,
                strategy,
                &repo_path,
                &request,
                dispatcher,
            )
            .await?;

            if merge {
                match report.selected() {
                    Some(selected) => {
                        if let Some(outcome) = isolated.finalize(selected).await? {
                            eprintln!("merge: {}", serde_json::to_string(&outcome)?);
                        }
                    }
                    None => clog_warn!("Nothing selected, leaving workspaces in place"),
                }
            } else {
                for (step, workspace) in isolated.take_workspaces().await {
                    clog!("Workspace for {} kept at {}", step, workspace.path.display());
                }
            }
            report
        } else {
            orchestrate(
                Arc::new(executor),
                &config,
                strategy,
                &repo_path,
                &request,
                dispatcher,
            )
            .await?
        };

        // Every dispatcher clone is gone once the run and merge finish.
        let _ = drain.await;
        println!("{}", serde_json::to_string_pretty(&report)?);
        Ok::<(), conclave::Error>(())
    })
}

async fn orchestrate<E: TaskExecutor>(
    executor: Arc<E>,
    config: &Config,
    strategy: Option<ExecutionStrategy>,
    workdir: &Path,
    request: &OrchestrationRequest,
    events: EventDispatcher,
) -> Result<OrchestrationReport> {
    let scheduler = Scheduler::new(
        executor,
        strategy.unwrap_or(config.strategy),
        config.max_parallel_agents,
    )
    .with_workdir(workdir);
    let orchestrator =
        Orchestrator::new(scheduler, ConsensusEngine::new(config.weights)).with_events(events);
    orchestrator.run(request).await
}

async fn drain_events(mut rx: mpsc::UnboundedReceiver<OutboundEvent>, print: bool) {
    while let Some(event) = rx.recv().await {
        clog_debug!("Queued {} for {}", event.envelope.event, event.url);
        if print {
            match serde_json::to_string(&serde_json::json!({
                "url": event.url,
                "envelope": event.envelope,
            })) {
                Ok(line) => eprintln!("{}", line),
                Err(e) => clog_warn!("Could not render event: {}", e),
            }
        }
    }
}

fn show_plan(path: &Path) -> Result<()> {
    let plan = read_plan(path)?;
    let order = topological_sort(&plan.assignments)?;
    for (n, step) in order.iter().enumerate() {
        if step.depends_on.is_empty() {
            println!("{:>3}. {} [{}]", n + 1, step.step_id, step.agent_type);
        } else {
            println!(
                "{:>3}. {} [{}] after {}",
                n + 1,
                step.step_id,
                step.agent_type,
                step.depends_on.join(", ")
            );
        }
    }
    Ok(())
}

fn list_worktrees() -> Result<()> {
    let repo_path = std::env::current_dir()?;
    let rt = tokio::runtime::Runtime::new()?;
    let worktrees = rt.block_on(async {
        let manager = WorkspaceManager::open(&repo_path, None).await?;
        manager.list_all().await
    })?;
    println!("{}", serde_json::to_string_pretty(&worktrees)?);
    Ok(())
}

fn print_hash(path: &Path) -> Result<()> {
    let rt = tokio::runtime::Runtime::new()?;
    let hash = rt.block_on(hash_file(path))?;
    println!("{}  {}", hash, path.display());
    Ok(())
}
