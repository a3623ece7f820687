//! Task execution seam.
//!
//! The scheduler never performs work itself; it hands each admitted
//! assignment to a [`TaskExecutor`]. [`CommandExecutor`] runs the external
//! agent CLI for the assignment's kind, and [`WorkspaceExecutor`] wraps any
//! executor so every assignment runs in its own git worktree.

use std::collections::HashMap;
use std::future::Future;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::sync::Mutex;

use crate::core::{AgentKind, Assignment, TaskOutcome};
use crate::error::{Error, Result};
use crate::events::{EventDispatcher, EventKind};
use crate::util::command_message;
use crate::workspace::{MergeOutcome, Workspace, WorkspaceConfig, WorkspaceManager};
use crate::{clog, clog_debug, clog_warn};

/// Where and as part of which run an assignment executes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionContext {
    pub run_id: String,
    /// Working directory for the agent.
    pub workdir: PathBuf,
}

impl ExecutionContext {
    pub fn new(run_id: &str, workdir: impl Into<PathBuf>) -> Self {
        Self {
            run_id: run_id.to_string(),
            workdir: workdir.into(),
        }
    }
}

/// Performs one assignment.
///
/// An `Err` is recorded by the scheduler as a failed result for that step;
/// it never aborts the run.
pub trait TaskExecutor: Send + Sync + 'static {
    fn execute(
        &self,
        assignment: &Assignment,
        ctx: &ExecutionContext,
    ) -> impl Future<Output = Result<TaskOutcome>> + Send;
}

/// Runs the external agent CLI configured for each agent kind.
///
/// The assignment description is appended as the last argument and the
/// assignment itself is written to stdin as JSON. If the agent prints a
/// [`TaskOutcome`] JSON document it is used as-is; otherwise success follows
/// the exit status and stdout becomes the output.
#[derive(Debug, Clone)]
pub struct CommandExecutor {
    commands: HashMap<AgentKind, String>,
    timeout: Option<Duration>,
}

impl Default for CommandExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandExecutor {
    pub fn new() -> Self {
        let commands = AgentKind::ALL
            .into_iter()
            .map(|kind| (kind, kind.default_command().to_string()))
            .collect();
        Self {
            commands,
            timeout: None,
        }
    }

    /// Override the command line for one kind.
    pub fn with_command(mut self, kind: AgentKind, command: &str) -> Self {
        self.commands.insert(kind, command.to_string());
        self
    }

    pub fn with_commands(mut self, commands: &HashMap<AgentKind, String>) -> Self {
        for (kind, command) in commands {
            self.commands.insert(*kind, command.clone());
        }
        self
    }

    /// Kill the agent and fail the step when it runs longer than `timeout`.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn command_for(&self, kind: AgentKind) -> &str {
        self.commands
            .get(&kind)
            .map(String::as_str)
            .unwrap_or_else(|| kind.default_command())
    }

    async fn run(&self, assignment: &Assignment, ctx: &ExecutionContext) -> Result<TaskOutcome> {
        let command_line = self.command_for(assignment.agent_type);
        let mut parts = command_line.split_whitespace();
        let program = parts.next().ok_or_else(|| {
            Error::Validation(format!("empty command for {}", assignment.agent_type))
        })?;
        let binary =
            which::which(program).map_err(|_| Error::AgentBinaryNotFound(program.to_string()))?;

        clog_debug!(
            "Running {} for step {} in {}",
            command_line,
            assignment.step_id,
            ctx.workdir.display()
        );

        let mut child = Command::new(&binary)
            .args(parts)
            .arg(&assignment.description)
            .current_dir(&ctx.workdir)
            .env("CONCLAVE_RUN_ID", &ctx.run_id)
            .env("CONCLAVE_STEP_ID", &assignment.step_id)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        if let Some(mut stdin) = child.stdin.take() {
            let payload = serde_json::to_vec(assignment)?;
            // Agents that never read stdin close the pipe early.
            if let Err(e) = stdin.write_all(&payload).await {
                clog_debug!("Agent for {} did not take stdin: {}", assignment.step_id, e);
            }
        }

        let output = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, child.wait_with_output())
                .await
                .map_err(|_| Error::Timeout(limit))??,
            None => child.wait_with_output().await?,
        };

        Ok(parse_outcome(&output))
    }
}

impl TaskExecutor for CommandExecutor {
    fn execute(
        &self,
        assignment: &Assignment,
        ctx: &ExecutionContext,
    ) -> impl Future<Output = Result<TaskOutcome>> + Send {
        self.run(assignment, ctx)
    }
}

/// Interpret an agent's process output.
fn parse_outcome(output: &std::process::Output) -> TaskOutcome {
    let stdout = String::from_utf8_lossy(&output.stdout);
    let stdout = stdout.trim();

    if let Ok(outcome) = serde_json::from_str::<TaskOutcome>(stdout) {
        return outcome;
    }

    if output.status.success() {
        TaskOutcome {
            success: true,
            output: stdout.to_string(),
            ..Default::default()
        }
    } else {
        TaskOutcome {
            success: false,
            output: stdout.to_string(),
            error: Some(command_message(output)),
            ..Default::default()
        }
    }
}

/// Runs every assignment in a fresh workspace and commits what it leaves
/// behind.
///
/// The workspace of each step is kept so the caller can merge the chosen
/// result and clean up the rest once consensus is in.
pub struct WorkspaceExecutor<E> {
    inner: E,
    manager: Arc<WorkspaceManager>,
    prefix: String,
    workspaces: Mutex<HashMap<String, Workspace>>,
    events: Option<EventDispatcher>,
}

impl<E: TaskExecutor> WorkspaceExecutor<E> {
    pub fn new(inner: E, manager: Arc<WorkspaceManager>, prefix: &str) -> Self {
        Self {
            inner,
            manager,
            prefix: prefix.to_string(),
            workspaces: Mutex::new(HashMap::new()),
            events: None,
        }
    }

    /// Emit `commit_created` and `merge_completed` through `events`.
    pub fn with_events(mut self, events: EventDispatcher) -> Self {
        self.events = Some(events);
        self
    }

    pub fn manager(&self) -> &WorkspaceManager {
        &self.manager
    }

    pub async fn workspace_for(&self, step_id: &str) -> Option<Workspace> {
        self.workspaces.lock().await.get(step_id).cloned()
    }

    /// Hand over every remembered workspace, keyed by step id.
    pub async fn take_workspaces(&self) -> HashMap<String, Workspace> {
        std::mem::take(&mut *self.workspaces.lock().await)
    }

    /// Merge the workspace of `selected` into the main line, then remove
    /// every workspace this executor created. Returns `None` when `selected`
    /// has no workspace. Workspaces are removed even when the merge fails.
    pub async fn finalize(&self, selected: &str) -> Result<Option<MergeOutcome>> {
        let workspaces = self.take_workspaces().await;

        let merged = match workspaces.get(selected) {
            Some(workspace) => Some(self.merge_selected(selected, workspace).await),
            None => None,
        };

        for (step_id, workspace) in &workspaces {
            if let Err(e) = self.manager.remove(workspace).await {
                clog_warn!("Could not remove workspace for {}: {}", step_id, e);
            }
        }
        merged.transpose()
    }

    async fn merge_selected(&self, selected: &str, workspace: &Workspace) -> Result<MergeOutcome> {
        let outcome = self.manager.merge(workspace).await?;
        match &outcome {
            MergeOutcome::Merged { commit } => {
                let main = self.manager.main_branch();
                clog!("Merged {} into {} as {}", selected, main, commit);
                if let Some(events) = &self.events {
                    events.emit(
                        EventKind::MergeCompleted,
                        json!({
                            "step_id": selected,
                            "branch": workspace.branch,
                            "commit": commit,
                        }),
                    );
                }
            }
            MergeOutcome::Conflict { paths } => {
                clog_warn!("Merging {} conflicted on {} path(s)", selected, paths.len());
            }
        }
        Ok(outcome)
    }

    async fn run(&self, assignment: &Assignment, ctx: &ExecutionContext) -> Result<TaskOutcome> {
        let config = WorkspaceConfig::new(&self.prefix, &assignment.step_id);
        let workspace = self.manager.create(&config).await?;
        self.workspaces
            .lock()
            .await
            .insert(assignment.step_id.clone(), workspace.clone());

        let scoped = ExecutionContext {
            run_id: ctx.run_id.clone(),
            workdir: workspace.path.clone(),
        };
        let outcome = self.inner.execute(assignment, &scoped).await?;

        if outcome.success && self.manager.is_dirty(&workspace).await? {
            let message = format!("{}: {}", assignment.step_id, assignment.description);
            let commit = self.manager.commit(&workspace, &message).await?;
            if let Some(events) = &self.events {
                events.emit(
                    EventKind::CommitCreated,
                    json!({
                        "step_id": assignment.step_id,
                        "branch": workspace.branch,
                        "commit": commit,
                    }),
                );
            }
        }
        Ok(outcome)
    }
}

impl<E: TaskExecutor> TaskExecutor for WorkspaceExecutor<E> {
    fn execute(
        &self,
        assignment: &Assignment,
        ctx: &ExecutionContext,
    ) -> impl Future<Output = Result<TaskOutcome>> + Send {
        self.run(assignment, ctx)
    }
}

impl<E: TaskExecutor> TaskExecutor for Arc<E> {
    fn execute(
        &self,
        assignment: &Assignment,
        ctx: &ExecutionContext,
    ) -> impl Future<Output = Result<TaskOutcome>> + Send {
        self.as_ref().execute(assignment, ctx)
    }
}
