//! Scheduler for dependency-ordered, concurrency-limited execution.
//!
//! The Scheduler admits assignments whose dependencies have all completed,
//! highest priority first, up to the concurrency budget of its strategy. Each
//! admitted assignment runs on its own tokio task; the loop wakes whenever one
//! finishes and re-evaluates what has become ready.
//!
//! A failed assignment blocks everything downstream of it. Blocked steps are
//! never executed and never produce a [`TaskResult`]; they are listed in
//! [`RunReport::blocked`] instead.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use futures::FutureExt;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinSet;

use super::executor::{ExecutionContext, TaskExecutor};
use super::strategy::{concurrency_budget, ExecutionStrategy};
use crate::core::{AgentKind, Assignment, AssignmentGraph, TaskResult};
use crate::error::{Error, Result};
use crate::{clog, clog_debug, clog_warn};

/// Events emitted by the scheduler for step lifecycle changes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchedulerEvent {
    /// A step was admitted and handed to the executor.
    TaskStarted {
        step_id: String,
        agent_type: AgentKind,
    },
    /// A step finished successfully.
    TaskCompleted { step_id: String },
    /// A step finished with an error, including executor errors and panics.
    TaskFailed { step_id: String, error: String },
    /// A step will never run because a dependency failed or was blocked.
    TaskBlocked { step_id: String, blocked_by: String },
    /// Every step reached a terminal state.
    AllTasksComplete,
}

/// Lifecycle of one step within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepState {
    Pending,
    Active,
    Completed,
    Failed,
    Blocked,
}

impl StepState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            StepState::Completed | StepState::Failed | StepState::Blocked
        )
    }
}

/// Everything a run produced.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    /// One result per executed step, in completion order.
    pub results: Vec<TaskResult>,
    /// Steps that never ran because a dependency failed.
    pub blocked: Vec<String>,
}

impl RunReport {
    pub fn succeeded(&self) -> Vec<&TaskResult> {
        self.results.iter().filter(|r| r.success).collect()
    }

    /// Step id and error message of every failed step.
    pub fn failed(&self) -> Vec<(&str, &str)> {
        self.results
            .iter()
            .filter(|r| !r.success)
            .map(|r| (r.step_id.as_str(), r.error.as_deref().unwrap_or_default()))
            .collect()
    }

    pub fn is_success(&self) -> bool {
        self.blocked.is_empty() && self.results.iter().all(|r| r.success)
    }

    pub fn result_for(&self, step_id: &str) -> Option<&TaskResult> {
        self.results.iter().find(|r| r.step_id == step_id)
    }

    /// Final state of `step_id`; `Pending` for steps this run never saw.
    pub fn state_of(&self, step_id: &str) -> StepState {
        match self.result_for(step_id) {
            Some(r) if r.success => StepState::Completed,
            Some(_) => StepState::Failed,
            None if self.blocked.iter().any(|b| b == step_id) => StepState::Blocked,
            None => StepState::Pending,
        }
    }
}

/// Runs assignment sets through a [`TaskExecutor`].
pub struct Scheduler<E> {
    executor: Arc<E>,
    strategy: ExecutionStrategy,
    max_agents: usize,
    workdir: PathBuf,
    event_tx: Option<mpsc::Sender<SchedulerEvent>>,
}

impl<E: TaskExecutor> Scheduler<E> {
    pub fn new(executor: Arc<E>, strategy: ExecutionStrategy, max_agents: usize) -> Self {
        Self {
            executor,
            strategy,
            max_agents,
            workdir: PathBuf::from("."),
            event_tx: None,
        }
    }

    /// Working directory handed to the executor for every step.
    pub fn with_workdir(mut self, workdir: impl Into<PathBuf>) -> Self {
        self.workdir = workdir.into();
        self
    }

    /// Send lifecycle events to `tx`. The receiver must be drained while a
    /// run is in progress; a full channel stalls the scheduler.
    pub fn with_events(mut self, tx: mpsc::Sender<SchedulerEvent>) -> Self {
        self.event_tx = Some(tx);
        self
    }

    pub fn executor(&self) -> &Arc<E> {
        &self.executor
    }

    pub fn strategy(&self) -> ExecutionStrategy {
        self.strategy
    }

    /// Maximum number of steps active at once.
    pub fn budget(&self) -> usize {
        concurrency_budget(self.strategy, self.max_agents)
    }

    async fn emit(&self, event: SchedulerEvent) {
        if let Some(tx) = &self.event_tx {
            let _ = tx.send(event).await;
        }
    }

    /// Run `assignments` under a fresh run id.
    pub async fn run(&self, assignments: &[Assignment]) -> Result<RunReport> {
        let run_id = uuid::Uuid::new_v4().to_string();
        self.run_with_id(&run_id, assignments).await
    }

    /// Run `assignments` to completion.
    ///
    /// Fails before executing anything when the set is malformed or cyclic,
    /// and fails mid-run only on a dependency deadlock. Per-step failures are
    /// recorded in the report.
    pub async fn run_with_id(&self, run_id: &str, assignments: &[Assignment]) -> Result<RunReport> {
        let graph = AssignmentGraph::build(assignments)?;
        graph.ensure_acyclic()?;

        let budget = self.budget();
        let position: HashMap<&str, usize> = assignments
            .iter()
            .enumerate()
            .map(|(i, a)| (a.step_id.as_str(), i))
            .collect();
        let mut states = vec![StepState::Pending; assignments.len()];
        let mut report = RunReport::default();
        let mut active: JoinSet<(usize, TaskResult)> = JoinSet::new();

        clog!(
            "Run {}: {} step(s), strategy {}, budget {}",
            run_id,
            assignments.len(),
            self.strategy,
            budget
        );

        loop {
            // Block everything downstream of a failure, transitively.
            let mut changed = true;
            while changed {
                changed = false;
                for (i, assignment) in assignments.iter().enumerate() {
                    if states[i] != StepState::Pending {
                        continue;
                    }
                    let blocker = assignment.depends_on.iter().find(|dep| {
                        matches!(
                            states[position[dep.as_str()]],
                            StepState::Failed | StepState::Blocked
                        )
                    });
                    if let Some(blocker) = blocker {
                        clog_debug!("Step {} blocked by {}", assignment.step_id, blocker);
                        states[i] = StepState::Blocked;
                        report.blocked.push(assignment.step_id.clone());
                        self.emit(SchedulerEvent::TaskBlocked {
                            step_id: assignment.step_id.clone(),
                            blocked_by: blocker.clone(),
                        })
                        .await;
                        changed = true;
                    }
                }
            }

            let mut ready: Vec<usize> = (0..assignments.len())
                .filter(|&i| {
                    states[i] == StepState::Pending
                        && assignments[i]
                            .depends_on
                            .iter()
                            .all(|dep| states[position[dep.as_str()]] == StepState::Completed)
                })
                .collect();
            ready.sort_by(|&a, &b| {
                assignments[b]
                    .priority
                    .cmp(&assignments[a].priority)
                    .then(a.cmp(&b))
            });

            let free = budget.saturating_sub(active.len());
            for i in ready.into_iter().take(free) {
                let assignment = assignments[i].clone();
                clog_debug!(
                    "Admitting {} (priority {}, {} active)",
                    assignment.step_id,
                    assignment.priority,
                    active.len() + 1
                );
                states[i] = StepState::Active;
                self.emit(SchedulerEvent::TaskStarted {
                    step_id: assignment.step_id.clone(),
                    agent_type: assignment.agent_type,
                })
                .await;

                let executor = Arc::clone(&self.executor);
                let ctx = ExecutionContext::new(run_id, self.workdir.clone());
                active.spawn(async move { (i, execute_one(executor, assignment, ctx).await) });
            }

            if active.is_empty() {
                let pending: Vec<String> = assignments
                    .iter()
                    .zip(&states)
                    .filter(|(_, state)| !state.is_terminal())
                    .map(|(a, _)| a.step_id.clone())
                    .collect();
                if pending.is_empty() {
                    break;
                }
                clog_warn!("Run {} deadlocked with pending {:?}", run_id, pending);
                return Err(Error::DependencyDeadlock { pending });
            }

            let (i, result) = match active.join_next().await {
                Some(Ok(done)) => done,
                Some(Err(e)) => return Err(Error::TaskJoin(e.to_string())),
                None => continue,
            };

            if result.success {
                states[i] = StepState::Completed;
                clog!("Step {} completed in {:?}", result.step_id, result.duration);
                self.emit(SchedulerEvent::TaskCompleted {
                    step_id: result.step_id.clone(),
                })
                .await;
            } else {
                states[i] = StepState::Failed;
                let error = result.error.clone().unwrap_or_default();
                clog_warn!("Step {} failed: {}", result.step_id, error);
                self.emit(SchedulerEvent::TaskFailed {
                    step_id: result.step_id.clone(),
                    error,
                })
                .await;
            }
            report.results.push(result);
        }

        clog!(
            "Run {} finished: {} succeeded, {} failed, {} blocked",
            run_id,
            report.succeeded().len(),
            report.failed().len(),
            report.blocked.len()
        );
        self.emit(SchedulerEvent::AllTasksComplete).await;
        Ok(report)
    }
}

/// Execute one step, turning errors and panics into a failed result.
async fn execute_one<E: TaskExecutor>(
    executor: Arc<E>,
    assignment: Assignment,
    ctx: ExecutionContext,
) -> TaskResult {
    let started = Instant::now();
    let outcome = AssertUnwindSafe(executor.execute(&assignment, &ctx))
        .catch_unwind()
        .await;
    let elapsed = started.elapsed();

    match outcome {
        Ok(Ok(outcome)) => {
            TaskResult::from_outcome(&assignment.step_id, assignment.agent_type, outcome, elapsed)
        }
        Ok(Err(e)) => {
            TaskResult::failed(&assignment.step_id, assignment.agent_type, e.to_string(), elapsed)
        }
        Err(panic) => {
            let message = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            TaskResult::failed(
                &assignment.step_id,
                assignment.agent_type,
                format!("executor panicked: {}", message),
                elapsed,
            )
        }
    }
}
