//! One orchestration run: schedule, execute, pick a winner.

use serde::{Deserialize, Serialize};
use serde_json::json;

use super::executor::TaskExecutor;
use super::scheduler::{RunReport, Scheduler};
use crate::consensus::{AgentVote, ConsensusEngine, ConsensusResult, ConsensusStrategy};
use crate::core::{Assignment, AssignmentGraph, TaskResult};
use crate::error::Result;
use crate::events::{EventDispatcher, EventKind};
use crate::{clog, clog_warn};

/// Input of one run, as read from a plan file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OrchestrationRequest {
    pub assignments: Vec<Assignment>,
    #[serde(default)]
    pub consensus: ConsensusStrategy,
    #[serde(default)]
    pub votes: Vec<AgentVote>,
}

/// Output of one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrchestrationReport {
    pub run_id: String,
    pub run: RunReport,
    /// `None` when nothing succeeded or consensus failed.
    pub consensus: Option<ConsensusResult>,
    /// Why consensus could not pick a winner, if it ran and failed.
    pub consensus_error: Option<String>,
}

impl OrchestrationReport {
    pub fn selected(&self) -> Option<&str> {
        self.consensus.as_ref().map(|c| c.selected.as_str())
    }

    pub fn selected_result(&self) -> Option<&TaskResult> {
        self.selected().and_then(|id| self.run.result_for(id))
    }
}

/// Drives a [`Scheduler`] and resolves its results through a
/// [`ConsensusEngine`], announcing milestones on an optional dispatcher.
pub struct Orchestrator<E> {
    scheduler: Scheduler<E>,
    engine: ConsensusEngine,
    events: Option<EventDispatcher>,
}

impl<E: TaskExecutor> Orchestrator<E> {
    pub fn new(scheduler: Scheduler<E>, engine: ConsensusEngine) -> Self {
        Self {
            scheduler,
            engine,
            events: None,
        }
    }

    pub fn with_events(mut self, events: EventDispatcher) -> Self {
        self.events = Some(events);
        self
    }

    pub fn scheduler(&self) -> &Scheduler<E> {
        &self.scheduler
    }

    pub fn engine(&self) -> &ConsensusEngine {
        &self.engine
    }

    fn emit(&self, kind: EventKind, data: serde_json::Value) {
        if let Some(events) = &self.events {
            events.emit(kind, data);
        }
    }

    /// Execute the request's assignments and pick a winner among the ones
    /// that succeeded.
    ///
    /// Malformed or cyclic assignment sets and dependency deadlocks fail the
    /// whole run. Step failures and consensus failures are reported, not
    /// raised.
    pub async fn run(&self, request: &OrchestrationRequest) -> Result<OrchestrationReport> {
        AssignmentGraph::build(&request.assignments)?.ensure_acyclic()?;

        let run_id = uuid::Uuid::new_v4().to_string();
        self.emit(
            EventKind::OrchestrationStarted,
            json!({
                "run_id": run_id,
                "steps": request.assignments.len(),
                "strategy": self.scheduler.strategy(),
                "consensus": request.consensus,
            }),
        );

        let run = self
            .scheduler
            .run_with_id(&run_id, &request.assignments)
            .await?;

        for result in &run.results {
            self.emit(
                EventKind::TaskCompleted,
                json!({
                    "run_id": run_id,
                    "step_id": result.step_id,
                    "agent_type": result.agent_type,
                    "success": result.success,
                    "error": result.error,
                    "duration_ms": result.duration.as_millis() as u64,
                }),
            );
        }

        let successful: Vec<TaskResult> = run.succeeded().into_iter().cloned().collect();
        let (consensus, consensus_error) = if successful.is_empty() {
            clog_warn!("Run {}: no successful results, skipping consensus", run_id);
            (None, None)
        } else {
            match self
                .engine
                .reach_from_results(request.consensus, &successful, &request.votes)
            {
                Ok(decision) => {
                    self.emit(
                        EventKind::ConsensusReached,
                        json!({
                            "run_id": run_id,
                            "selected": decision.selected,
                            "strategy": decision.strategy,
                            "final_score": decision.final_score,
                        }),
                    );
                    (Some(decision), None)
                }
                Err(e) => {
                    clog_warn!("Run {}: consensus failed: {}", run_id, e);
                    (None, Some(e.to_string()))
                }
            }
        };

        let report = OrchestrationReport {
            run_id,
            run,
            consensus,
            consensus_error,
        };
        clog!(
            "Run {} complete, selected {}",
            report.run_id,
            report.selected().unwrap_or("nothing")
        );
        self.emit(
            EventKind::OrchestrationCompleted,
            json!({
                "run_id": report.run_id,
                "succeeded": report.run.succeeded().len(),
                "failed": report.run.failed().len(),
                "blocked": report.run.blocked,
                "selected": report.selected(),
            }),
        );
        Ok(report)
    }
}
