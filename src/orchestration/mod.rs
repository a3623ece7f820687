//! Orchestration layer: concurrency budgets, the task execution seam, the
//! dependency-aware scheduler, and the end-to-end run pipeline.

mod executor;
mod pipeline;
mod scheduler;
mod strategy;

pub use executor::{CommandExecutor, ExecutionContext, TaskExecutor, WorkspaceExecutor};
pub use pipeline::{OrchestrationReport, OrchestrationRequest, Orchestrator};
pub use scheduler::{RunReport, Scheduler, SchedulerEvent, StepState};
pub use strategy::{concurrency_budget, ExecutionStrategy};
