//! Core domain models for conclave runs.
//!
//! Assignments, the results they produce, and the dependency graph that
//! orders them.

pub mod assignment;
pub mod graph;
pub mod result;

pub use assignment::{AgentKind, Assignment};
pub use graph::{detect_cycles, topological_sort, AssignmentGraph};
pub use result::{ScoringMetrics, TaskOutcome, TaskResult};
