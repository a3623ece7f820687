//! Integration tests for conclave.
//!
//! Workspaces run against throwaway git repositories; agents are replaced by
//! a scripted executor, so nothing here needs an agent CLI installed.
//!
//! - `workspace_lifecycle`: create, commit, merge and remove workspaces
//! - `optimistic_writes`: hash-verified writes and stale preimages
//! - `scheduling`: concurrency budgets, dependency order, failure propagation
//! - `consensus_voting`: scoring and every consensus strategy
//! - `pipeline_e2e`: full runs with events and winner merging

mod fixtures;

mod consensus_voting;
mod optimistic_writes;
mod scheduling;
