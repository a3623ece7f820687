//! Selecting one result among several competing ones.

mod engine;
mod scoring;

pub use engine::{
    AgentVote, Candidate, ConsensusEngine, ConsensusResult, ConsensusStrategy, DecisionLog,
};
pub use scoring::{best_index, rank, score, ScoreStats, ScoringWeights};
