//! Picks one winner among competing results.
//!
//! Four interchangeable strategies share the same inputs (scored candidates
//! and agent votes) and all produce a [`ConsensusResult`] with a decision log
//! describing how the winner was chosen.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::scoring::{best_index, score, ScoringWeights};
use crate::core::result::{clamp, ScoringMetrics, TaskResult};
use crate::error::{Error, Result};
use crate::clog;

/// Rule used to select the winning candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsensusStrategy {
    /// Highest weighted metric score; earliest candidate wins ties.
    #[default]
    HighestScore,
    /// Most votes; the id tallied first wins ties.
    MajorityVote,
    /// Largest summed vote confidence.
    WeightedVote,
    /// Every vote must name the same candidate.
    Unanimous,
}

impl ConsensusStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConsensusStrategy::HighestScore => "highest_score",
            ConsensusStrategy::MajorityVote => "majority_vote",
            ConsensusStrategy::WeightedVote => "weighted_vote",
            ConsensusStrategy::Unanimous => "unanimous",
        }
    }

    pub fn uses_votes(&self) -> bool {
        !matches!(self, ConsensusStrategy::HighestScore)
    }
}

impl std::fmt::Display for ConsensusStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ConsensusStrategy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "highest_score" => Ok(ConsensusStrategy::HighestScore),
            "majority_vote" => Ok(ConsensusStrategy::MajorityVote),
            "weighted_vote" => Ok(ConsensusStrategy::WeightedVote),
            "unanimous" => Ok(ConsensusStrategy::Unanimous),
            other => Err(Error::UnknownStrategy(other.to_string())),
        }
    }
}

/// One agent's preference among the candidates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentVote {
    pub agent: String,
    /// Candidate id the agent wants to win.
    pub preferred: String,
    /// In [0, 1]; values outside are clamped when weighted.
    pub confidence: f64,
    /// Free text kept for the audit trail only.
    #[serde(default)]
    pub reasoning: String,
}

impl AgentVote {
    pub fn new(agent: &str, preferred: &str, confidence: f64) -> Self {
        Self {
            agent: agent.to_string(),
            preferred: preferred.to_string(),
            confidence,
            reasoning: String::new(),
        }
    }

    pub fn with_reasoning(mut self, reasoning: &str) -> Self {
        self.reasoning = reasoning.to_string();
        self
    }
}

/// A competing result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub id: String,
    /// Agent that produced it.
    pub agent: String,
    pub metrics: ScoringMetrics,
}

impl Candidate {
    pub fn new(id: &str, agent: &str, metrics: ScoringMetrics) -> Self {
        Self {
            id: id.to_string(),
            agent: agent.to_string(),
            metrics,
        }
    }

    /// A task result competes under its step id.
    pub fn from_result(result: &TaskResult) -> Self {
        Self {
            id: result.step_id.clone(),
            agent: result.agent_type.to_string(),
            metrics: result.metrics,
        }
    }
}

/// Audit record of one decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionLog {
    pub timestamp: DateTime<Utc>,
    pub participants: Vec<String>,
    pub rounds: u32,
    /// Short description of the rule that decided.
    pub rule: String,
}

/// The winning candidate and how it was chosen.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsensusResult {
    pub selected: String,
    pub strategy: ConsensusStrategy,
    /// Metric score of the selected candidate.
    pub final_score: f64,
    pub votes: Vec<AgentVote>,
    pub decision_log: DecisionLog,
}

/// Scores candidates and applies a consensus strategy.
#[derive(Debug, Clone, Default)]
pub struct ConsensusEngine {
    weights: ScoringWeights,
}

impl ConsensusEngine {
    pub fn new(weights: ScoringWeights) -> Self {
        Self { weights }
    }

    pub fn weights(&self) -> &ScoringWeights {
        &self.weights
    }

    pub fn score(&self, candidate: &Candidate) -> f64 {
        score(&candidate.metrics, &self.weights)
    }

    pub fn scores(&self, candidates: &[Candidate]) -> Vec<f64> {
        candidates.iter().map(|c| self.score(c)).collect()
    }

    /// Select a winner among `candidates` using `strategy`.
    ///
    /// Fails with `NoCandidates` for an empty candidate list, `NoVotes` when
    /// a vote-based strategy gets no votes, `ConsensusNotReached` when a
    /// unanimous vote is split, and `UnknownCandidate` when the votes elect
    /// an id that is not among the candidates.
    pub fn reach(
        &self,
        strategy: ConsensusStrategy,
        candidates: &[Candidate],
        votes: &[AgentVote],
    ) -> Result<ConsensusResult> {
        if candidates.is_empty() {
            return Err(Error::NoCandidates);
        }
        if strategy.uses_votes() && votes.is_empty() {
            return Err(Error::NoVotes);
        }
        let scores = self.scores(candidates);

        let (index, rule) = match strategy {
            ConsensusStrategy::HighestScore => {
                let index = best_index(&scores).unwrap_or(0);
                let rule = format!(
                    "highest score {:.3} among {} candidates",
                    scores[index],
                    candidates.len()
                );
                (index, rule)
            }
            ConsensusStrategy::MajorityVote => {
                let (winner, count) = leader(&tally(votes, |_| 1.0));
                let rule = format!("majority: {} of {} votes", count, votes.len());
                (candidate_index(candidates, winner)?, rule)
            }
            ConsensusStrategy::WeightedVote => {
                let totals = tally(votes, |v| clamp(v.confidence, 0.0, 1.0));
                let (winner, weight) = leader(&totals);
                let total: f64 = totals.iter().map(|(_, w)| w).sum();
                let rule = format!("weighted: {:.2} of {:.2} total confidence", weight, total);
                (candidate_index(candidates, winner)?, rule)
            }
            ConsensusStrategy::Unanimous => {
                let first = votes[0].preferred.as_str();
                if votes.iter().any(|v| v.preferred != first) {
                    let split: Vec<&str> =
                        tally(votes, |_| 1.0).into_iter().map(|(id, _)| id).collect();
                    return Err(Error::ConsensusNotReached(format!(
                        "unanimous vote split across {}",
                        split.join(", ")
                    )));
                }
                let rule = format!("unanimous: all {} votes", votes.len());
                (candidate_index(candidates, first)?, rule)
            }
        };

        let participants = if strategy.uses_votes() {
            distinct(votes.iter().map(|v| v.agent.as_str()))
        } else {
            distinct(candidates.iter().map(|c| c.agent.as_str()))
        };

        let selected = candidates[index].id.clone();
        clog!(
            "Consensus ({}) selected {} with score {:.3}",
            strategy,
            selected,
            scores[index]
        );

        Ok(ConsensusResult {
            selected,
            strategy,
            final_score: scores[index],
            votes: votes.to_vec(),
            decision_log: DecisionLog {
                timestamp: Utc::now(),
                participants,
                rounds: 1,
                rule,
            },
        })
    }

    /// Convenience for results coming straight from a run: every result
    /// competes under its step id.
    pub fn reach_from_results(
        &self,
        strategy: ConsensusStrategy,
        results: &[TaskResult],
        votes: &[AgentVote],
    ) -> Result<ConsensusResult> {
        let candidates: Vec<Candidate> = results.iter().map(Candidate::from_result).collect();
        self.reach(strategy, &candidates, votes)
    }
}

/// Sum `weight` per preferred id, keeping ids in order of first appearance.
fn tally<F>(votes: &[AgentVote], weight: F) -> Vec<(&str, f64)>
where
    F: Fn(&AgentVote) -> f64,
{
    let mut totals: Vec<(&str, f64)> = Vec::new();
    for vote in votes {
        let w = weight(vote);
        match totals.iter_mut().find(|(id, _)| *id == vote.preferred) {
            Some(entry) => entry.1 += w,
            None => totals.push((vote.preferred.as_str(), w)),
        }
    }
    totals
}

/// Largest total; the earliest entry wins ties. `totals` must be non-empty.
fn leader<'a>(totals: &[(&'a str, f64)]) -> (&'a str, f64) {
    let mut best = totals[0];
    for &entry in &totals[1..] {
        if entry.1 > best.1 {
            best = entry;
        }
    }
    best
}

fn candidate_index(candidates: &[Candidate], id: &str) -> Result<usize> {
    candidates
        .iter()
        .position(|c| c.id == id)
        .ok_or_else(|| Error::UnknownCandidate(id.to_string()))
}

fn distinct<'a>(names: impl Iterator<Item = &'a str>) -> Vec<String> {
    let mut seen: Vec<String> = Vec::new();
    for name in names {
        if !seen.iter().any(|s| s == name) {
            seen.push(name.to_string());
        }
    }
    seen
}
