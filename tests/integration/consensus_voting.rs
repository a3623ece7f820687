//! Consensus strategies over scored candidates.

use conclave::consensus::{
    rank, score, AgentVote, Candidate, ConsensusEngine, ConsensusStrategy, ScoreStats,
    ScoringWeights,
};
use conclave::core::ScoringMetrics;
use conclave::Error;

use crate::fixtures::metrics;

fn candidates(qualities: &[(&str, f64)]) -> Vec<Candidate> {
    qualities
        .iter()
        .map(|(id, q)| Candidate::new(id, "claude", metrics(*q)))
        .collect()
}

fn votes(prefs: &[(&str, f64)]) -> Vec<AgentVote> {
    prefs
        .iter()
        .enumerate()
        .map(|(i, (id, confidence))| AgentVote::new(&format!("voter-{i}"), id, *confidence))
        .collect()
}

#[test]
fn test_highest_score_picks_best_quality() {
    let engine = ConsensusEngine::default();
    let pool = candidates(&[("A", 0.2), ("B", 0.9), ("C", 0.5)]);
    let scores = engine.scores(&pool);
    assert_eq!(rank(&scores), vec![1, 2, 0]);

    let result = engine
        .reach(ConsensusStrategy::HighestScore, &pool, &[])
        .unwrap();
    assert_eq!(result.selected, "B");
    assert!((result.final_score - scores[1]).abs() < 1e-12);
}

#[test]
fn test_vote_strategies() {
    let engine = ConsensusEngine::default();
    let pool = candidates(&[("A", 0.9), ("B", 0.1)]);

    let majority = engine
        .reach(
            ConsensusStrategy::MajorityVote,
            &pool,
            &votes(&[("A", 0.5), ("A", 0.5), ("B", 0.5)]),
        )
        .unwrap();
    assert_eq!(majority.selected, "A");

    let weighted = engine
        .reach(
            ConsensusStrategy::WeightedVote,
            &pool,
            &votes(&[("A", 0.9), ("B", 0.95)]),
        )
        .unwrap();
    assert_eq!(weighted.selected, "B");
    // The final score is the winner's metric score, even when votes chose it.
    assert!((weighted.final_score - engine.score(&pool[1])).abs() < 1e-12);

    let unanimous = engine
        .reach(
            ConsensusStrategy::Unanimous,
            &pool,
            &votes(&[("A", 0.1), ("A", 0.2), ("A", 0.3)]),
        )
        .unwrap();
    assert_eq!(unanimous.selected, "A");
    assert_eq!(unanimous.decision_log.participants.len(), 3);
}

#[test]
fn test_unanimous_split_never_falls_back() {
    let engine = ConsensusEngine::default();
    let pool = candidates(&[("A", 0.9), ("B", 0.1)]);
    let err = engine
        .reach(
            ConsensusStrategy::Unanimous,
            &pool,
            &votes(&[("A", 1.0), ("B", 1.0)]),
        )
        .unwrap_err();
    assert!(matches!(err, Error::ConsensusNotReached(_)));
    assert!(err.is_consensus_failure());
}

#[test]
fn test_strategy_names_round_trip_through_from_str() {
    for strategy in [
        ConsensusStrategy::HighestScore,
        ConsensusStrategy::MajorityVote,
        ConsensusStrategy::WeightedVote,
        ConsensusStrategy::Unanimous,
    ] {
        assert_eq!(strategy.to_string().parse::<ConsensusStrategy>().unwrap(), strategy);
    }
    let err = "random".parse::<ConsensusStrategy>().unwrap_err();
    assert!(!err.is_consensus_failure());
}

#[test]
fn test_out_of_range_metrics_are_clamped() {
    let wild = ScoringMetrics {
        test_success_rate: 1.5,
        lint_pass_rate: -4.0,
        performance_delta: 12.0,
        change_risk: -2.0,
        readability: 3.0,
        security: f64::INFINITY,
    };
    let s = score(&wild, &ScoringWeights::default());
    assert!((0.0..=1.0).contains(&s), "{s}");
}

#[test]
fn test_custom_weights_are_renormalized() {
    let doubled = ScoringWeights {
        tests: 0.6,
        linting: 0.3,
        performance: 0.4,
        risk: 0.3,
        readability: 0.2,
        security: 0.2,
    };
    let m = metrics(0.7);
    let a = score(&m, &doubled);
    let b = score(&m, &ScoringWeights::default());
    assert!((a - b).abs() < 1e-9);
}

#[test]
fn test_score_stats_over_candidates() {
    let engine = ConsensusEngine::default();
    let pool = candidates(&[("A", 0.0), ("B", 1.0)]);
    let stats = ScoreStats::compute(&engine.scores(&pool)).unwrap();
    assert_eq!(stats.min, 0.0);
    assert!(stats.max > stats.min);
    assert!((stats.mean - stats.median).abs() < 1e-12);
}
