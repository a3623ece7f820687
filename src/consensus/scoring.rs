//! Scalar scoring of result metrics plus small helpers for ranking scores.

use serde::{Deserialize, Serialize};

use crate::core::result::{clamp, ScoringMetrics};

/// Relative importance of each metric. Weights are normalized before use,
/// so they need not sum to exactly one.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringWeights {
    pub tests: f64,
    pub linting: f64,
    pub performance: f64,
    pub risk: f64,
    pub readability: f64,
    pub security: f64,
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self {
            tests: 0.30,
            linting: 0.15,
            performance: 0.20,
            risk: 0.15,
            readability: 0.10,
            security: 0.10,
        }
    }
}

impl ScoringWeights {
    fn as_array(&self) -> [f64; 6] {
        [
            self.tests,
            self.linting,
            self.performance,
            self.risk,
            self.readability,
            self.security,
        ]
    }

    /// Weights scaled to sum to one. Negative or non-finite weights count as
    /// zero; if nothing positive remains the default set is used.
    pub fn normalized(&self) -> Self {
        let w = self.as_array().map(|v| if v.is_finite() && v > 0.0 { v } else { 0.0 });
        let total: f64 = w.iter().sum();
        if total <= 0.0 || !total.is_finite() {
            return Self::default();
        }
        Self {
            tests: w[0] / total,
            linting: w[1] / total,
            performance: w[2] / total,
            risk: w[3] / total,
            readability: w[4] / total,
            security: w[5] / total,
        }
    }
}

/// Weighted score of `metrics` in [0, 1]. Risk counts against the score.
pub fn score(metrics: &ScoringMetrics, weights: &ScoringWeights) -> f64 {
    let m = metrics.clamped();
    let w = weights.normalized();
    let raw = m.test_success_rate * w.tests + m.lint_pass_rate * w.linting
        + m.performance_delta * w.performance
        - m.change_risk * w.risk
        + m.readability * w.readability
        + m.security * w.security;
    clamp(raw, 0.0, 1.0)
}

/// Index of the highest score; the earliest wins ties.
pub fn best_index(scores: &[f64]) -> Option<usize> {
    let mut best: Option<usize> = None;
    for (i, &s) in scores.iter().enumerate() {
        if s.is_nan() {
            continue;
        }
        if best.map_or(true, |b| s > scores[b]) {
            best = Some(i);
        }
    }
    best
}

/// Indices ordered by descending score; equal scores keep input order and NaN
/// sorts last.
pub fn rank(scores: &[f64]) -> Vec<usize> {
    let mut order: Vec<usize> = (0..scores.len()).collect();
    order.sort_by(|&a, &b| {
        let (x, y) = (scores[a], scores[b]);
        match (x.is_nan(), y.is_nan()) {
            (true, true) => std::cmp::Ordering::Equal,
            (true, false) => std::cmp::Ordering::Greater,
            (false, true) => std::cmp::Ordering::Less,
            (false, false) => y.partial_cmp(&x).unwrap_or(std::cmp::Ordering::Equal),
        }
    });
    order
}

/// Summary statistics over a list of scores.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoreStats {
    pub mean: f64,
    pub median: f64,
    pub min: f64,
    pub max: f64,
    /// Population standard deviation.
    pub std_dev: f64,
}

impl ScoreStats {
    /// `None` for an empty list.
    pub fn compute(scores: &[f64]) -> Option<Self> {
        if scores.is_empty() {
            return None;
        }
        let n = scores.len() as f64;
        let mean = scores.iter().sum::<f64>() / n;
        let variance = scores.iter().map(|s| (s - mean).powi(2)).sum::<f64>() / n;

        let mut sorted = scores.to_vec();
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        let mid = sorted.len() / 2;
        let median = if sorted.len() % 2 == 0 {
            (sorted[mid - 1] + sorted[mid]) / 2.0
        } else {
            sorted[mid]
        };

        Some(Self {
            mean,
            median,
            min: sorted[0],
            max: sorted[sorted.len() - 1],
            std_dev: variance.sqrt(),
        })
    }
}
