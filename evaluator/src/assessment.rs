//! Risk assessment types
//!
//! A [`RiskAssessment`] is built fresh on every evaluation and is never
//! persisted by the evaluator. Its level is a pure, monotonic function of its
//! score over the configured breakpoints.

use serde::{Deserialize, Serialize};

use crate::config::LevelBreakpoints;

/// Discrete risk level
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    /// Map a score onto a level. Scores are compared against lower bounds,
    /// so a score exactly on a breakpoint belongs to the higher level.
    pub fn from_score(score: f64, breakpoints: &LevelBreakpoints) -> Self {
        if score >= breakpoints.critical {
            Self::Critical
        } else if score >= breakpoints.high {
            Self::High
        } else if score >= breakpoints.medium {
            Self::Medium
        } else {
            Self::Low
        }
    }
}

impl std::fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Low => write!(f, "LOW"),
            Self::Medium => write!(f, "MEDIUM"),
            Self::High => write!(f, "HIGH"),
            Self::Critical => write!(f, "CRITICAL"),
        }
    }
}

/// Which sub-score a factor belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalKind {
    Movement,
    Environmental,
    Temporal,
}

impl std::fmt::Display for SignalKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Movement => write!(f, "movement"),
            Self::Environmental => write!(f, "environmental"),
            Self::Temporal => write!(f, "temporal"),
        }
    }
}

/// A contributing factor, tagged e.g. `in-restricted-zone` or `night-hours`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskFactor {
    pub kind: SignalKind,
    pub tag: String,
    /// Contribution of this factor to its sub-score
    pub weight: f64,
}

impl RiskFactor {
    pub fn new(kind: SignalKind, tag: impl Into<String>, weight: f64) -> Self {
        Self {
            kind,
            tag: tag.into(),
            weight,
        }
    }
}

/// One sub-score in [0, 1]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubScore {
    pub value: f64,
    pub factors: Vec<RiskFactor>,
}

impl SubScore {
    pub fn zero() -> Self {
        Self {
            value: 0.0,
            factors: Vec::new(),
        }
    }
}

/// The three sub-scores; `None` marks a sub-score whose inputs were missing
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SubScores {
    pub movement: Option<SubScore>,
    pub environmental: Option<SubScore>,
    pub temporal: Option<SubScore>,
}

impl SubScores {
    /// Number of sub-scores computed from present inputs
    pub fn available(&self) -> usize {
        [
            self.movement.is_some(),
            self.environmental.is_some(),
            self.temporal.is_some(),
        ]
        .iter()
        .filter(|present| **present)
        .count()
    }

    /// Fraction of sub-scores with valid inputs
    pub fn confidence(&self) -> f64 {
        self.available() as f64 / 3.0
    }
}

/// Result of scoring one snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskAssessment {
    /// Composite score in [0, 1]
    pub score: f64,
    pub level: RiskLevel,
    /// Fraction of sub-scores with valid inputs, in [0, 1]
    pub confidence: f64,
    pub sub_scores: SubScores,
    pub factors: Vec<RiskFactor>,
}

impl RiskAssessment {
    /// Factor tags in evaluation order
    pub fn tags(&self) -> Vec<&str> {
        self.factors.iter().map(|f| f.tag.as_str()).collect()
    }

    pub fn has_factor(&self, tag: &str) -> bool {
        self.factors.iter().any(|f| f.tag == tag)
    }

    /// Compact summary for logging
    pub fn summary(&self) -> String {
        format!(
            "score={:.2} level={} confidence={:.2} factors=[{}]",
            self.score,
            self.level,
            self.confidence,
            self.tags().join(",")
        )
    }
}
