//! Evaluator configuration
//!
//! All thresholds, weights and windows are configuration. Defaults follow the
//! deployed tuning: equal sub-score weights, LOW/MEDIUM/HIGH/CRITICAL
//! breakpoints at 0.4/0.75/0.85, 0.7 minimum confidence, a 30 minute cooldown
//! and a 60 second confirmation window.
//!
//! Durations are stored as whole seconds so the config round-trips through
//! TOML and JSON without a custom format.

use chrono::{Duration, FixedOffset};
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Upper bound for any configured window (one year)
const MAX_WINDOW_SECS: u64 = 365 * 24 * 60 * 60;

/// Relative weight of each sub-score in the composite risk score
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SubScoreWeights {
    pub movement: f64,
    pub environmental: f64,
    pub temporal: f64,
}

impl Default for SubScoreWeights {
    fn default() -> Self {
        Self {
            movement: 1.0,
            environmental: 1.0,
            temporal: 1.0,
        }
    }
}

/// Lower bounds of the MEDIUM, HIGH and CRITICAL levels.
///
/// `high` doubles as the notify threshold and `critical` as the
/// auto-trigger threshold.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LevelBreakpoints {
    pub medium: f64,
    pub high: f64,
    pub critical: f64,
}

impl Default for LevelBreakpoints {
    fn default() -> Self {
        Self {
            medium: 0.4,
            high: 0.75,
            critical: 0.85,
        }
    }
}

/// Movement sub-score tuning
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MovementConfig {
    /// Speeds below this count as stopped when no explicit state is given
    pub stop_speed_mps: f64,
    /// Fastest speed a subject on foot plausibly reaches
    pub max_plausible_speed_mps: f64,
    /// Moving samples that must precede a stop for it to count as sudden
    pub sustained_moving_samples: usize,
    /// Continuous stationary time that counts as "no movement"
    pub no_movement_threshold_secs: u64,
    pub implausible_speed_score: f64,
    pub erratic_score: f64,
    pub sudden_stop_score: f64,
    pub no_movement_score: f64,
}

impl Default for MovementConfig {
    fn default() -> Self {
        Self {
            stop_speed_mps: 0.3,
            max_plausible_speed_mps: 12.0,
            sustained_moving_samples: 2,
            no_movement_threshold_secs: 30 * 60,
            implausible_speed_score: 0.8,
            erratic_score: 0.6,
            sudden_stop_score: 0.7,
            no_movement_score: 1.0,
        }
    }
}

impl MovementConfig {
    pub fn no_movement_threshold(&self) -> Duration {
        secs(self.no_movement_threshold_secs)
    }
}

/// Environmental sub-score tuning
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnvironmentConfig {
    pub restricted_zone_score: f64,
    pub night_score: f64,
    /// First local hour of the high-risk window (inclusive)
    pub night_start_hour: u32,
    /// Local hour at which the high-risk window ends (exclusive)
    pub night_end_hour: u32,
    /// Offset of the monitored region's local time from UTC
    pub utc_offset_minutes: i32,
}

impl Default for EnvironmentConfig {
    fn default() -> Self {
        Self {
            restricted_zone_score: 0.7,
            night_score: 0.4,
            night_start_hour: 22,
            night_end_hour: 5,
            utc_offset_minutes: 0,
        }
    }
}

impl EnvironmentConfig {
    /// Local time zone of the monitored region
    pub fn offset(&self) -> Option<FixedOffset> {
        self.utc_offset_minutes
            .checked_mul(60)
            .and_then(FixedOffset::east_opt)
    }

    /// Whether `hour` (0-23, local) falls in the high-risk window.
    ///
    /// The window wraps past midnight when `night_start_hour > night_end_hour`.
    /// Equal bounds mean the window is disabled.
    pub fn is_high_risk_hour(&self, hour: u32) -> bool {
        let (start, end) = (self.night_start_hour, self.night_end_hour);
        if start == end {
            false
        } else if start < end {
            hour >= start && hour < end
        } else {
            hour >= start || hour < end
        }
    }
}

/// Temporal sub-score tuning (time since last confirmed-safe check-in)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CheckInConfig {
    /// Elapsed time that still scores zero
    pub grace_secs: u64,
    /// Elapsed time at which the sub-score saturates at 1.0
    pub overdue_secs: u64,
}

impl Default for CheckInConfig {
    fn default() -> Self {
        Self {
            grace_secs: 60 * 60,
            overdue_secs: 4 * 60 * 60,
        }
    }
}

/// Configuration for the Escalation Evaluator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EvaluatorConfig {
    pub weights: SubScoreWeights,
    pub breakpoints: LevelBreakpoints,
    /// Below this confidence the evaluator never auto-triggers
    pub min_confidence: f64,
    /// Minimum interval between two auto-triggers for one subject
    pub cooldown_secs: u64,
    /// Time a subject has to cancel an auto-trigger
    pub confirmation_window_secs: u64,
    /// Snapshots older than this are rejected as stale
    pub staleness_bound_secs: u64,
    /// Snapshots further than this in the future are rejected as malformed
    pub max_clock_skew_secs: u64,
    /// Trigger records retained per subject
    pub trigger_history_limit: usize,
    pub movement: MovementConfig,
    pub environment: EnvironmentConfig,
    pub check_in: CheckInConfig,
}

impl Default for EvaluatorConfig {
    fn default() -> Self {
        Self {
            weights: SubScoreWeights::default(),
            breakpoints: LevelBreakpoints::default(),
            min_confidence: 0.7,
            cooldown_secs: 30 * 60,
            confirmation_window_secs: 60,
            staleness_bound_secs: 15 * 60,
            max_clock_skew_secs: 60,
            trigger_history_limit: 32,
            movement: MovementConfig::default(),
            environment: EnvironmentConfig::default(),
            check_in: CheckInConfig::default(),
        }
    }
}

impl EvaluatorConfig {
    pub fn cooldown(&self) -> Duration {
        secs(self.cooldown_secs)
    }

    pub fn confirmation_window(&self) -> Duration {
        secs(self.confirmation_window_secs)
    }

    pub fn staleness_bound(&self) -> Duration {
        secs(self.staleness_bound_secs)
    }

    pub fn max_clock_skew(&self) -> Duration {
        secs(self.max_clock_skew_secs)
    }

    /// Check internal consistency. Called by the evaluator constructor.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let w = &self.weights;
        for (field, value) in [
            ("weights.movement", w.movement),
            ("weights.environmental", w.environmental),
            ("weights.temporal", w.temporal),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(ConfigError::new(field, format!("must be >= 0, got {value}")));
            }
        }
        if w.movement + w.environmental + w.temporal <= 0.0 {
            return Err(ConfigError::new("weights", "at least one weight must be positive"));
        }

        let b = &self.breakpoints;
        let ordered = 0.0 <= b.medium && b.medium <= b.high && b.high <= b.critical && b.critical <= 1.0;
        if !ordered {
            return Err(ConfigError::new(
                "breakpoints",
                format!(
                    "must satisfy 0 <= medium <= high <= critical <= 1, got {}/{}/{}",
                    b.medium, b.high, b.critical
                ),
            ));
        }

        if !(0.0..=1.0).contains(&self.min_confidence) {
            return Err(ConfigError::new(
                "min_confidence",
                format!("must be within [0, 1], got {}", self.min_confidence),
            ));
        }
        for (field, value) in [
            ("cooldown_secs", self.cooldown_secs),
            ("confirmation_window_secs", self.confirmation_window_secs),
            ("staleness_bound_secs", self.staleness_bound_secs),
            ("max_clock_skew_secs", self.max_clock_skew_secs),
            ("movement.no_movement_threshold_secs", self.movement.no_movement_threshold_secs),
            ("check_in.overdue_secs", self.check_in.overdue_secs),
        ] {
            if value > MAX_WINDOW_SECS {
                return Err(ConfigError::new(field, format!("must be at most {MAX_WINDOW_SECS}s")));
            }
        }
        if self.trigger_history_limit == 0 {
            return Err(ConfigError::new("trigger_history_limit", "must be at least 1"));
        }

        let m = &self.movement;
        for (field, value) in [
            ("movement.stop_speed_mps", m.stop_speed_mps),
            ("movement.max_plausible_speed_mps", m.max_plausible_speed_mps),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(ConfigError::new(field, format!("must be >= 0, got {value}")));
            }
        }
        if m.stop_speed_mps >= m.max_plausible_speed_mps {
            return Err(ConfigError::new(
                "movement.stop_speed_mps",
                "must be below max_plausible_speed_mps",
            ));
        }
        for (field, value) in [
            ("movement.implausible_speed_score", m.implausible_speed_score),
            ("movement.erratic_score", m.erratic_score),
            ("movement.sudden_stop_score", m.sudden_stop_score),
            ("movement.no_movement_score", m.no_movement_score),
            ("environment.restricted_zone_score", self.environment.restricted_zone_score),
            ("environment.night_score", self.environment.night_score),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::new(field, format!("must be within [0, 1], got {value}")));
            }
        }

        let e = &self.environment;
        if e.night_start_hour > 23 || e.night_end_hour > 23 {
            return Err(ConfigError::new(
                "environment.night_*_hour",
                "hours must be within 0..=23",
            ));
        }
        if e.offset().is_none() {
            return Err(ConfigError::new(
                "environment.utc_offset_minutes",
                format!("{} is not a valid UTC offset", e.utc_offset_minutes),
            ));
        }

        if self.check_in.grace_secs >= self.check_in.overdue_secs {
            return Err(ConfigError::new(
                "check_in.grace_secs",
                "must be below check_in.overdue_secs",
            ));
        }

        Ok(())
    }
}

fn secs(value: u64) -> Duration {
    Duration::seconds(value.min(MAX_WINDOW_SECS) as i64)
}
