//! Sub-score computation
//!
//! Turns a validated snapshot plus the subject's recent history into the three
//! sub-scores and the composite [`RiskAssessment`]. Pure functions only: no
//! clock reads, no state.
//!
//! ```text
//! movement       max(implausible-speed, erratic-movement, sudden-stop, no-movement-Nmin)
//! environmental  in-restricted-zone + night-hours, clamped to 1
//! temporal       0 ──grace── linear ramp ──overdue── 1
//! composite      Σ wᵢ·sᵢ / Σ wᵢ over the sub-scores whose inputs are present
//! ```

use chrono::{DateTime, Timelike, Utc};

use crate::assessment::{RiskAssessment, RiskFactor, RiskLevel, SignalKind, SubScore, SubScores};
use crate::config::{EvaluatorConfig, MovementConfig};
use crate::snapshot::{MovementState, SignalSnapshot};

pub const TAG_IMPLAUSIBLE_SPEED: &str = "implausible-speed";
pub const TAG_ERRATIC_MOVEMENT: &str = "erratic-movement";
pub const TAG_SUDDEN_STOP: &str = "sudden-stop";
pub const TAG_RESTRICTED_ZONE: &str = "in-restricted-zone";
pub const TAG_NIGHT_HOURS: &str = "night-hours";
pub const TAG_OVERDUE_CHECK_IN: &str = "overdue-check-in";

/// Tag for the sustained no-movement factor, e.g. `no-movement-30min`
pub fn no_movement_tag(config: &MovementConfig) -> String {
    format!("no-movement-{}min", config.no_movement_threshold_secs / 60)
}

/// Score a snapshot against its history.
///
/// `history` holds prior snapshots of the same subject, newest last. Entries
/// recorded after `snapshot` are ignored.
pub fn assess(
    snapshot: &SignalSnapshot,
    history: &[SignalSnapshot],
    config: &EvaluatorConfig,
) -> RiskAssessment {
    let prior: Vec<&SignalSnapshot> = history
        .iter()
        .filter(|s| s.timestamp <= snapshot.timestamp)
        .collect();

    let sub_scores = SubScores {
        movement: movement_score(snapshot, &prior, &config.movement),
        environmental: environmental_score(snapshot, config),
        temporal: temporal_score(snapshot, config),
    };

    let score = composite_score(&sub_scores, config);
    let confidence = sub_scores.confidence();
    let factors = [
        &sub_scores.movement,
        &sub_scores.environmental,
        &sub_scores.temporal,
    ]
    .into_iter()
    .flatten()
    .flat_map(|s| s.factors.iter().cloned())
    .collect();

    RiskAssessment {
        score,
        level: RiskLevel::from_score(score, &config.breakpoints),
        confidence,
        sub_scores,
        factors,
    }
}

/// Weighted average over present sub-scores, clamped to [0, 1]
pub fn composite_score(sub_scores: &SubScores, config: &EvaluatorConfig) -> f64 {
    let w = &config.weights;
    let (weighted, total) = [
        (&sub_scores.movement, w.movement),
        (&sub_scores.environmental, w.environmental),
        (&sub_scores.temporal, w.temporal),
    ]
    .into_iter()
    .filter_map(|(sub, weight)| sub.as_ref().map(|s| (s.value * weight, weight)))
    .fold((0.0, 0.0), |(acc, tw), (v, w)| (acc + v, tw + w));

    if total <= 0.0 {
        return 0.0;
    }
    let score = weighted / total;
    if score.is_finite() {
        score.clamp(0.0, 1.0)
    } else {
        0.0
    }
}

fn movement_score(
    snapshot: &SignalSnapshot,
    prior: &[&SignalSnapshot],
    config: &MovementConfig,
) -> Option<SubScore> {
    let movement = snapshot.movement.as_ref()?;
    let state = movement.resolved_state(config.stop_speed_mps);
    // A heading alone says nothing about whether the subject is moving
    if state.is_none() {
        return None;
    }
    let mut factors = Vec::new();

    if let Some(speed) = movement.speed_mps {
        if speed > config.max_plausible_speed_mps {
            factors.push(RiskFactor::new(
                SignalKind::Movement,
                TAG_IMPLAUSIBLE_SPEED,
                config.implausible_speed_score,
            ));
        }
    }

    match state {
        Some(MovementState::Erratic) => factors.push(RiskFactor::new(
            SignalKind::Movement,
            TAG_ERRATIC_MOVEMENT,
            config.erratic_score,
        )),
        Some(MovementState::Stopped) => {
            let run = stopped_run(prior, config);
            let stationary_for = match prior.get(prior.len().saturating_sub(run)) {
                Some(oldest) if run > 0 => snapshot.timestamp - oldest.timestamp,
                _ => chrono::Duration::zero(),
            };

            if stationary_for >= config.no_movement_threshold() {
                factors.push(RiskFactor::new(
                    SignalKind::Movement,
                    no_movement_tag(config),
                    config.no_movement_score,
                ));
            } else if run == 0 && preceded_by_sustained_movement(prior, config) {
                factors.push(RiskFactor::new(
                    SignalKind::Movement,
                    TAG_SUDDEN_STOP,
                    config.sudden_stop_score,
                ));
            }
        }
        Some(MovementState::Moving) | None => {}
    }

    let value = factors
        .iter()
        .map(|f| f.weight)
        .fold(0.0_f64, f64::max)
        .clamp(0.0, 1.0);
    Some(SubScore { value, factors })
}

fn resolved(snapshot: &SignalSnapshot, config: &MovementConfig) -> Option<MovementState> {
    snapshot
        .movement
        .as_ref()
        .and_then(|m| m.resolved_state(config.stop_speed_mps))
}

/// Length of the unbroken Stopped run at the tail of `prior`
fn stopped_run(prior: &[&SignalSnapshot], config: &MovementConfig) -> usize {
    prior
        .iter()
        .rev()
        .take_while(|s| resolved(s, config) == Some(MovementState::Stopped))
        .count()
}

fn preceded_by_sustained_movement(prior: &[&SignalSnapshot], config: &MovementConfig) -> bool {
    let needed = config.sustained_moving_samples;
    needed > 0
        && prior.len() >= needed
        && prior
            .iter()
            .rev()
            .take(needed)
            .all(|s| resolved(s, config) == Some(MovementState::Moving))
}

fn environmental_score(snapshot: &SignalSnapshot, config: &EvaluatorConfig) -> Option<SubScore> {
    let inside = snapshot.in_restricted_zone?;
    let env = &config.environment;
    let mut factors = Vec::new();

    if inside {
        factors.push(RiskFactor::new(
            SignalKind::Environmental,
            TAG_RESTRICTED_ZONE,
            env.restricted_zone_score,
        ));
    }
    if let Some(offset) = env.offset() {
        let local_hour = snapshot.timestamp.with_timezone(&offset).hour();
        if env.is_high_risk_hour(local_hour) {
            factors.push(RiskFactor::new(
                SignalKind::Environmental,
                TAG_NIGHT_HOURS,
                env.night_score,
            ));
        }
    }

    let value = factors.iter().map(|f| f.weight).sum::<f64>().clamp(0.0, 1.0);
    Some(SubScore { value, factors })
}

fn temporal_score(snapshot: &SignalSnapshot, config: &EvaluatorConfig) -> Option<SubScore> {
    let last_check_in = snapshot.last_check_in?;
    let value = overdue_fraction(snapshot.timestamp, last_check_in, config);
    let factors = if value > 0.0 {
        vec![RiskFactor::new(
            SignalKind::Temporal,
            TAG_OVERDUE_CHECK_IN,
            value,
        )]
    } else {
        Vec::new()
    };
    Some(SubScore { value, factors })
}

/// Linear ramp from 0 at the grace period to 1 at the overdue mark.
/// A check-in recorded after the snapshot counts as zero elapsed time.
fn overdue_fraction(at: DateTime<Utc>, last_check_in: DateTime<Utc>, config: &EvaluatorConfig) -> f64 {
    let elapsed = (at - last_check_in).num_seconds().max(0) as f64;
    let grace = config.check_in.grace_secs as f64;
    let overdue = config.check_in.overdue_secs as f64;
    ((elapsed - grace) / (overdue - grace)).clamp(0.0, 1.0)
}
