//! Integration tests for the Escalation Evaluator
//!
//! Drives the public API through the full validate → score → decide flow,
//! including cooldown, confirmation windows and concurrent evaluations.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use safety_evaluator::{
    CancellationOutcome, EnvironmentConfig, EscalationAction, EscalationEvaluator,
    EvaluatorConfig, EvaluatorError, GeoPosition, MovementDescriptor, MovementState, RiskLevel,
    SignalSnapshot, TriggerStatus,
};

fn at(hhmm: &str) -> DateTime<Utc> {
    format!("2026-03-01T{hhmm}:00Z").parse().unwrap()
}

fn position() -> GeoPosition {
    GeoPosition::new(15.2993, 74.1240, 6.0)
}

fn stopped(ts: DateTime<Utc>) -> SignalSnapshot {
    SignalSnapshot::at(ts, position())
        .with_movement(MovementDescriptor::with_state(MovementState::Stopped))
}

/// Restricted zone, 02:00 local, stationary for 40 minutes, check-in overdue
fn critical_case(now: DateTime<Utc>) -> (SignalSnapshot, Vec<SignalSnapshot>) {
    let history = vec![
        stopped(now - Duration::minutes(40)).with_restricted_zone(true),
        stopped(now - Duration::minutes(20)).with_restricted_zone(true),
    ];
    let current = stopped(now)
        .with_restricted_zone(true)
        .with_last_check_in(now - Duration::hours(6));
    (current, history)
}

#[test]
fn test_critical_inputs_auto_trigger() {
    let evaluator = EscalationEvaluator::new();
    let now = at("02:00");
    let (snapshot, history) = critical_case(now);

    let d = evaluator.evaluate_at("tourist-1", &snapshot, &history, now).unwrap();

    assert!(d.assessment.score >= 0.85, "score {}", d.assessment.score);
    assert_eq!(d.assessment.level, RiskLevel::Critical);
    assert_eq!(d.assessment.confidence, 1.0);
    assert_eq!(d.action, EscalationAction::AutoTrigger);
    assert_eq!(d.cooldown_until, Some(now + Duration::minutes(30)));
    for tag in ["in-restricted-zone", "night-hours", "no-movement-30min"] {
        assert!(d.assessment.has_factor(tag), "missing {tag}: {:?}", d.assessment.tags());
    }

    let state = evaluator.state("tourist-1").unwrap().unwrap();
    assert_eq!(state.pending_count(), 1);
    assert_eq!(state.last_trigger_at, Some(now));
}

#[test]
fn test_second_critical_evaluation_is_suppressed() {
    let evaluator = EscalationEvaluator::new();
    let now = at("02:00");
    let (snapshot, history) = critical_case(now);
    let first = evaluator.evaluate_at("tourist-1", &snapshot, &history, now).unwrap();
    assert!(first.is_auto_trigger());

    let later = now + Duration::minutes(5);
    let (snapshot, history) = critical_case(later);
    let second = evaluator.evaluate_at("tourist-1", &snapshot, &history, later).unwrap();

    assert_eq!(second.action, EscalationAction::Suppressed);
    assert_eq!(second.assessment.level, RiskLevel::Critical);
    assert_eq!(second.cooldown_until, first.cooldown_until);
    assert!(second.trigger.is_none());
}

#[test]
fn test_trigger_allowed_again_after_cooldown() {
    let evaluator = EscalationEvaluator::new();
    let now = at("02:00");
    let (snapshot, history) = critical_case(now);
    evaluator.evaluate_at("tourist-1", &snapshot, &history, now).unwrap();

    let later = now + Duration::minutes(30);
    let (snapshot, history) = critical_case(later);
    let d = evaluator.evaluate_at("tourist-1", &snapshot, &history, later).unwrap();
    assert_eq!(d.action, EscalationAction::AutoTrigger);
    // The first trigger's window lapsed long ago and is reported as final
    assert_eq!(d.finalized.len(), 1);
    assert_eq!(d.finalized[0].status, TriggerStatus::Final);
}

#[test]
fn test_partial_inputs_only_notify() {
    let config = EvaluatorConfig {
        environment: EnvironmentConfig {
            restricted_zone_score: 0.5,
            night_score: 0.4,
            ..Default::default()
        },
        ..Default::default()
    };
    let evaluator = EscalationEvaluator::with_config(config).unwrap();
    let now = at("02:00");
    let snapshot = SignalSnapshot::at(now, position()).with_restricted_zone(true);

    let d = evaluator.evaluate_at("tourist-2", &snapshot, &[], now).unwrap();

    let env = d.assessment.sub_scores.environmental.as_ref().unwrap();
    assert!((env.value - 0.9).abs() < 1e-9);
    assert!(d.assessment.confidence < 0.7);
    assert_eq!(d.assessment.level, RiskLevel::Critical);
    assert_eq!(d.action, EscalationAction::Notify);
    assert!(d.confidence_gated);

    let state = evaluator.state("tourist-2").unwrap().unwrap();
    assert!(state.cooldown_until.is_none());
}

#[test]
fn test_malformed_snapshot_leaves_state_unchanged() {
    let evaluator = EscalationEvaluator::new();
    let now = at("02:00");
    let (snapshot, history) = critical_case(now);
    evaluator.evaluate_at("tourist-1", &snapshot, &history, now).unwrap();
    let before = evaluator.state("tourist-1").unwrap();

    let mut bad = stopped(now + Duration::minutes(31));
    bad.position = Some(GeoPosition::new(f64::NAN, 74.0, 5.0));
    let err = evaluator
        .evaluate_at("tourist-1", &bad, &history, now + Duration::minutes(31))
        .unwrap_err();

    assert!(matches!(err, EvaluatorError::InvalidInput { .. }));
    assert_eq!(evaluator.state("tourist-1").unwrap(), before);
}

#[test]
fn test_rejected_input_does_not_create_subject() {
    let evaluator = EscalationEvaluator::new();
    let now = at("12:00");

    let mut no_fix = stopped(now);
    no_fix.position = None;
    assert!(evaluator.evaluate_at("tourist-9", &no_fix, &[], now).is_err());

    let stale = stopped(now - Duration::hours(1));
    let err = evaluator.evaluate_at("tourist-9", &stale, &[], now).unwrap_err();
    assert!(matches!(err, EvaluatorError::StaleInput { .. }));

    assert!(evaluator.evaluate_at("", &stopped(now), &[], now).is_err());
    assert_eq!(evaluator.subject_count().unwrap(), 0);
}

#[test]
fn test_unknown_subject_is_created_with_cleared_cooldown() {
    let evaluator = EscalationEvaluator::new();
    let now = at("12:00");
    let d = evaluator
        .evaluate_at("tourist-new", &stopped(now).with_restricted_zone(false), &[], now)
        .unwrap();
    assert_eq!(d.action, EscalationAction::None);

    let state = evaluator.state("tourist-new").unwrap().unwrap();
    assert!(state.cooldown_until.is_none());
    assert!(state.triggers.is_empty());
}

#[test]
fn test_cancel_within_window() {
    let evaluator = EscalationEvaluator::new();
    let now = at("02:00");
    let (snapshot, history) = critical_case(now);
    let d = evaluator.evaluate_at("tourist-1", &snapshot, &history, now).unwrap();
    let trigger_id = d.trigger.unwrap().trigger_id;

    let outcome = evaluator
        .cancel("tourist-1", Some(trigger_id), now + Duration::seconds(30))
        .unwrap();
    assert!(outcome.was_cancelled());

    let state = evaluator.state("tourist-1").unwrap().unwrap();
    let record = state.trigger(trigger_id).unwrap();
    assert_eq!(record.status, TriggerStatus::Cancelled);
    assert_eq!(record.action(), EscalationAction::Cancelled);
    // Cooldown is not reset early
    assert_eq!(state.cooldown_until, Some(now + Duration::minutes(30)));

    let again = evaluator.cancel("tourist-1", Some(trigger_id), now + Duration::seconds(40)).unwrap();
    assert!(matches!(again, CancellationOutcome::AlreadyCancelled { .. }));
}

#[test]
fn test_cancel_after_window_is_noop() {
    let evaluator = EscalationEvaluator::new();
    let now = at("02:00");
    let (snapshot, history) = critical_case(now);
    evaluator.evaluate_at("tourist-1", &snapshot, &history, now).unwrap();

    let outcome = evaluator.cancel("tourist-1", None, now + Duration::seconds(60)).unwrap();
    match outcome {
        CancellationOutcome::TooLate { trigger, .. } => assert_eq!(trigger.status, TriggerStatus::Final),
        other => panic!("expected TooLate, got {other:?}"),
    }
    let state = evaluator.state("tourist-1").unwrap().unwrap();
    assert_eq!(state.pending_count(), 0);
}

#[test]
fn test_cancel_unknown_subject() {
    let evaluator = EscalationEvaluator::new();
    let outcome = evaluator.cancel("nobody", None, Utc::now()).unwrap();
    assert_eq!(outcome, CancellationOutcome::NoPendingTrigger);
    assert_eq!(evaluator.subject_count().unwrap(), 0);
}

#[test]
fn test_finalize_sweep() {
    let evaluator = EscalationEvaluator::new();
    let now = at("02:00");
    for subject in ["a", "b"] {
        let (snapshot, history) = critical_case(now);
        evaluator.evaluate_at(subject, &snapshot, &history, now).unwrap();
    }

    assert!(evaluator.finalize_expired(now + Duration::seconds(30)).unwrap().is_empty());
    let mut done = evaluator.finalize_expired(now + Duration::seconds(61)).unwrap();
    done.sort_by(|x, y| x.subject_id.cmp(&y.subject_id));
    assert_eq!(done.len(), 2);
    assert_eq!(done[0].subject_id, "a");
    assert_eq!(done[1].trigger.status, TriggerStatus::Final);
}

#[test]
fn test_reset_clears_cooldown() {
    let evaluator = EscalationEvaluator::new();
    let now = at("02:00");
    let (snapshot, history) = critical_case(now);
    evaluator.evaluate_at("tourist-1", &snapshot, &history, now).unwrap();

    assert!(evaluator.reset_subject("tourist-1", now).unwrap());
    assert!(!evaluator.reset_subject("tourist-2", now).unwrap());

    let later = now + Duration::minutes(1);
    let (snapshot, history) = critical_case(later);
    let d = evaluator.evaluate_at("tourist-1", &snapshot, &history, later).unwrap();
    assert_eq!(d.action, EscalationAction::AutoTrigger);
}

#[test]
fn test_restore_persisted_state_keeps_cooldown() {
    let now = at("02:00");
    let first = EscalationEvaluator::new();
    let (snapshot, history) = critical_case(now);
    first.evaluate_at("tourist-1", &snapshot, &history, now).unwrap();
    let persisted = serde_json::to_string(&first.state("tourist-1").unwrap().unwrap()).unwrap();

    let second = EscalationEvaluator::new();
    second.restore(serde_json::from_str(&persisted).unwrap()).unwrap();
    let later = now + Duration::minutes(10);
    let (snapshot, history) = critical_case(later);
    let d = second.evaluate_at("tourist-1", &snapshot, &history, later).unwrap();
    assert_eq!(d.action, EscalationAction::Suppressed);
    // Suppressed evaluations are still recorded against the subject
    assert_eq!(second.state("tourist-1").unwrap().unwrap().evaluations, 2);
}

#[test]
fn test_restore_state_without_evaluation_count() {
    let now = at("02:00");
    let first = EscalationEvaluator::new();
    let (snapshot, history) = critical_case(now);
    first.evaluate_at("tourist-1", &snapshot, &history, now).unwrap();

    let mut persisted = serde_json::to_value(first.state("tourist-1").unwrap().unwrap()).unwrap();
    persisted.as_object_mut().unwrap().remove("evaluations");

    let second = EscalationEvaluator::new();
    second.restore(serde_json::from_value(persisted).unwrap()).unwrap();
    let state = second.state("tourist-1").unwrap().unwrap();
    assert_eq!(state.evaluations, 0);
    assert_eq!(state.pending_count(), 1);
}

#[test]
fn test_concurrent_evaluations_fire_once_per_subject() {
    let evaluator = Arc::new(EscalationEvaluator::new());
    let now = at("02:00");

    let decisions: Vec<EscalationAction> = std::thread::scope(|scope| {
        let handles: Vec<_> = (0..16)
            .map(|i| {
                let evaluator = Arc::clone(&evaluator);
                scope.spawn(move || {
                    let subject = if i % 2 == 0 { "even" } else { "odd" };
                    let (snapshot, history) = critical_case(now);
                    evaluator
                        .evaluate_at(subject, &snapshot, &history, now)
                        .unwrap()
                        .action
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    let fired = decisions
        .iter()
        .filter(|a| **a == EscalationAction::AutoTrigger)
        .count();
    let suppressed = decisions
        .iter()
        .filter(|a| **a == EscalationAction::Suppressed)
        .count();
    assert_eq!(fired, 2, "exactly one auto-trigger per subject");
    assert_eq!(suppressed, 14);
}
