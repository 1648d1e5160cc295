//! Escalation Engine — deterministic escalation decisions per subject
//!
//! Consumes a validated [`SignalSnapshot`] plus history, scores it, and
//! decides between `none`, `notify`, `auto_trigger` and `suppressed`.
//!
//! # Decision ladder
//!
//! ```text
//! cooldown active                          → suppressed (assessment still returned)
//! score ≥ critical, confidence ≥ minimum   → auto_trigger, cooldown + confirmation window start
//! score ≥ critical, confidence < minimum   → notify (never auto-trigger on partial data)
//! score ≥ high                             → notify
//! otherwise                                → none
//! ```
//!
//! # Concurrency
//!
//! Per-subject state lives behind its own mutex; the registry lock is only
//! held to look up or insert a subject. Two evaluations for one subject are
//! serialized, so they cannot both observe an inactive cooldown. Evaluations
//! for different subjects only contend on the short registry lookup.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::assessment::RiskAssessment;
use crate::config::EvaluatorConfig;
use crate::error::{ConfigError, EvaluatorError, EvaluatorResult};
use crate::scoring;
use crate::snapshot::SignalSnapshot;
use crate::state::{EscalationState, SubjectId, TriggerId, TriggerRecord, TriggerStatus};

/// Escalation action chosen for one evaluation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscalationAction {
    None,
    /// Alert an operator; never dispatches an emergency response
    Notify,
    /// Dispatch an emergency response, subject to the confirmation window
    AutoTrigger,
    /// Cooldown active; the assessment is reported but nothing fires
    Suppressed,
    /// An auto-trigger the subject cancelled inside its confirmation window
    Cancelled,
}

impl std::fmt::Display for EscalationAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::None => write!(f, "none"),
            Self::Notify => write!(f, "notify"),
            Self::AutoTrigger => write!(f, "auto_trigger"),
            Self::Suppressed => write!(f, "suppressed"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Decision produced by the Escalation Evaluator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EscalationDecision {
    pub subject_id: SubjectId,
    pub evaluated_at: DateTime<Utc>,
    pub assessment: RiskAssessment,
    pub action: EscalationAction,
    /// Human-readable reason for the action
    pub reason: String,
    /// Whether low confidence capped the action at `notify`
    pub confidence_gated: bool,
    /// The trigger opened by this evaluation, when `action` is `auto_trigger`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trigger: Option<TriggerRecord>,
    /// Cooldown deadline in force after this evaluation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cooldown_until: Option<DateTime<Utc>>,
    /// Earlier triggers whose confirmation window lapsed before this call
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub finalized: Vec<TriggerRecord>,
}

impl EscalationDecision {
    pub fn is_auto_trigger(&self) -> bool {
        self.action == EscalationAction::AutoTrigger
    }

    /// Compact summary for logging
    pub fn summary(&self) -> String {
        format!(
            "subject={} action={} {}",
            self.subject_id,
            self.action,
            self.assessment.summary()
        )
    }
}

/// Result of a subject-initiated cancellation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum CancellationOutcome {
    /// Cancelled inside the window; the trigger is now `cancelled`
    Cancelled { trigger: TriggerRecord },
    /// The window had already closed; the trigger stands as final.
    /// `finalized_now` is set when this call performed the finalization.
    TooLate {
        trigger: TriggerRecord,
        finalized_now: bool,
    },
    /// The trigger was cancelled earlier
    AlreadyCancelled { trigger: TriggerRecord },
    /// No matching trigger for this subject
    NoPendingTrigger,
}

impl CancellationOutcome {
    pub fn was_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }
}

/// A trigger that became final during a sweep
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinalizedTrigger {
    pub subject_id: SubjectId,
    pub trigger: TriggerRecord,
}

type StateSlot = Arc<Mutex<EscalationState>>;

/// The Escalation Evaluator
pub struct EscalationEvaluator {
    config: EvaluatorConfig,
    subjects: Mutex<HashMap<SubjectId, StateSlot>>,
}

impl EscalationEvaluator {
    /// Create an evaluator with default config
    pub fn new() -> Self {
        Self {
            config: EvaluatorConfig::default(),
            subjects: Mutex::new(HashMap::new()),
        }
    }

    /// Create with custom config, rejecting inconsistent thresholds
    pub fn with_config(config: EvaluatorConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            config,
            subjects: Mutex::new(HashMap::new()),
        })
    }

    pub fn config(&self) -> &EvaluatorConfig {
        &self.config
    }

    /// Evaluate a snapshot against the wall clock
    pub fn evaluate(
        &self,
        subject_id: &str,
        snapshot: &SignalSnapshot,
        history: &[SignalSnapshot],
    ) -> EvaluatorResult<EscalationDecision> {
        self.evaluate_at(subject_id, snapshot, history, Utc::now())
    }

    /// Evaluate a snapshot as of `now`.
    ///
    /// Input is validated and scored before the subject's state is touched,
    /// so an error leaves every subject exactly as it was. Unknown subjects
    /// get a fresh state with the cooldown cleared.
    pub fn evaluate_at(
        &self,
        subject_id: &str,
        snapshot: &SignalSnapshot,
        history: &[SignalSnapshot],
        now: DateTime<Utc>,
    ) -> EvaluatorResult<EscalationDecision> {
        validate_subject_id(subject_id)?;
        if let Err(e) = snapshot.validate(now, &self.config) {
            debug!(subject_id, error = %e, "Snapshot rejected");
            return Err(e);
        }

        let horizon = self.config.cooldown().max(self.config.confirmation_window());
        if now.checked_add_signed(horizon).is_none() {
            return Err(EvaluatorError::invalid(format!(
                "evaluation time {now} leaves no room for cooldown and confirmation deadlines"
            )));
        }

        let assessment = scoring::assess(snapshot, history, &self.config);

        let slot = self.slot(subject_id, now)?;
        let mut state = lock_state(&slot, subject_id)?;
        state.evaluations = state.evaluations.saturating_add(1);

        let finalized = state.finalize_expired(now);
        for trigger in &finalized {
            info!(subject_id, trigger_id = %trigger.trigger_id, "Trigger finalized (confirmation window lapsed)");
        }

        let decision = decide(&mut state, assessment, now, &self.config, finalized);
        match decision.action {
            EscalationAction::AutoTrigger => info!(
                subject_id,
                score = decision.assessment.score,
                cooldown_until = ?decision.cooldown_until,
                "Auto-trigger fired"
            ),
            EscalationAction::Suppressed => info!(
                subject_id,
                level = %decision.assessment.level,
                "Escalation suppressed by cooldown"
            ),
            _ => debug!(subject_id, "{}", decision.summary()),
        }
        Ok(decision)
    }

    /// Deliver a subject-initiated cancellation.
    ///
    /// With `trigger_id = None` the latest pending trigger is targeted.
    /// Cancelling never shortens the cooldown. Unknown subjects report
    /// `NoPendingTrigger` and are not created.
    pub fn cancel(
        &self,
        subject_id: &str,
        trigger_id: Option<TriggerId>,
        now: DateTime<Utc>,
    ) -> EvaluatorResult<CancellationOutcome> {
        let Some(slot) = self.existing_slot(subject_id)? else {
            debug!(subject_id, "Cancellation for unknown subject");
            return Ok(CancellationOutcome::NoPendingTrigger);
        };
        let mut state = lock_state(&slot, subject_id)?;

        let index = match trigger_id {
            Some(id) => state.triggers.iter().position(|t| t.trigger_id == id),
            None => state
                .triggers
                .iter()
                .rposition(|t| t.is_pending())
                .or_else(|| state.triggers.len().checked_sub(1)),
        };
        let Some(index) = index else {
            return Ok(CancellationOutcome::NoPendingTrigger);
        };

        let trigger = &mut state.triggers[index];
        let outcome = match trigger.status {
            TriggerStatus::Pending if trigger.window_open(now) => {
                trigger.status = TriggerStatus::Cancelled;
                trigger.resolved_at = Some(now);
                info!(subject_id, trigger_id = %trigger.trigger_id, "Auto-trigger cancelled by subject");
                CancellationOutcome::Cancelled {
                    trigger: trigger.clone(),
                }
            }
            TriggerStatus::Pending | TriggerStatus::Final => {
                let finalized_now = trigger.is_pending();
                if finalized_now {
                    trigger.status = TriggerStatus::Final;
                    trigger.resolved_at = Some(trigger.confirm_deadline);
                }
                warn!(
                    subject_id,
                    trigger_id = %trigger.trigger_id,
                    deadline = %trigger.confirm_deadline,
                    "Late cancellation ignored, trigger already final"
                );
                CancellationOutcome::TooLate {
                    trigger: trigger.clone(),
                    finalized_now,
                }
            }
            TriggerStatus::Cancelled => CancellationOutcome::AlreadyCancelled {
                trigger: trigger.clone(),
            },
        };
        Ok(outcome)
    }

    /// Finalize every lapsed confirmation window across all subjects.
    ///
    /// Optional: the same transition happens lazily on the next evaluation
    /// or cancellation. Hosts poll this to report finality promptly.
    pub fn finalize_expired(&self, now: DateTime<Utc>) -> EvaluatorResult<Vec<FinalizedTrigger>> {
        let slots: Vec<(SubjectId, StateSlot)> = self
            .registry()?
            .iter()
            .map(|(id, slot)| (id.clone(), Arc::clone(slot)))
            .collect();

        let mut finalized = Vec::new();
        for (subject_id, slot) in slots {
            let mut state = lock_state(&slot, &subject_id)?;
            for trigger in state.finalize_expired(now) {
                info!(subject_id = %subject_id, trigger_id = %trigger.trigger_id, "Trigger finalized");
                finalized.push(FinalizedTrigger {
                    subject_id: subject_id.clone(),
                    trigger,
                });
            }
        }
        Ok(finalized)
    }

    /// Cloned view of a subject's state, for audit or persistence
    pub fn state(&self, subject_id: &str) -> EvaluatorResult<Option<EscalationState>> {
        match self.existing_slot(subject_id)? {
            Some(slot) => Ok(Some(lock_state(&slot, subject_id)?.clone())),
            None => Ok(None),
        }
    }

    /// Reset a subject to a fresh state with the cooldown cleared.
    ///
    /// The state is replaced in place under its own lock so an evaluation
    /// racing the reset sees either the old or the new state, never both.
    /// Returns `false` when the subject was unknown.
    pub fn reset_subject(&self, subject_id: &str, now: DateTime<Utc>) -> EvaluatorResult<bool> {
        match self.existing_slot(subject_id)? {
            Some(slot) => {
                *lock_state(&slot, subject_id)? = EscalationState::new(subject_id, now);
                info!(subject_id, "Escalation state reset");
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Re-hydrate an externally persisted state, replacing any live one
    pub fn restore(&self, restored: EscalationState) -> EvaluatorResult<()> {
        validate_subject_id(&restored.subject_id)?;
        let subject_id = restored.subject_id.clone();
        let existing = {
            let mut registry = self.registry()?;
            match registry.get(&subject_id) {
                Some(slot) => Arc::clone(slot),
                None => {
                    registry.insert(subject_id, Arc::new(Mutex::new(restored)));
                    return Ok(());
                }
            }
        };
        *lock_state(&existing, &subject_id)? = restored;
        Ok(())
    }

    /// Number of subjects with state
    pub fn subject_count(&self) -> EvaluatorResult<usize> {
        Ok(self.registry()?.len())
    }

    fn registry(&self) -> EvaluatorResult<MutexGuard<'_, HashMap<SubjectId, StateSlot>>> {
        self.subjects
            .lock()
            .map_err(|_| EvaluatorError::StatePoisoned {
                subject_id: "<registry>".to_string(),
            })
    }

    fn existing_slot(&self, subject_id: &str) -> EvaluatorResult<Option<StateSlot>> {
        Ok(self.registry()?.get(subject_id).map(Arc::clone))
    }

    /// Get-or-insert the subject's state slot
    fn slot(&self, subject_id: &str, now: DateTime<Utc>) -> EvaluatorResult<StateSlot> {
        let mut registry = self.registry()?;
        let slot = registry.entry(subject_id.to_string()).or_insert_with(|| {
            debug!(subject_id, "Creating escalation state for new subject");
            Arc::new(Mutex::new(EscalationState::new(subject_id, now)))
        });
        Ok(Arc::clone(slot))
    }
}

impl Default for EscalationEvaluator {
    fn default() -> Self {
        Self::new()
    }
}

fn validate_subject_id(subject_id: &str) -> EvaluatorResult<()> {
    if subject_id.trim().is_empty() {
        return Err(EvaluatorError::invalid("subject id must not be empty"));
    }
    Ok(())
}

fn lock_state<'a>(
    slot: &'a StateSlot,
    subject_id: &str,
) -> EvaluatorResult<MutexGuard<'a, EscalationState>> {
    slot.lock().map_err(|_| EvaluatorError::StatePoisoned {
        subject_id: subject_id.to_string(),
    })
}

/// `now + window`, pinned to the last representable instant on overflow
fn deadline_after(now: DateTime<Utc>, window: chrono::Duration) -> DateTime<Utc> {
    now.checked_add_signed(window)
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Core decision function.
///
/// Mutates `state` only when the action is `auto_trigger`.
pub fn decide(
    state: &mut EscalationState,
    assessment: RiskAssessment,
    now: DateTime<Utc>,
    config: &EvaluatorConfig,
    finalized: Vec<TriggerRecord>,
) -> EscalationDecision {
    let confident = assessment.confidence >= config.min_confidence;
    let breakpoints = &config.breakpoints;
    let mut decision = EscalationDecision {
        subject_id: state.subject_id.clone(),
        evaluated_at: now,
        action: EscalationAction::None,
        reason: String::new(),
        confidence_gated: false,
        trigger: None,
        cooldown_until: state.cooldown_until.filter(|until| now < *until),
        finalized,
        assessment,
    };
    let score = decision.assessment.score;

    if state.cooldown_active(now) {
        decision.action = EscalationAction::Suppressed;
        decision.reason = format!(
            "Cooldown active until {}; {} assessment not escalated",
            decision.cooldown_until.map(|t| t.to_rfc3339()).unwrap_or_default(),
            decision.assessment.level
        );
    } else if score >= breakpoints.critical && confident {
        let trigger = TriggerRecord {
            trigger_id: Uuid::new_v4(),
            triggered_at: now,
            confirm_deadline: deadline_after(now, config.confirmation_window()),
            score,
            status: TriggerStatus::Pending,
            resolved_at: None,
        };
        let cooldown_until = deadline_after(now, config.cooldown());
        state.record_trigger(trigger.clone(), cooldown_until, config.trigger_history_limit);

        decision.action = EscalationAction::AutoTrigger;
        decision.reason = format!(
            "Score {:.2} at or above critical threshold {:.2}; cancellable until {}",
            score,
            breakpoints.critical,
            trigger.confirm_deadline.to_rfc3339()
        );
        decision.trigger = Some(trigger);
        decision.cooldown_until = Some(cooldown_until);
    } else if score >= breakpoints.critical {
        decision.action = EscalationAction::Notify;
        decision.confidence_gated = true;
        decision.reason = format!(
            "Score {:.2} is critical but confidence {:.2} is below {:.2}; notify only",
            score, decision.assessment.confidence, config.min_confidence
        );
    } else if score >= breakpoints.high {
        decision.action = EscalationAction::Notify;
        decision.reason = format!(
            "Score {:.2} at or above high threshold {:.2}",
            score, breakpoints.high
        );
    } else {
        decision.reason = format!(
            "Score {:.2} below high threshold {:.2}",
            score, breakpoints.high
        );
    }

    decision
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assessment::{RiskLevel, SubScores};
    use chrono::Duration;

    fn assessment(score: f64, confidence: f64) -> RiskAssessment {
        RiskAssessment {
            score,
            level: RiskLevel::from_score(score, &EvaluatorConfig::default().breakpoints),
            confidence,
            sub_scores: SubScores::default(),
            factors: Vec::new(),
        }
    }

    #[test]
    fn test_decide_ladder() {
        let config = EvaluatorConfig::default();
        let now = Utc::now();
        let cases = [
            (0.2, 1.0, EscalationAction::None),
            (0.8, 1.0, EscalationAction::Notify),
            (0.8, 0.3, EscalationAction::Notify),
            (0.9, 0.3, EscalationAction::Notify),
            (0.9, 1.0, EscalationAction::AutoTrigger),
        ];
        for (score, confidence, expected) in cases {
            let mut state = EscalationState::new("s", now);
            let d = decide(&mut state, assessment(score, confidence), now, &config, vec![]);
            assert_eq!(d.action, expected, "score={score} confidence={confidence}");
        }
    }

    #[test]
    fn test_low_confidence_sets_gated_flag() {
        let config = EvaluatorConfig::default();
        let now = Utc::now();
        let mut state = EscalationState::new("s", now);
        let d = decide(&mut state, assessment(0.95, 1.0 / 3.0), now, &config, vec![]);
        assert!(d.confidence_gated);
        assert!(state.cooldown_until.is_none(), "gated decision must not start cooldown");
    }

    #[test]
    fn test_auto_trigger_mutates_state() {
        let config = EvaluatorConfig::default();
        let now = Utc::now();
        let mut state = EscalationState::new("s", now);
        let d = decide(&mut state, assessment(0.9, 1.0), now, &config, vec![]);

        let trigger = d.trigger.expect("trigger");
        assert_eq!(trigger.confirm_deadline, now + Duration::seconds(60));
        assert_eq!(state.cooldown_until, Some(now + Duration::minutes(30)));
        assert_eq!(state.last_trigger_at, Some(now));
        assert_eq!(state.pending_count(), 1);
    }

    #[test]
    fn test_non_trigger_actions_leave_state_untouched() {
        let config = EvaluatorConfig::default();
        let now = Utc::now();
        let mut state = EscalationState::new("s", now);
        let before = state.clone();
        decide(&mut state, assessment(0.8, 1.0), now, &config, vec![]);
        decide(&mut state, assessment(0.1, 1.0), now, &config, vec![]);
        assert_eq!(state, before);
    }

    #[test]
    fn test_cooldown_suppresses_everything() {
        let config = EvaluatorConfig::default();
        let now = Utc::now();
        let mut state = EscalationState::new("s", now);
        decide(&mut state, assessment(0.9, 1.0), now, &config, vec![]);

        let later = now + Duration::minutes(5);
        let before = state.clone();
        for score in [0.1, 0.8, 1.0] {
            let d = decide(&mut state, assessment(score, 1.0), later, &config, vec![]);
            assert_eq!(d.action, EscalationAction::Suppressed);
            assert_eq!(d.cooldown_until, Some(now + Duration::minutes(30)));
        }
        assert_eq!(state, before);
    }

    #[test]
    fn test_deadlines_saturate_near_max_time() {
        let config = EvaluatorConfig::default();
        let now = DateTime::<Utc>::MAX_UTC - Duration::minutes(10);
        let mut state = EscalationState::new("s", now);
        let d = decide(&mut state, assessment(0.95, 1.0), now, &config, vec![]);
        assert_eq!(d.action, EscalationAction::AutoTrigger);
        assert_eq!(d.cooldown_until, Some(DateTime::<Utc>::MAX_UTC));
        assert_eq!(
            d.trigger.unwrap().confirm_deadline,
            now + Duration::seconds(60)
        );
    }

    #[test]
    fn test_evaluation_at_end_of_time_is_rejected() {
        use crate::snapshot::{GeoPosition, MovementDescriptor, MovementState};

        let evaluator = EscalationEvaluator::new();
        let now = DateTime::<Utc>::MAX_UTC - Duration::minutes(10);
        let snapshot = SignalSnapshot::at(now, GeoPosition::new(15.3, 74.1, 6.0))
            .with_movement(MovementDescriptor::with_state(MovementState::Stopped))
            .with_restricted_zone(true)
            .with_last_check_in(now - Duration::hours(6));

        let err = evaluator.evaluate_at("s", &snapshot, &[], now).unwrap_err();
        assert!(matches!(err, EvaluatorError::InvalidInput { .. }));
        assert_eq!(evaluator.subject_count().unwrap(), 0);
    }

    #[test]
    fn test_evaluations_are_counted() {
        use crate::snapshot::{GeoPosition, MovementDescriptor, MovementState};

        let evaluator = EscalationEvaluator::new();
        let now = Utc::now();
        let quiet = SignalSnapshot::at(now, GeoPosition::new(15.3, 74.1, 6.0))
            .with_movement(MovementDescriptor::with_state(MovementState::Moving));
        evaluator.evaluate_at("s", &quiet, &[], now).unwrap();
        evaluator.evaluate_at("s", &quiet, &[], now).unwrap();

        let mut bad = quiet.clone();
        bad.position = None;
        assert!(evaluator.evaluate_at("s", &bad, &[], now).is_err());

        let state = evaluator.state("s").unwrap().unwrap();
        assert_eq!(state.evaluations, 2);
        assert_eq!(state.cooldown_until, None);
    }

    #[test]
    fn test_action_serialization() {
        let json = serde_json::to_string(&EscalationAction::AutoTrigger).unwrap();
        assert_eq!(json, "\"auto_trigger\"");
        let outcome = CancellationOutcome::NoPendingTrigger;
        let json = serde_json::to_string(&outcome).unwrap();
        assert!(json.contains("\"outcome\":\"no_pending_trigger\""), "{json}");
    }
}
