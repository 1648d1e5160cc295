//! Escalation State — per-subject cooldown and trigger bookkeeping
//!
//! Deadlines are stored as absolute timestamps, never as countdowns, so every
//! decision is a pure function of `(now, state)` and correctness needs no
//! background timer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifier of a tracked subject (tourist)
pub type SubjectId = String;

/// Identifier of a single auto-trigger
pub type TriggerId = Uuid;

/// Lifecycle of an auto-trigger
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerStatus {
    /// Confirmation window still open; the subject may cancel
    Pending,
    /// Window expired without cancellation; irreversible
    Final,
    /// Cancelled by the subject inside the window
    Cancelled,
}

impl std::fmt::Display for TriggerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Final => write!(f, "final"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Record of one auto-trigger
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerRecord {
    pub trigger_id: TriggerId,
    pub triggered_at: DateTime<Utc>,
    /// Cancellations are accepted strictly before this instant
    pub confirm_deadline: DateTime<Utc>,
    /// Risk score that fired the trigger
    pub score: f64,
    pub status: TriggerStatus,
    /// When the trigger left `Pending`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_at: Option<DateTime<Utc>>,
}

impl TriggerRecord {
    pub fn is_pending(&self) -> bool {
        self.status == TriggerStatus::Pending
    }

    pub fn window_open(&self, now: DateTime<Utc>) -> bool {
        now < self.confirm_deadline
    }

    /// Action this trigger amounts to after any post hoc downgrade
    pub fn action(&self) -> crate::engine::EscalationAction {
        match self.status {
            TriggerStatus::Cancelled => crate::engine::EscalationAction::Cancelled,
            TriggerStatus::Pending | TriggerStatus::Final => {
                crate::engine::EscalationAction::AutoTrigger
            }
        }
    }
}

/// Mutable escalation record for one subject.
///
/// Created with the cooldown cleared on the subject's first evaluation and
/// owned by the evaluator for the rest of the process lifetime, unless an
/// external collaborator resets it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EscalationState {
    pub subject_id: SubjectId,
    pub created_at: DateTime<Utc>,
    pub last_trigger_at: Option<DateTime<Utc>>,
    /// Auto-triggers are suppressed strictly before this instant
    pub cooldown_until: Option<DateTime<Utc>>,
    /// Trigger history, newest last, bounded by the configured limit
    pub triggers: Vec<TriggerRecord>,
    /// Accepted evaluations, suppressed ones included
    #[serde(default)]
    pub evaluations: u64,
}

impl EscalationState {
    /// Fresh state with the cooldown cleared
    pub fn new(subject_id: impl Into<SubjectId>, now: DateTime<Utc>) -> Self {
        Self {
            subject_id: subject_id.into(),
            created_at: now,
            last_trigger_at: None,
            cooldown_until: None,
            triggers: Vec::new(),
            evaluations: 0,
        }
    }

    pub fn cooldown_active(&self, now: DateTime<Utc>) -> bool {
        self.cooldown_until.is_some_and(|until| now < until)
    }

    /// Count of triggers still awaiting confirmation or cancellation
    pub fn pending_count(&self) -> usize {
        self.triggers.iter().filter(|t| t.is_pending()).count()
    }

    pub fn latest_trigger(&self) -> Option<&TriggerRecord> {
        self.triggers.last()
    }

    pub fn trigger(&self, trigger_id: TriggerId) -> Option<&TriggerRecord> {
        self.triggers.iter().find(|t| t.trigger_id == trigger_id)
    }

    /// Record an auto-trigger and start the cooldown immediately
    pub fn record_trigger(
        &mut self,
        record: TriggerRecord,
        cooldown_until: DateTime<Utc>,
        history_limit: usize,
    ) {
        self.last_trigger_at = Some(record.triggered_at);
        self.cooldown_until = Some(cooldown_until);
        self.triggers.push(record);

        // Keep sliding window, but never drop a trigger that is still pending
        while self.triggers.len() > history_limit.max(1) {
            match self.triggers.iter().position(|t| !t.is_pending()) {
                Some(idx) => {
                    self.triggers.remove(idx);
                }
                None => break,
            }
        }
    }

    /// Move every pending trigger whose window has closed to `Final`.
    ///
    /// Returns the triggers finalized by this call.
    pub fn finalize_expired(&mut self, now: DateTime<Utc>) -> Vec<TriggerRecord> {
        let mut finalized = Vec::new();
        for trigger in self.triggers.iter_mut() {
            if trigger.is_pending() && !trigger.window_open(now) {
                trigger.status = TriggerStatus::Final;
                trigger.resolved_at = Some(trigger.confirm_deadline);
                finalized.push(trigger.clone());
            }
        }
        finalized
    }

    /// Summary for logging
    pub fn summary(&self) -> String {
        format!(
            "subject={} triggers={} pending={} cooldown_until={}",
            self.subject_id,
            self.triggers.len(),
            self.pending_count(),
            self.cooldown_until
                .map(|t| t.to_rfc3339())
                .unwrap_or_else(|| "none".to_string()),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn record(at: DateTime<Utc>) -> TriggerRecord {
        TriggerRecord {
            trigger_id: Uuid::new_v4(),
            triggered_at: at,
            confirm_deadline: at + Duration::seconds(60),
            score: 0.9,
            status: TriggerStatus::Pending,
            resolved_at: None,
        }
    }

    #[test]
    fn test_new_state_has_cleared_cooldown() {
        let now = Utc::now();
        let state = EscalationState::new("tourist-1", now);
        assert!(!state.cooldown_active(now));
        assert_eq!(state.pending_count(), 0);
        assert!(state.latest_trigger().is_none());
    }

    #[test]
    fn test_cooldown_boundary_is_exclusive() {
        let now = Utc::now();
        let mut state = EscalationState::new("tourist-1", now);
        state.record_trigger(record(now), now + Duration::minutes(30), 8);
        assert!(state.cooldown_active(now + Duration::minutes(29)));
        assert!(!state.cooldown_active(now + Duration::minutes(30)));
        assert_eq!(state.last_trigger_at, Some(now));
    }

    #[test]
    fn test_finalize_expired() {
        let now = Utc::now();
        let mut state = EscalationState::new("tourist-1", now);
        state.record_trigger(record(now), now + Duration::minutes(30), 8);

        assert!(state.finalize_expired(now + Duration::seconds(59)).is_empty());
        let done = state.finalize_expired(now + Duration::seconds(60));
        assert_eq!(done.len(), 1);
        assert_eq!(done[0].status, TriggerStatus::Final);
        assert_eq!(state.pending_count(), 0);
        // Idempotent
        assert!(state.finalize_expired(now + Duration::hours(1)).is_empty());
    }

    #[test]
    fn test_history_limit_keeps_pending() {
        let now = Utc::now();
        let mut state = EscalationState::new("tourist-1", now);
        let mut first = record(now - Duration::hours(2));
        first.status = TriggerStatus::Final;
        state.record_trigger(first, now, 2);
        state.record_trigger(record(now - Duration::hours(1)), now, 2);
        state.record_trigger(record(now), now, 2);

        assert_eq!(state.triggers.len(), 2);
        assert_eq!(state.pending_count(), 2);
    }
}
