//! Sentinel service
//!
//! Wires ingestion, the escalation evaluator, notification delivery and the
//! event bus together. All escalation decisions stay inside the evaluator;
//! this layer only turns them into notifications and audit events.

use chrono::{DateTime, Utc};
use safety_evaluator::{
    CancellationOutcome, EscalationAction, EscalationDecision, EscalationEvaluator,
    EvaluatorError, FinalizedTrigger, GeoPosition, SignalSnapshot, TriggerId,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::SentinelConfig;
use crate::events::{AuditLog, EventBus, SafetyEvent, SharedEventBus};
use crate::geofence::GeofenceSet;
use crate::ingestion::{IngestError, IngestOutcome, IngestResult, LocationIngestor};
use crate::notify::{deliver_best_effort, LogSink, Notification, NotificationSink, WebhookSink};

/// Errors from confirmation-window operations (cancel, sweep)
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error(transparent)]
    Evaluator(#[from] EvaluatorError),
}

pub type ServiceResult<T> = Result<T, ServiceError>;

pub struct SentinelService {
    ingestor: LocationIngestor,
    sink: Arc<dyn NotificationSink>,
    events: SharedEventBus,
}

impl SentinelService {
    pub fn new(
        evaluator: Arc<EscalationEvaluator>,
        geofence: GeofenceSet,
        config: crate::config::IngestionConfig,
        sink: Arc<dyn NotificationSink>,
        events: SharedEventBus,
    ) -> Self {
        Self {
            ingestor: LocationIngestor::new(evaluator, geofence, config),
            sink,
            events,
        }
    }

    /// Build the service described by `config`.
    ///
    /// Uses the webhook sink when a URL is configured, the log sink otherwise.
    pub fn from_config(config: &SentinelConfig) -> anyhow::Result<Self> {
        let evaluator = EscalationEvaluator::with_config(config.evaluator.clone())?;
        let sink: Arc<dyn NotificationSink> = match &config.notify.webhook_url {
            Some(url) => Arc::new(WebhookSink::new(
                url.clone(),
                config.notify.webhook_timeout_secs.map(Duration::from_secs),
            )?),
            None => Arc::new(LogSink),
        };
        let events = match &config.audit_log {
            Some(path) => EventBus::with_audit_log(AuditLog::new(path)),
            None => EventBus::new(),
        };
        Ok(Self::new(
            Arc::new(evaluator),
            GeofenceSet::new(config.zones.clone()),
            config.ingestion.clone(),
            sink,
            events.shared(),
        ))
    }

    pub fn evaluator(&self) -> &Arc<EscalationEvaluator> {
        self.ingestor.evaluator()
    }

    pub fn events(&self) -> &SharedEventBus {
        &self.events
    }

    fn publish(&self, event: SafetyEvent) {
        // Audit failures are already logged by the bus
        let _ = self.events.publish(event);
    }

    /// Ingest and evaluate one location update
    pub async fn submit(
        &self,
        subject_id: &str,
        snapshot: SignalSnapshot,
        now: DateTime<Utc>,
    ) -> IngestResult<IngestOutcome> {
        let outcome = match self.ingestor.ingest(subject_id, snapshot, now) {
            Ok(outcome) => outcome,
            Err(e) => {
                if let IngestError::Evaluation(inner) = &e {
                    warn!(subject_id, "Snapshot rejected: {inner}");
                    self.publish(SafetyEvent::SnapshotRejected {
                        subject_id: subject_id.to_string(),
                        reason: inner.to_string(),
                        timestamp: now,
                    });
                } else {
                    debug!(subject_id, "Snapshot not ingested: {e}");
                }
                return Err(e);
            }
        };

        self.report_finalized(subject_id, &outcome.decision).await;
        self.publish(decision_event(&outcome.decision));
        if let Some(notification) = Notification::from_decision(&outcome.decision) {
            deliver_best_effort(self.sink.as_ref(), &notification).await;
        }
        Ok(outcome)
    }

    /// Triggers finalized lazily during an evaluation still get announced
    async fn report_finalized(&self, subject_id: &str, decision: &EscalationDecision) {
        for trigger in &decision.finalized {
            self.announce_final(&FinalizedTrigger {
                subject_id: subject_id.to_string(),
                trigger: trigger.clone(),
            })
            .await;
        }
    }

    async fn announce_final(&self, finalized: &FinalizedTrigger) {
        let trigger = &finalized.trigger;
        info!(
            subject_id = %finalized.subject_id,
            trigger_id = %trigger.trigger_id,
            "Trigger finalized"
        );
        self.publish(SafetyEvent::TriggerFinalized {
            subject_id: finalized.subject_id.clone(),
            trigger_id: trigger.trigger_id,
            timestamp: trigger.resolved_at.unwrap_or(trigger.confirm_deadline),
        });
        let notification = Notification::finalized(&finalized.subject_id, trigger);
        deliver_best_effort(self.sink.as_ref(), &notification).await;
    }

    /// Subject-initiated cancellation of a pending auto-trigger
    pub async fn cancel(
        &self,
        subject_id: &str,
        trigger_id: Option<TriggerId>,
        now: DateTime<Utc>,
    ) -> ServiceResult<CancellationOutcome> {
        let outcome = self.evaluator().cancel(subject_id, trigger_id, now)?;
        match &outcome {
            CancellationOutcome::Cancelled { trigger } => {
                self.publish(SafetyEvent::TriggerCancelled {
                    subject_id: subject_id.to_string(),
                    trigger_id: trigger.trigger_id,
                    timestamp: now,
                });
                let notification = Notification::cancelled(subject_id, trigger);
                deliver_best_effort(self.sink.as_ref(), &notification).await;
            }
            CancellationOutcome::TooLate {
                trigger,
                finalized_now,
            } => {
                info!(subject_id, trigger_id = %trigger.trigger_id, "Cancellation arrived after the confirmation window");
                if *finalized_now {
                    self.announce_final(&FinalizedTrigger {
                        subject_id: subject_id.to_string(),
                        trigger: trigger.clone(),
                    })
                    .await;
                }
            }
            CancellationOutcome::AlreadyCancelled { .. } | CancellationOutcome::NoPendingTrigger => {
                debug!(subject_id, "Cancellation ignored");
            }
        }
        Ok(outcome)
    }

    /// Manual panic alert; never scored, never subject to cooldown
    pub async fn raise_panic(
        &self,
        subject_id: &str,
        position: Option<GeoPosition>,
        now: DateTime<Utc>,
    ) -> Notification {
        warn!(subject_id, "Panic button pressed");
        self.publish(SafetyEvent::PanicRaised {
            subject_id: subject_id.to_string(),
            position,
            timestamp: now,
        });
        let notification = Notification::panic(subject_id, now, position);
        deliver_best_effort(self.sink.as_ref(), &notification).await;
        notification
    }

    /// Finalize every trigger whose confirmation window closed by `now`
    pub async fn finalize_expired(
        &self,
        now: DateTime<Utc>,
    ) -> ServiceResult<Vec<FinalizedTrigger>> {
        let finalized = self.evaluator().finalize_expired(now)?;
        for entry in &finalized {
            self.announce_final(entry).await;
        }
        Ok(finalized)
    }
}

fn decision_event(decision: &EscalationDecision) -> SafetyEvent {
    let assessment = &decision.assessment;
    let factors: Vec<String> = assessment.tags().into_iter().map(String::from).collect();
    match (&decision.action, &decision.trigger) {
        (EscalationAction::AutoTrigger, Some(trigger)) => SafetyEvent::AutoTriggered {
            subject_id: decision.subject_id.clone(),
            trigger_id: trigger.trigger_id,
            score: assessment.score,
            factors,
            confirm_deadline: trigger.confirm_deadline,
            timestamp: decision.evaluated_at,
        },
        _ => SafetyEvent::Evaluated {
            subject_id: decision.subject_id.clone(),
            score: assessment.score,
            level: assessment.level,
            confidence: assessment.confidence,
            action: decision.action,
            factors,
            timestamp: decision.evaluated_at,
        },
    }
}

/// Periodically finalize expired confirmation windows until `shutdown` fires
pub fn spawn_finalizer(
    service: Arc<SentinelService>,
    period: Duration,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    debug!("Finalizer stopped");
                    break;
                }
                _ = ticker.tick() => {
                    if let Err(e) = service.finalize_expired(Utc::now()).await {
                        warn!("Finalizer sweep failed: {e}");
                    }
                }
            }
        }
    })
}
