//! Outbound notifications
//!
//! Decisions that need a human (operator alerts, emergency dispatch, panic
//! alerts) become [`Notification`]s handed to a [`NotificationSink`].
//! Delivery is best effort: a failed delivery is logged and never retried,
//! and never rolls back the escalation state that produced it.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use safety_evaluator::{EscalationAction, EscalationDecision, GeoPosition, RiskLevel, TriggerRecord};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Error type for notification delivery
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("webhook request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("webhook returned status {status}")]
    Rejected { status: u16 },

    #[error("notification channel closed")]
    ChannelClosed,
}

/// What a notification asks the receiver to do
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NotificationKind {
    /// Elevated risk; an operator should take a look
    OperatorAlert { level: RiskLevel, score: f64 },
    /// Auto-trigger raised; dispatch proceeds unless cancelled before the deadline
    EmergencyDispatch {
        trigger_id: Uuid,
        score: f64,
        confirm_deadline: DateTime<Utc>,
    },
    /// Confirmation window elapsed without a cancel
    TriggerFinalized { trigger_id: Uuid },
    /// Subject cancelled within the window
    TriggerCancelled { trigger_id: Uuid },
    /// Manual panic button, no scoring involved
    PanicAlert { position: Option<GeoPosition> },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub id: Uuid,
    pub subject_id: String,
    pub created_at: DateTime<Utc>,
    #[serde(flatten)]
    pub kind: NotificationKind,
    pub message: String,
}

impl Notification {
    fn new(subject_id: &str, created_at: DateTime<Utc>, kind: NotificationKind, message: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            subject_id: subject_id.to_string(),
            created_at,
            kind,
            message,
        }
    }

    /// Notification for a decision, if its action needs one
    pub fn from_decision(decision: &EscalationDecision) -> Option<Self> {
        let assessment = &decision.assessment;
        let kind = match decision.action {
            EscalationAction::Notify => NotificationKind::OperatorAlert {
                level: assessment.level,
                score: assessment.score,
            },
            EscalationAction::AutoTrigger => {
                let trigger = decision.trigger.as_ref()?;
                NotificationKind::EmergencyDispatch {
                    trigger_id: trigger.trigger_id,
                    score: trigger.score,
                    confirm_deadline: trigger.confirm_deadline,
                }
            }
            _ => return None,
        };
        let message = format!(
            "{} for {}: score {:.2} ({}), factors [{}]",
            decision.action,
            decision.subject_id,
            assessment.score,
            assessment.level,
            assessment.tags().join(", ")
        );
        Some(Self::new(&decision.subject_id, decision.evaluated_at, kind, message))
    }

    pub fn finalized(subject_id: &str, trigger: &TriggerRecord) -> Self {
        let at = trigger.resolved_at.unwrap_or(trigger.confirm_deadline);
        Self::new(
            subject_id,
            at,
            NotificationKind::TriggerFinalized {
                trigger_id: trigger.trigger_id,
            },
            format!("trigger {} for {} is final", trigger.trigger_id, subject_id),
        )
    }

    pub fn cancelled(subject_id: &str, trigger: &TriggerRecord) -> Self {
        let at = trigger.resolved_at.unwrap_or(trigger.triggered_at);
        Self::new(
            subject_id,
            at,
            NotificationKind::TriggerCancelled {
                trigger_id: trigger.trigger_id,
            },
            format!("trigger {} for {} was cancelled", trigger.trigger_id, subject_id),
        )
    }

    pub fn panic(subject_id: &str, at: DateTime<Utc>, position: Option<GeoPosition>) -> Self {
        Self::new(
            subject_id,
            at,
            NotificationKind::PanicAlert { position },
            format!("panic button pressed by {subject_id}"),
        )
    }
}

/// Destination for notifications
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn deliver(&self, notification: &Notification) -> Result<(), SinkError>;

    fn name(&self) -> &str {
        "sink"
    }
}

/// Deliver once; failures are logged and swallowed
pub async fn deliver_best_effort(sink: &dyn NotificationSink, notification: &Notification) -> bool {
    match sink.deliver(notification).await {
        Ok(()) => {
            debug!(sink = sink.name(), id = %notification.id, "Notification delivered");
            true
        }
        Err(e) => {
            warn!(
                sink = sink.name(),
                id = %notification.id,
                subject_id = %notification.subject_id,
                "Notification delivery failed: {e}"
            );
            false
        }
    }
}

/// Writes notifications to the tracing log
#[derive(Debug, Default)]
pub struct LogSink;

#[async_trait]
impl NotificationSink for LogSink {
    async fn deliver(&self, notification: &Notification) -> Result<(), SinkError> {
        info!(
            id = %notification.id,
            subject_id = %notification.subject_id,
            "{}",
            notification.message
        );
        Ok(())
    }

    fn name(&self) -> &str {
        "log"
    }
}

/// POSTs notifications as JSON to an operator endpoint
pub struct WebhookSink {
    client: reqwest::Client,
    url: String,
}

impl WebhookSink {
    pub fn new(url: impl Into<String>, timeout: Option<Duration>) -> Result<Self, SinkError> {
        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        Ok(Self {
            client: builder.build()?,
            url: url.into(),
        })
    }
}

#[async_trait]
impl NotificationSink for WebhookSink {
    async fn deliver(&self, notification: &Notification) -> Result<(), SinkError> {
        let response = self.client.post(&self.url).json(notification).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(SinkError::Rejected {
                status: status.as_u16(),
            });
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "webhook"
    }
}

/// Forwards notifications into an in-process channel
pub struct ChannelSink {
    sender: mpsc::UnboundedSender<Notification>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Notification>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

#[async_trait]
impl NotificationSink for ChannelSink {
    async fn deliver(&self, notification: &Notification) -> Result<(), SinkError> {
        self.sender
            .send(notification.clone())
            .map_err(|_| SinkError::ChannelClosed)
    }

    fn name(&self) -> &str {
        "channel"
    }
}
