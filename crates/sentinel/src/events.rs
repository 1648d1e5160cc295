//! Safety events and the audit trail
//!
//! Every evaluation outcome is published on a tokio broadcast bus. When an
//! audit log is configured, events are also appended to it as JSON lines
//! so an incident can be reconstructed afterwards.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;
use tracing::{debug, warn};
use uuid::Uuid;

use safety_evaluator::{EscalationAction, GeoPosition, RiskLevel};

/// Channel capacity for broadcast
const CHANNEL_CAPACITY: usize = 256;

/// Error type for event bus operations
#[derive(Debug, thiserror::Error)]
pub enum EventBusError {
    #[error("Failed to serialize event: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Failed to persist event: {0}")]
    PersistFailed(#[from] std::io::Error),

    #[error("Audit log lock poisoned")]
    Poisoned,
}

/// Result type for event bus operations
pub type EventBusResult<T> = Result<T, EventBusError>;

/// Shared reference to EventBus
pub type SharedEventBus = Arc<EventBus>;

/// Everything the service records about a subject
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SafetyEvent {
    /// Snapshot refused before it reached the escalation state
    SnapshotRejected {
        subject_id: String,
        reason: String,
        timestamp: DateTime<Utc>,
    },

    /// Evaluation completed without raising a trigger
    Evaluated {
        subject_id: String,
        score: f64,
        level: RiskLevel,
        confidence: f64,
        action: EscalationAction,
        factors: Vec<String>,
        timestamp: DateTime<Utc>,
    },

    AutoTriggered {
        subject_id: String,
        trigger_id: Uuid,
        score: f64,
        factors: Vec<String>,
        confirm_deadline: DateTime<Utc>,
        timestamp: DateTime<Utc>,
    },

    TriggerCancelled {
        subject_id: String,
        trigger_id: Uuid,
        timestamp: DateTime<Utc>,
    },

    TriggerFinalized {
        subject_id: String,
        trigger_id: Uuid,
        timestamp: DateTime<Utc>,
    },

    PanicRaised {
        subject_id: String,
        position: Option<GeoPosition>,
        timestamp: DateTime<Utc>,
    },
}

impl SafetyEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::SnapshotRejected { .. } => "snapshot_rejected",
            Self::Evaluated { .. } => "evaluated",
            Self::AutoTriggered { .. } => "auto_triggered",
            Self::TriggerCancelled { .. } => "trigger_cancelled",
            Self::TriggerFinalized { .. } => "trigger_finalized",
            Self::PanicRaised { .. } => "panic_raised",
        }
    }

    pub fn subject_id(&self) -> &str {
        match self {
            Self::SnapshotRejected { subject_id, .. }
            | Self::Evaluated { subject_id, .. }
            | Self::AutoTriggered { subject_id, .. }
            | Self::TriggerCancelled { subject_id, .. }
            | Self::TriggerFinalized { subject_id, .. }
            | Self::PanicRaised { subject_id, .. } => subject_id,
        }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            Self::SnapshotRejected { timestamp, .. }
            | Self::Evaluated { timestamp, .. }
            | Self::AutoTriggered { timestamp, .. }
            | Self::TriggerCancelled { timestamp, .. }
            | Self::TriggerFinalized { timestamp, .. }
            | Self::PanicRaised { timestamp, .. } => *timestamp,
        }
    }
}

/// Append-only JSON-lines audit file
#[derive(Debug)]
pub struct AuditLog {
    path: PathBuf,
    // Serializes appends from concurrent publishers
    lock: Mutex<()>,
}

impl AuditLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(&self, event: &SafetyEvent) -> EventBusResult<()> {
        let line = serde_json::to_string(event)?;
        let _guard = self.lock.lock().map_err(|_| EventBusError::Poisoned)?;
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        writeln!(file, "{line}")?;
        Ok(())
    }

    /// Read back every event in the file; malformed lines are skipped
    pub fn read_all(path: &Path) -> EventBusResult<Vec<SafetyEvent>> {
        let file = std::fs::File::open(path)?;
        let mut events = Vec::new();
        for (idx, line) in BufReader::new(file).lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str(&line) {
                Ok(event) => events.push(event),
                Err(e) => warn!(line = idx + 1, "Skipping malformed audit entry: {e}"),
            }
        }
        Ok(events)
    }
}

/// Event bus with broadcast channels and optional audit persistence
pub struct EventBus {
    sender: broadcast::Sender<SafetyEvent>,
    audit: Option<AuditLog>,
}

impl EventBus {
    /// Create a new event bus without persistence
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            sender,
            audit: None,
        }
    }

    /// Create an event bus that appends every event to `audit`
    pub fn with_audit_log(audit: AuditLog) -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            sender,
            audit: Some(audit),
        }
    }

    pub fn shared(self) -> SharedEventBus {
        Arc::new(self)
    }

    /// Publish an event to all subscribers.
    ///
    /// A persistence failure is returned, but the event is still broadcast.
    pub fn publish(&self, event: SafetyEvent) -> EventBusResult<()> {
        let event_type = event.event_type();
        let persisted = match &self.audit {
            Some(audit) => audit.append(&event).map_err(|e| {
                warn!(event_type, "Failed to persist event: {e}");
                e
            }),
            None => Ok(()),
        };

        match self.sender.send(event) {
            Ok(count) => debug!(event_type, receivers = count, "Event published"),
            Err(_) => debug!(event_type, "Event published (no receivers)"),
        }
        persisted
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SafetyEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
