//! Sentinel: tourist-safety monitoring service
//!
//! Hosts the [`safety_evaluator`] escalation engine behind location
//! ingestion, restricted-zone geofencing, notification delivery, a panic
//! button and a JSON-lines audit trail.

pub mod config;
pub mod events;
pub mod geofence;
pub mod ingestion;
pub mod notify;
pub mod replay;
pub mod service;

pub use config::{IngestionConfig, NotifyConfig, SentinelConfig};
pub use events::{AuditLog, EventBus, EventBusError, SafetyEvent, SharedEventBus};
pub use geofence::{GeofenceSet, RestrictedZone, ZoneShape};
pub use ingestion::{IngestError, IngestOutcome, IngestResult, LocationIngestor};
pub use notify::{
    ChannelSink, LogSink, Notification, NotificationKind, NotificationSink, SinkError, WebhookSink,
};
pub use replay::{ReplayClock, ReplayRecord, ReplaySummary};
pub use service::{spawn_finalizer, SentinelService, ServiceError, ServiceResult};
