//! Safety Evaluator Library
//!
//! Risk-triggered emergency escalation for tracked subjects (tourists):
//!
//! - Scores a [`SignalSnapshot`] plus recent history into a [`RiskAssessment`]
//!   from movement, environmental and temporal sub-scores
//! - Gates escalation on input confidence, so partial data never auto-triggers
//! - Enforces a per-subject cooldown between auto-triggers
//! - Tracks a confirmation window during which the subject may cancel
//!
//! The evaluator is synchronous and performs no I/O. Notification delivery,
//! location ingestion and persistence belong to the hosting service.
//!
//! # Usage
//!
//! ```
//! use chrono::{Duration, Utc};
//! use safety_evaluator::{
//!     EscalationAction, EscalationEvaluator, GeoPosition, MovementDescriptor, MovementState,
//!     SignalSnapshot,
//! };
//!
//! let evaluator = EscalationEvaluator::new();
//! let now = Utc::now();
//! let snapshot = SignalSnapshot::at(now, GeoPosition::new(15.49, 73.82, 12.0))
//!     .with_movement(MovementDescriptor::with_state(MovementState::Moving))
//!     .with_restricted_zone(false)
//!     .with_last_check_in(now - Duration::minutes(10));
//!
//! let decision = evaluator.evaluate_at("tourist-42", &snapshot, &[], now).unwrap();
//! assert_ne!(decision.action, EscalationAction::AutoTrigger);
//! ```

pub mod assessment;
pub mod config;
pub mod engine;
pub mod error;
pub mod scoring;
pub mod snapshot;
pub mod state;

pub use assessment::{RiskAssessment, RiskFactor, RiskLevel, SignalKind, SubScore, SubScores};
pub use config::{
    CheckInConfig, EnvironmentConfig, EvaluatorConfig, LevelBreakpoints, MovementConfig,
    SubScoreWeights,
};
pub use engine::{
    CancellationOutcome, EscalationAction, EscalationDecision, EscalationEvaluator,
    FinalizedTrigger,
};
pub use error::{ConfigError, EvaluatorError, EvaluatorResult};
pub use snapshot::{GeoPosition, MovementDescriptor, MovementState, SignalSnapshot};
pub use state::{EscalationState, SubjectId, TriggerId, TriggerRecord, TriggerStatus};
