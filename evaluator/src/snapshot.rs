//! Signal snapshots: one sampled observation of a subject
//!
//! Snapshots are produced by the location-ingestion collaborator and are
//! immutable once recorded. Optional fields model inputs the device or the
//! ingestion pipeline could not supply; each missing input removes one
//! sub-score from the assessment and lowers its confidence.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::EvaluatorConfig;
use crate::error::{EvaluatorError, EvaluatorResult};

/// WGS84 fix with horizontal accuracy radius
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPosition {
    pub latitude: f64,
    pub longitude: f64,
    /// Horizontal accuracy in meters
    pub accuracy_m: f64,
}

impl GeoPosition {
    pub fn new(latitude: f64, longitude: f64, accuracy_m: f64) -> Self {
        Self {
            latitude,
            longitude,
            accuracy_m,
        }
    }

    fn validate(&self) -> EvaluatorResult<()> {
        if !self.latitude.is_finite() || !(-90.0..=90.0).contains(&self.latitude) {
            return Err(EvaluatorError::invalid(format!(
                "latitude {} is not a valid WGS84 latitude",
                self.latitude
            )));
        }
        if !self.longitude.is_finite() || !(-180.0..=180.0).contains(&self.longitude) {
            return Err(EvaluatorError::invalid(format!(
                "longitude {} is not a valid WGS84 longitude",
                self.longitude
            )));
        }
        if !self.accuracy_m.is_finite() || self.accuracy_m < 0.0 {
            return Err(EvaluatorError::invalid(format!(
                "accuracy {} must be a finite, non-negative radius",
                self.accuracy_m
            )));
        }
        Ok(())
    }
}

/// Coarse movement classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MovementState {
    Stopped,
    Moving,
    /// Rapid heading or speed changes inconsistent with walking
    Erratic,
}

impl std::fmt::Display for MovementState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Stopped => write!(f, "stopped"),
            Self::Moving => write!(f, "moving"),
            Self::Erratic => write!(f, "erratic"),
        }
    }
}

/// Movement descriptor attached to a snapshot
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct MovementDescriptor {
    /// Classified state, when the device reports one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<MovementState>,
    /// Ground speed in meters per second
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speed_mps: Option<f64>,
    /// Heading in degrees clockwise from true north
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub heading_deg: Option<f64>,
}

impl MovementDescriptor {
    pub fn with_state(state: MovementState) -> Self {
        Self {
            state: Some(state),
            ..Default::default()
        }
    }

    pub fn with_speed(speed_mps: f64) -> Self {
        Self {
            speed_mps: Some(speed_mps),
            ..Default::default()
        }
    }

    /// Effective state: the reported one, else derived from speed.
    ///
    /// Returns `None` when neither a state nor a speed is available.
    pub fn resolved_state(&self, stop_speed_mps: f64) -> Option<MovementState> {
        self.state.or_else(|| {
            self.speed_mps.map(|speed| {
                if speed < stop_speed_mps {
                    MovementState::Stopped
                } else {
                    MovementState::Moving
                }
            })
        })
    }

    fn validate(&self) -> EvaluatorResult<()> {
        if let Some(speed) = self.speed_mps {
            if !speed.is_finite() || speed < 0.0 {
                return Err(EvaluatorError::invalid(format!(
                    "speed {speed} must be finite and non-negative"
                )));
            }
        }
        if let Some(heading) = self.heading_deg {
            if !heading.is_finite() {
                return Err(EvaluatorError::invalid(format!(
                    "heading {heading} must be finite"
                )));
            }
        }
        Ok(())
    }
}

/// Point-in-time bundle of signals for one subject
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalSnapshot {
    /// When the observation was taken
    pub timestamp: DateTime<Utc>,
    /// Location fix; a snapshot without one is malformed
    pub position: Option<GeoPosition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub movement: Option<MovementDescriptor>,
    /// Whether the fix lies inside a designated restricted zone, if known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub in_restricted_zone: Option<bool>,
    /// Last time the subject confirmed they were safe
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_check_in: Option<DateTime<Utc>>,
}

impl SignalSnapshot {
    /// Snapshot carrying only a timestamp and a position
    pub fn at(timestamp: DateTime<Utc>, position: GeoPosition) -> Self {
        Self {
            timestamp,
            position: Some(position),
            movement: None,
            in_restricted_zone: None,
            last_check_in: None,
        }
    }

    pub fn with_movement(mut self, movement: MovementDescriptor) -> Self {
        self.movement = Some(movement);
        self
    }

    pub fn with_restricted_zone(mut self, inside: bool) -> Self {
        self.in_restricted_zone = Some(inside);
        self
    }

    pub fn with_last_check_in(mut self, at: DateTime<Utc>) -> Self {
        self.last_check_in = Some(at);
        self
    }

    /// Structural checks that do not depend on the clock
    pub fn validate_shape(&self) -> EvaluatorResult<()> {
        let position = self
            .position
            .as_ref()
            .ok_or_else(|| EvaluatorError::invalid("snapshot has no coordinates"))?;
        position.validate()?;
        if let Some(movement) = &self.movement {
            movement.validate()?;
        }
        Ok(())
    }

    /// Full admission check against the evaluation clock.
    ///
    /// Malformed input is reported before staleness so a caller never
    /// re-ingests a snapshot that could not be accepted anyway.
    pub fn validate(&self, now: DateTime<Utc>, config: &EvaluatorConfig) -> EvaluatorResult<()> {
        self.validate_shape()?;

        let age = now.signed_duration_since(self.timestamp);
        if -age > config.max_clock_skew() {
            return Err(EvaluatorError::invalid(format!(
                "timestamp {} is {}s ahead of the evaluation clock",
                self.timestamp,
                (-age).num_seconds()
            )));
        }
        if age > config.staleness_bound() {
            return Err(EvaluatorError::stale(
                self.timestamp,
                age,
                config.staleness_bound(),
            ));
        }
        Ok(())
    }
}
