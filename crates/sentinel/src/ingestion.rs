//! Location ingestion
//!
//! Rate-limits incoming snapshots per subject, fills the restricted-zone flag
//! from the configured geofence and keeps the bounded history handed to the
//! evaluator.

use chrono::{DateTime, Utc};
use safety_evaluator::{
    EscalationDecision, EscalationEvaluator, EvaluatorError, SignalSnapshot,
};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use tracing::debug;

use crate::config::IngestionConfig;
use crate::geofence::GeofenceSet;

#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("snapshot for {subject_id} arrived too soon, retry in {retry_after_secs}s")]
    TooFrequent {
        subject_id: String,
        retry_after_secs: u64,
    },

    #[error(transparent)]
    Evaluation(#[from] EvaluatorError),

    #[error("ingestion state for {subject_id} is poisoned")]
    Poisoned { subject_id: String },
}

pub type IngestResult<T> = Result<T, IngestError>;

/// Result of one accepted snapshot
#[derive(Debug, Clone)]
pub struct IngestOutcome {
    /// Snapshot as evaluated, with the zone flag filled in
    pub snapshot: SignalSnapshot,
    /// Ids of the zones the position falls in
    pub zone_ids: Vec<String>,
    pub decision: EscalationDecision,
}

#[derive(Debug, Default)]
struct Track {
    history: VecDeque<SignalSnapshot>,
    last_accepted: Option<DateTime<Utc>>,
}

pub struct LocationIngestor {
    evaluator: Arc<EscalationEvaluator>,
    geofence: GeofenceSet,
    config: IngestionConfig,
    tracks: Mutex<HashMap<String, Arc<Mutex<Track>>>>,
}

impl LocationIngestor {
    pub fn new(
        evaluator: Arc<EscalationEvaluator>,
        geofence: GeofenceSet,
        config: IngestionConfig,
    ) -> Self {
        Self {
            evaluator,
            geofence,
            config,
            tracks: Mutex::new(HashMap::new()),
        }
    }

    pub fn evaluator(&self) -> &Arc<EscalationEvaluator> {
        &self.evaluator
    }

    fn track(&self, subject_id: &str) -> IngestResult<Arc<Mutex<Track>>> {
        let mut tracks = self.tracks.lock().map_err(|_| IngestError::Poisoned {
            subject_id: subject_id.to_string(),
        })?;
        Ok(Arc::clone(tracks.entry(subject_id.to_string()).or_default()))
    }

    /// Accept one snapshot and evaluate it against the subject's history.
    ///
    /// Snapshot timestamps drive the rate limit, so replayed feeds behave
    /// the same as live ones.
    pub fn ingest(
        &self,
        subject_id: &str,
        mut snapshot: SignalSnapshot,
        now: DateTime<Utc>,
    ) -> IngestResult<IngestOutcome> {
        let track = self.track(subject_id)?;
        let mut track = track.lock().map_err(|_| IngestError::Poisoned {
            subject_id: subject_id.to_string(),
        })?;

        if let Some(last) = track.last_accepted {
            let min_gap = self.config.min_interval_secs as i64;
            let elapsed = (snapshot.timestamp - last).num_seconds();
            if elapsed < min_gap {
                return Err(IngestError::TooFrequent {
                    subject_id: subject_id.to_string(),
                    retry_after_secs: (min_gap - elapsed).max(0) as u64,
                });
            }
        }

        let mut zone_ids = Vec::new();
        if let Some(position) = snapshot.position {
            zone_ids = self
                .geofence
                .violations(&position)
                .into_iter()
                .map(|z| z.id.clone())
                .collect();
            if snapshot.in_restricted_zone.is_none() && !self.geofence.is_empty() {
                snapshot.in_restricted_zone = Some(!zone_ids.is_empty());
            }
        }

        let history: Vec<SignalSnapshot> = track.history.iter().cloned().collect();
        let decision = self
            .evaluator
            .evaluate_at(subject_id, &snapshot, &history, now)?;

        track.last_accepted = Some(snapshot.timestamp);
        track.history.push_back(snapshot.clone());
        while track.history.len() > self.config.history_len {
            track.history.pop_front();
        }
        debug!(
            subject_id,
            history = track.history.len(),
            zones = zone_ids.len(),
            "Snapshot accepted"
        );

        Ok(IngestOutcome {
            snapshot,
            zone_ids,
            decision,
        })
    }

    /// Drop a subject's history and rate-limit slot
    pub fn forget(&self, subject_id: &str) -> IngestResult<bool> {
        let mut tracks = self.tracks.lock().map_err(|_| IngestError::Poisoned {
            subject_id: subject_id.to_string(),
        })?;
        Ok(tracks.remove(subject_id).is_some())
    }

    pub fn history_len(&self, subject_id: &str) -> IngestResult<usize> {
        let tracks = self.tracks.lock().map_err(|_| IngestError::Poisoned {
            subject_id: subject_id.to_string(),
        })?;
        match tracks.get(subject_id) {
            Some(track) => {
                let track = track.lock().map_err(|_| IngestError::Poisoned {
                    subject_id: subject_id.to_string(),
                })?;
                Ok(track.history.len())
            }
            None => Ok(0),
        }
    }
}
