//! JSON-lines replay of recorded location feeds
//!
//! Each input line is `{"subject_id": ..., "snapshot": {...}}`. Every record
//! produces one output line: the decision, or `{subject_id, error}` when the
//! snapshot was not evaluated. A final sweep finalizes confirmation windows
//! that closed by the last evaluation time.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use safety_evaluator::SignalSnapshot;
use serde::Deserialize;
use std::io::{BufRead, Write};
use tracing::{info, warn};

use crate::service::SentinelService;

#[derive(Debug, Clone, Deserialize)]
pub struct ReplayRecord {
    pub subject_id: String,
    pub snapshot: SignalSnapshot,
}

/// Which clock a replayed record is evaluated against
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplayClock {
    WallClock,
    /// Evaluate each record at its own snapshot timestamp
    SnapshotTime,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplaySummary {
    pub accepted: usize,
    pub rejected: usize,
    pub finalized: usize,
}

pub async fn run<R, W>(
    service: &SentinelService,
    reader: R,
    mut out: W,
    clock: ReplayClock,
) -> Result<ReplaySummary>
where
    R: BufRead,
    W: Write,
{
    let mut summary = ReplaySummary::default();
    let mut last_now: Option<DateTime<Utc>> = None;

    for (idx, line) in reader.lines().enumerate() {
        let line = line.with_context(|| format!("Failed to read line {}", idx + 1))?;
        if line.trim().is_empty() {
            continue;
        }
        let record: ReplayRecord = serde_json::from_str(&line)
            .with_context(|| format!("Malformed replay record on line {}", idx + 1))?;
        let now = match clock {
            ReplayClock::SnapshotTime => record.snapshot.timestamp,
            ReplayClock::WallClock => Utc::now(),
        };
        last_now = Some(last_now.map_or(now, |prev| prev.max(now)));

        match service.submit(&record.subject_id, record.snapshot, now).await {
            Ok(outcome) => {
                summary.accepted += 1;
                writeln!(out, "{}", serde_json::to_string(&outcome.decision)?)?;
            }
            Err(e) => {
                summary.rejected += 1;
                warn!(line = idx + 1, subject_id = %record.subject_id, "Record not evaluated: {e}");
                let error = serde_json::json!({
                    "subject_id": record.subject_id,
                    "error": e.to_string(),
                });
                writeln!(out, "{error}")?;
            }
        }
    }

    if let Some(now) = last_now {
        summary.finalized = service.finalize_expired(now).await?.len();
    }
    out.flush()?;
    info!(
        accepted = summary.accepted,
        rejected = summary.rejected,
        finalized = summary.finalized,
        "Replay complete"
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SentinelConfig;
    use chrono::Duration;
    use safety_evaluator::{GeoPosition, MovementDescriptor, MovementState};
    use serde_json::Value;
    use std::io::Cursor;

    fn line(subject: &str, snapshot: &SignalSnapshot) -> String {
        serde_json::json!({ "subject_id": subject, "snapshot": snapshot }).to_string()
    }

    fn stopped_in_zone(ts: DateTime<Utc>) -> SignalSnapshot {
        SignalSnapshot::at(ts, GeoPosition::new(15.2993, 74.1240, 6.0))
            .with_movement(MovementDescriptor::with_state(MovementState::Stopped))
            .with_restricted_zone(true)
            .with_last_check_in(ts - Duration::hours(6))
    }

    fn service() -> SentinelService {
        SentinelService::from_config(&SentinelConfig::default()).unwrap()
    }

    async fn replay(input: String) -> (Result<ReplaySummary>, Vec<Value>) {
        let mut out = Vec::new();
        let result = run(&service(), Cursor::new(input), &mut out, ReplayClock::SnapshotTime).await;
        let lines = String::from_utf8(out)
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        (result, lines)
    }

    #[tokio::test]
    async fn test_replay_at_snapshot_time_triggers_and_sweeps() {
        let t0: DateTime<Utc> = "2026-03-01T01:20:00Z".parse().unwrap();
        let input = [
            line("t-1", &stopped_in_zone(t0)),
            String::new(),
            line("t-1", &stopped_in_zone(t0 + Duration::minutes(20))),
            line("t-1", &stopped_in_zone(t0 + Duration::minutes(40))),
            // Later traffic from another subject moves the clock past the window
            line("t-2", &stopped_in_zone(t0 + Duration::minutes(45))),
        ]
        .join("\n");

        let (summary, lines) = replay(input).await;
        let summary = summary.unwrap();
        assert_eq!(
            summary,
            ReplaySummary {
                accepted: 4,
                rejected: 0,
                finalized: 1
            }
        );
        let actions: Vec<&str> = lines.iter().map(|l| l["action"].as_str().unwrap()).collect();
        assert_eq!(actions, vec!["none", "none", "auto_trigger", "none"]);
        assert_eq!(lines[2]["subject_id"], "t-1");
    }

    #[tokio::test]
    async fn test_rejected_record_is_reported_inline() {
        let t0: DateTime<Utc> = "2026-03-01T12:00:00Z".parse().unwrap();
        let mut bad = stopped_in_zone(t0);
        bad.position = None;
        let input = [line("t-1", &bad), line("t-2", &stopped_in_zone(t0))].join("\n");

        let (summary, lines) = replay(input).await;
        let summary = summary.unwrap();
        assert_eq!(summary.accepted, 1);
        assert_eq!(summary.rejected, 1);
        assert_eq!(lines[0]["subject_id"], "t-1");
        assert!(lines[0]["error"].as_str().unwrap().contains("coordinates"));
        assert_eq!(lines[1]["action"], "none");
    }

    #[tokio::test]
    async fn test_malformed_line_names_its_position() {
        let t0: DateTime<Utc> = "2026-03-01T12:00:00Z".parse().unwrap();
        let input = [line("t-1", &stopped_in_zone(t0)), "{not json".to_string()].join("\n");

        let (result, lines) = replay(input).await;
        let err = result.unwrap_err();
        assert!(err.to_string().contains("line 2"), "{err}");
        assert_eq!(lines.len(), 1);
    }

    #[tokio::test]
    async fn test_empty_input() {
        let (summary, lines) = replay(String::new()).await;
        assert_eq!(summary.unwrap(), ReplaySummary::default());
        assert!(lines.is_empty());
    }
}
