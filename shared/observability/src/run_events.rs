//! Structured events for connector runs.
//!
//! Every run produces a `run_started` record followed by either
//! `run_completed` or `run_failed`, all under the `run_event` target so they
//! can be filtered out of the regular log stream.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    Success,
    Failure,
    Skipped,
}

impl std::fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Success => write!(f, "success"),
            Self::Failure => write!(f, "failure"),
            Self::Skipped => write!(f, "skipped"),
        }
    }
}

/// Counters gathered while a run consumes its event stream
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RunCounters {
    pub seen: usize,
    pub changed: usize,
    pub failed: usize,
    pub archived: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunEvent {
    pub timestamp: DateTime<Utc>,
    pub event_type: String,
    pub connector_id: i64,
    pub source: String,
    pub outcome: RunOutcome,
    pub duration_ms: Option<u64>,
    pub counters: Option<RunCounters>,
    pub error: Option<String>,
}

impl RunEvent {
    pub fn new(event_type: impl Into<String>, connector_id: i64, source: impl Into<String>) -> RunEventBuilder {
        RunEventBuilder {
            event: RunEvent {
                timestamp: Utc::now(),
                event_type: event_type.into(),
                connector_id,
                source: source.into(),
                outcome: RunOutcome::Success,
                duration_ms: None,
                counters: None,
                error: None,
            },
        }
    }
}

pub struct RunEventBuilder {
    event: RunEvent,
}

impl RunEventBuilder {
    pub fn failure(mut self, error: impl Into<String>) -> Self {
        self.event.outcome = RunOutcome::Failure;
        self.event.error = Some(error.into());
        self
    }

    pub fn skipped(mut self) -> Self {
        self.event.outcome = RunOutcome::Skipped;
        self
    }

    pub fn duration_ms(mut self, ms: u64) -> Self {
        self.event.duration_ms = Some(ms);
        self
    }

    pub fn counters(mut self, counters: RunCounters) -> Self {
        self.event.counters = Some(counters);
        self
    }

    pub fn build(self) -> RunEvent {
        self.event
    }

    pub fn emit(self) {
        let event = self.build();
        let json = serde_json::to_string(&event).unwrap_or_else(|_| "{}".to_string());

        match event.outcome {
            RunOutcome::Success => tracing::info!(
                target: "run_event",
                connector_id = event.connector_id,
                event_type = %event.event_type,
                result = "success",
                "RunEvent: {}", json
            ),
            RunOutcome::Failure => tracing::error!(
                target: "run_event",
                connector_id = event.connector_id,
                event_type = %event.event_type,
                result = "failure",
                error = ?event.error,
                "RunEvent: {}", json
            ),
            RunOutcome::Skipped => tracing::debug!(
                target: "run_event",
                connector_id = event.connector_id,
                event_type = %event.event_type,
                result = "skipped",
                "RunEvent: {}", json
            ),
        }
    }
}

// ============================================================================
// Convenience functions for run lifecycle events
// ============================================================================

pub fn log_run_started(connector_id: i64, source: &str) {
    RunEvent::new("run_started", connector_id, source).emit();
}

pub fn log_run_completed(connector_id: i64, source: &str, counters: RunCounters, duration_ms: u64) {
    RunEvent::new("run_completed", connector_id, source)
        .counters(counters)
        .duration_ms(duration_ms)
        .emit();
}

pub fn log_run_failed(connector_id: i64, source: &str, error: &str, counters: RunCounters, duration_ms: u64) {
    RunEvent::new("run_failed", connector_id, source)
        .failure(error)
        .counters(counters)
        .duration_ms(duration_ms)
        .emit();
}

/// A run that never got to execute its connector
pub fn log_run_rejected(connector_id: i64, source: &str, reason: &str) {
    RunEvent::new("run_rejected", connector_id, source)
        .failure(reason)
        .emit();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_records_failure() {
        let event = RunEvent::new("run_failed", 7, "web")
            .failure("blob upload failed")
            .counters(RunCounters {
                changed: 2,
                failed: 1,
                ..Default::default()
            })
            .build();

        assert_eq!(event.outcome, RunOutcome::Failure);
        assert_eq!(event.error.as_deref(), Some("blob upload failed"));
        assert_eq!(event.counters.unwrap().failed, 1);
    }

    #[test]
    fn test_outcome_serializes_snake_case() {
        let json = serde_json::to_value(RunEvent::new("run_started", 1, "file").skipped().build()).unwrap();
        assert_eq!(json["outcome"], "skipped");
        assert_eq!(RunOutcome::Failure.to_string(), "failure");
    }
}
