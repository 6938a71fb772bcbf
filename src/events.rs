//! Structured event log
//!
//! Append-only JSONL records for every transition, order action,
//! anomaly and invariant violation. This file is the sole contract
//! consumed by monitoring; every record is also mirrored to tracing.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;
use tracing::{debug, error, info, warn};

use crate::types::{CanonicalInstrument, ExecutionInstrument};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    EngineStarted,
    EngineShutdown,
    StateTransition,
    StandDown,
    HydrationRequested,
    HydrationCompleted,
    HydrationFailed,
    RangeLocked,
    BreakoutDetected,
    EntrySubmitted,
    EntryFilled,
    StopSubmitted,
    BreakEvenTriggered,
    StopModified,
    StopRetry,
    VisibilityAlert,
    IntentClosed,
    Flattened,
    FlattenFillConfirmed,
    BarAgeAnomaly,
    ContractViolation,
    InvariantViolation,
    AdapterError,
}

impl EventType {
    /// Tracing level for the mirror line.
    fn severity(self) -> Severity {
        match self {
            Self::ContractViolation | Self::InvariantViolation => Severity::Critical,
            Self::HydrationFailed
            | Self::VisibilityAlert
            | Self::BarAgeAnomaly
            | Self::AdapterError => Severity::Warn,
            Self::StopRetry => Severity::Debug,
            _ => Severity::Info,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Severity {
    Debug,
    Info,
    Warn,
    Critical,
}

/// One monitoring record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventRecord {
    pub timestamp_utc: DateTime<Utc>,
    pub event_type: EventType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub canonical_instrument: Option<CanonicalInstrument>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub execution_instrument: Option<ExecutionInstrument>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stream_id: Option<String>,
    pub payload: serde_json::Value,
}

impl EventRecord {
    pub fn new(event_type: EventType, timestamp_utc: DateTime<Utc>) -> Self {
        Self {
            timestamp_utc,
            event_type,
            canonical_instrument: None,
            execution_instrument: None,
            stream_id: None,
            payload: serde_json::Value::Null,
        }
    }

    pub fn stream(
        mut self,
        stream_id: &str,
        canonical: &CanonicalInstrument,
        execution: &ExecutionInstrument,
    ) -> Self {
        self.stream_id = Some(stream_id.to_string());
        self.canonical_instrument = Some(canonical.clone());
        self.execution_instrument = Some(execution.clone());
        self
    }

    pub fn payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }
}

/// Appending writer for the event log. With no file configured, records
/// only go to tracing (tests, ad hoc runs).
pub struct EventLog {
    writer: Option<BufWriter<File>>,
}

impl EventLog {
    pub fn open(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("opening event log {}", path.display()))?;
        Ok(Self {
            writer: Some(BufWriter::new(file)),
        })
    }

    pub fn tracing_only() -> Self {
        Self { writer: None }
    }

    /// Append one record. Write failures are reported but never
    /// propagated: a monitoring outage must not take down the lane.
    pub fn emit(&mut self, record: EventRecord) {
        self.mirror(&record);
        if let Some(writer) = &mut self.writer {
            let result = serde_json::to_string(&record)
                .map_err(anyhow::Error::from)
                .and_then(|line| {
                    writeln!(writer, "{}", line)?;
                    writer.flush()?;
                    Ok(())
                });
            if let Err(e) = result {
                error!("event log write failed: {}", e);
            }
        }
    }

    fn mirror(&self, record: &EventRecord) {
        let stream = record.stream_id.as_deref().unwrap_or("-");
        match record.event_type.severity() {
            Severity::Debug => debug!(
                "{:?} [{}] {}",
                record.event_type, stream, record.payload
            ),
            Severity::Info => info!(
                "{:?} [{}] {}",
                record.event_type, stream, record.payload
            ),
            Severity::Warn => warn!(
                "{:?} [{}] {}",
                record.event_type, stream, record.payload
            ),
            Severity::Critical => error!(
                "CRITICAL {:?} [{}] {}",
                record.event_type, stream, record.payload
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn records_append_as_jsonl() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.jsonl");
        let mut log = EventLog::open(&path).unwrap();

        let now = Utc::now();
        log.emit(EventRecord::new(EventType::EngineStarted, now));
        log.emit(
            EventRecord::new(EventType::RangeLocked, now)
                .payload(json!({"high": 4010.0, "low": 4000.0})),
        );

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<_> = contents.lines().collect();
        assert_eq!(lines.len(), 2);

        let parsed: EventRecord = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(parsed.event_type, EventType::RangeLocked);
        assert_eq!(parsed.payload["high"], 4010.0);
    }

    #[test]
    fn reopen_appends_rather_than_truncates() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.jsonl");

        EventLog::open(&path)
            .unwrap()
            .emit(EventRecord::new(EventType::EngineStarted, Utc::now()));
        EventLog::open(&path)
            .unwrap()
            .emit(EventRecord::new(EventType::EngineShutdown, Utc::now()));

        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents.lines().count(), 2);
    }
}
