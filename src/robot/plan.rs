//! Execution plan (timetable)
//!
//! External input written once per trading date by the sequencer. Read
//! once at start-of-day; never written by the core. Missing or
//! malformed plan data is a hard fail-closed startup error; nothing
//! is inferred or repaired.

use anyhow::{bail, Context, Result};
use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

use crate::config::RobotConfig;
use crate::types::{CanonicalInstrument, SessionId};

/// One stream's slot assignment for the day.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanEntry {
    pub stream_id: String,
    pub canonical_instrument: CanonicalInstrument,
    pub session: SessionId,
    pub slot_time: NaiveTime,
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_reason: Option<String>,
}

/// The full timetable for one trading date.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionPlan {
    pub trading_date: NaiveDate,
    pub streams: Vec<PlanEntry>,
}

impl ExecutionPlan {
    pub fn load(path: &Path, expected_date: NaiveDate, config: &RobotConfig) -> Result<Self> {
        let raw = std::fs::read(path)
            .with_context(|| format!("reading execution plan {}", path.display()))?;
        let plan: ExecutionPlan = serde_json::from_slice(&raw)
            .with_context(|| format!("parsing execution plan {}", path.display()))?;
        plan.validate(expected_date, config)?;
        Ok(plan)
    }

    /// Fail-closed validation against the engine's configuration.
    pub fn validate(&self, expected_date: NaiveDate, config: &RobotConfig) -> Result<()> {
        if self.trading_date != expected_date {
            bail!(
                "plan is for {}, engine trading date is {}",
                self.trading_date,
                expected_date
            );
        }
        if self.streams.is_empty() {
            bail!("plan contains no streams");
        }

        let mut seen_ids = HashSet::new();
        let mut seen_keys = HashSet::new();
        for entry in &self.streams {
            if entry.stream_id.is_empty() {
                bail!("plan entry with empty stream_id");
            }
            if !seen_ids.insert(entry.stream_id.clone()) {
                bail!("duplicate stream_id {}", entry.stream_id);
            }
            let key = (entry.canonical_instrument.clone(), entry.session.clone());
            if !seen_keys.insert(key) {
                bail!(
                    "duplicate (instrument, session) pair {}/{}",
                    entry.canonical_instrument,
                    entry.session
                );
            }
            if config.instrument(&entry.canonical_instrument).is_none() {
                bail!(
                    "{}: unknown instrument {}",
                    entry.stream_id,
                    entry.canonical_instrument
                );
            }
            let Some(session) = config.session(&entry.session) else {
                bail!("{}: unknown session {}", entry.stream_id, entry.session);
            };
            if entry.enabled
                && (entry.slot_time <= session.range_start
                    || entry.slot_time >= session.close_cutoff)
            {
                bail!(
                    "{}: slot {} outside session window {}..{}",
                    entry.stream_id,
                    entry.slot_time,
                    session.range_start,
                    session.close_cutoff
                );
            }
            if !entry.enabled && entry.block_reason.is_none() {
                bail!("{}: disabled without a block_reason", entry.stream_id);
            }
        }
        Ok(())
    }

    pub fn enabled_streams(&self) -> impl Iterator<Item = &PlanEntry> {
        self.streams.iter().filter(|e| e.enabled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plan_date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 3, 2).unwrap()
    }

    fn valid_plan() -> ExecutionPlan {
        ExecutionPlan {
            trading_date: plan_date(),
            streams: vec![PlanEntry {
                stream_id: "NQ/US_OPEN".to_string(),
                canonical_instrument: CanonicalInstrument("NQ".to_string()),
                session: SessionId("US_OPEN".to_string()),
                slot_time: NaiveTime::from_hms_opt(7, 30, 0).unwrap(),
                enabled: true,
                block_reason: None,
            }],
        }
    }

    #[test]
    fn valid_plan_passes() {
        valid_plan().validate(plan_date(), &RobotConfig::default()).unwrap();
    }

    #[test]
    fn wrong_date_fails_closed() {
        let plan = valid_plan();
        let other = NaiveDate::from_ymd_opt(2026, 3, 3).unwrap();
        assert!(plan.validate(other, &RobotConfig::default()).is_err());
    }

    #[test]
    fn unknown_instrument_fails_closed() {
        let mut plan = valid_plan();
        plan.streams[0].canonical_instrument = CanonicalInstrument("ZB".to_string());
        assert!(plan.validate(plan_date(), &RobotConfig::default()).is_err());
    }

    #[test]
    fn slot_outside_session_fails_closed() {
        let mut plan = valid_plan();
        plan.streams[0].slot_time = NaiveTime::from_hms_opt(23, 0, 0).unwrap();
        assert!(plan.validate(plan_date(), &RobotConfig::default()).is_err());
    }

    #[test]
    fn disabled_needs_block_reason() {
        let mut plan = valid_plan();
        plan.streams[0].enabled = false;
        assert!(plan.validate(plan_date(), &RobotConfig::default()).is_err());

        plan.streams[0].block_reason = Some("insufficient history".to_string());
        plan.validate(plan_date(), &RobotConfig::default()).unwrap();
    }

    #[test]
    fn malformed_file_fails_closed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plan.json");
        std::fs::write(&path, "{not json").unwrap();
        assert!(ExecutionPlan::load(&path, plan_date(), &RobotConfig::default()).is_err());
    }
}
