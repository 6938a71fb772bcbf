//! Configuration for the robot engine
//!
//! Loaded once at start-of-day from a JSON file. Instrument and session
//! definitions are static for the process lifetime; the per-day slot
//! assignment comes from the execution plan, not from here.

use anyhow::{bail, Context, Result};
use chrono::NaiveTime;
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::types::{CanonicalInstrument, ExecutionInstrument, SessionId};

/// Per-instrument contract definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstrumentSpec {
    /// Canonical product (journal/event keys)
    pub canonical: CanonicalInstrument,

    /// Contract actually submitted to the venue (may be a micro)
    pub execution: ExecutionInstrument,

    /// Minimum price increment (NQ = 0.25)
    pub tick_size: f64,

    /// Dollar value per point (NQ = $20, MNQ = $2)
    pub point_value: f64,

    /// Contracts per entry
    pub quantity: i32,

    /// Target distance in points; break-even trigger and the stop cap
    /// are both expressed relative to this
    pub target_points: f64,

    /// Exchange timezone name (e.g. "America/Chicago")
    pub exchange_tz: String,
}

impl InstrumentSpec {
    /// Parse the configured exchange timezone.
    pub fn timezone(&self) -> Result<Tz> {
        self.exchange_tz
            .parse::<Tz>()
            .map_err(|e| anyhow::anyhow!("bad exchange_tz '{}': {}", self.exchange_tz, e))
    }
}

/// A named trading window, exchange-local. The slot time inside the
/// window comes from the execution plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSpec {
    pub id: SessionId,

    /// Start of the range-building window (exchange-local)
    pub range_start: NaiveTime,

    /// Market-close cutoff: last admissible breakout, and forced-flatten
    /// time for anything still open (exchange-local)
    pub close_cutoff: NaiveTime,
}

/// Flat configuration for the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RobotConfig {
    /// Account identifier, used for duplicate-instance detection
    pub account: String,

    /// Fixed bar width in seconds; any other width on the feed is a
    /// contract violation
    pub bar_width_secs: i64,

    /// Favorable-excursion fraction of target distance that moves the
    /// stop to break-even
    pub breakeven_trigger_ratio: f64,

    /// Protective stop distance cap, as a multiple of target distance
    pub stop_cap_multiple: f64,

    /// Break-even scan throttle in milliseconds
    pub breakeven_scan_interval_ms: i64,

    /// Pacing between stop-modify retries in milliseconds
    pub stop_modify_retry_ms: i64,

    /// Seconds after break-even trigger without a modify ack before a
    /// visibility alert is raised
    pub trigger_ack_timeout_secs: i64,

    /// Per-request hydration timeout in seconds
    pub hydration_timeout_secs: i64,

    /// Bounded hydration worker pool size
    pub hydration_workers: usize,

    pub instruments: Vec<InstrumentSpec>,
    pub sessions: Vec<SessionSpec>,
}

impl Default for RobotConfig {
    fn default() -> Self {
        Self {
            account: "SIM-1".to_string(),
            bar_width_secs: 60,
            breakeven_trigger_ratio: 0.65,
            stop_cap_multiple: 1.5,
            breakeven_scan_interval_ms: 250,
            stop_modify_retry_ms: 500,
            trigger_ack_timeout_secs: 30,
            hydration_timeout_secs: 20,
            hydration_workers: 2,
            instruments: vec![InstrumentSpec {
                canonical: CanonicalInstrument("NQ".to_string()),
                execution: ExecutionInstrument("MNQ".to_string()),
                tick_size: 0.25,
                point_value: 2.0,
                quantity: 1,
                target_points: 10.0,
                exchange_tz: "America/Chicago".to_string(),
            }],
            sessions: vec![SessionSpec {
                id: SessionId("US_OPEN".to_string()),
                range_start: NaiveTime::from_hms_opt(2, 0, 0).unwrap(),
                close_cutoff: NaiveTime::from_hms_opt(15, 0, 0).unwrap(),
            }],
        }
    }
}

impl RobotConfig {
    /// Load and validate configuration from a JSON file.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let config: RobotConfig = serde_json::from_slice(&raw)
            .with_context(|| format!("parsing config {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Fail-closed validation: a config the engine cannot trade safely
    /// with is refused outright.
    pub fn validate(&self) -> Result<()> {
        if self.bar_width_secs <= 0 {
            bail!("bar_width_secs must be positive");
        }
        if !(0.0..=1.0).contains(&self.breakeven_trigger_ratio) {
            bail!(
                "breakeven_trigger_ratio {} outside [0, 1]",
                self.breakeven_trigger_ratio
            );
        }
        if self.stop_cap_multiple <= 0.0 {
            bail!("stop_cap_multiple must be positive");
        }
        if self.hydration_workers == 0 {
            bail!("hydration_workers must be at least 1");
        }
        if self.instruments.is_empty() {
            bail!("no instruments configured");
        }
        for inst in &self.instruments {
            if inst.tick_size <= 0.0 {
                bail!("{}: tick_size must be positive", inst.canonical);
            }
            if inst.quantity <= 0 {
                bail!("{}: quantity must be positive", inst.canonical);
            }
            if inst.target_points <= 0.0 {
                bail!("{}: target_points must be positive", inst.canonical);
            }
            inst.timezone()?;
        }
        for session in &self.sessions {
            if session.range_start >= session.close_cutoff {
                bail!("{}: range_start must precede close_cutoff", session.id);
            }
        }
        Ok(())
    }

    pub fn instrument(&self, canonical: &CanonicalInstrument) -> Option<&InstrumentSpec> {
        self.instruments.iter().find(|i| &i.canonical == canonical)
    }

    pub fn session(&self, id: &SessionId) -> Option<&SessionSpec> {
        self.sessions.iter().find(|s| &s.id == id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates() {
        RobotConfig::default().validate().unwrap();
    }

    #[test]
    fn rejects_bad_trigger_ratio() {
        let mut config = RobotConfig::default();
        config.breakeven_trigger_ratio = 1.2;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_bad_timezone() {
        let mut config = RobotConfig::default();
        config.instruments[0].exchange_tz = "Mars/Olympus".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_inverted_session_window() {
        let mut config = RobotConfig::default();
        config.sessions[0].range_start = NaiveTime::from_hms_opt(16, 0, 0).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn round_trips_through_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("robot.json");
        let config = RobotConfig::default();
        std::fs::write(&path, serde_json::to_vec_pretty(&config).unwrap()).unwrap();

        let loaded = RobotConfig::load(&path).unwrap();
        assert_eq!(loaded.account, config.account);
        assert_eq!(loaded.instruments.len(), 1);
    }
}
