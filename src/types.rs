//! Core identity and market-data types shared across the crate.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Logical underlying product (e.g. "NQ"). Used for stream keys,
/// journaling and the event log. Never passed to order placement.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CanonicalInstrument(pub String);

impl std::fmt::Display for CanonicalInstrument {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Literal tradable contract submitted to the venue (e.g. "MNQH6").
/// Never used as a journal or stream key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExecutionInstrument(pub String);

impl std::fmt::Display for ExecutionInstrument {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Named trading window (e.g. "EU_OPEN", "US_OPEN").
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub String);

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One (canonical instrument, session) pair for a trading date.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradingSession {
    pub trading_date: NaiveDate,
    pub session: SessionId,
    pub canonical_instrument: CanonicalInstrument,
    pub execution_instrument: ExecutionInstrument,
}

/// A single price bar. One fixed width per process; any other width is a
/// contract violation detected by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub timestamp_open_utc: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
}

impl Bar {
    pub fn new(
        timestamp_open_utc: DateTime<Utc>,
        open: f64,
        high: f64,
        low: f64,
        close: f64,
    ) -> Self {
        Self { timestamp_open_utc, open, high, low, close }
    }
}
