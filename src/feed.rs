//! CSV bar feed
//!
//! Replay input and hydration source for paper runs. One row per bar,
//! RFC 3339 open timestamps, symbol column carrying the execution
//! symbol the venue reports.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::debug;

use crate::robot::BarSource;
use crate::types::{Bar, ExecutionInstrument};

#[derive(Debug, Deserialize)]
struct FeedRow {
    symbol: String,
    ts_open: String,
    open: f64,
    high: f64,
    low: f64,
    close: f64,
}

/// A bar with the symbol it arrived under.
#[derive(Debug, Clone)]
pub struct FeedBar {
    pub symbol: String,
    pub bar: Bar,
}

/// Load and time-sort all bars in a CSV file.
pub fn load_bars(path: &Path) -> Result<Vec<FeedBar>> {
    let file = File::open(path)
        .with_context(|| format!("Failed to open bar file: {:?}", path))?;
    let mut csv_reader = csv::Reader::from_reader(BufReader::new(file));

    let mut bars = Vec::new();
    for result in csv_reader.deserialize() {
        let row: FeedRow = result.with_context(|| "Failed to parse CSV row")?;
        let ts_open = DateTime::parse_from_rfc3339(&row.ts_open)
            .with_context(|| format!("Failed to parse timestamp: {}", row.ts_open))?
            .with_timezone(&Utc);
        bars.push(FeedBar {
            symbol: row.symbol,
            bar: Bar::new(ts_open, row.open, row.high, row.low, row.close),
        });
    }

    bars.sort_by_key(|fb| fb.bar.timestamp_open_utc);
    debug!("loaded {} bars from {:?}", bars.len(), path);
    Ok(bars)
}

/// Hydration source backed by the same CSV file the replay reads.
pub struct CsvBarSource {
    bars: Vec<FeedBar>,
}

impl CsvBarSource {
    pub fn from_path(path: &Path) -> Result<Self> {
        Ok(Self { bars: load_bars(path)? })
    }
}

#[async_trait]
impl BarSource for CsvBarSource {
    async fn fetch(
        &self,
        instrument: &ExecutionInstrument,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Bar>> {
        Ok(self
            .bars
            .iter()
            .filter(|fb| {
                fb.symbol == instrument.0
                    && fb.bar.timestamp_open_utc >= from
                    && fb.bar.timestamp_open_utc < to
            })
            .map(|fb| fb.bar)
            .collect())
    }
}
