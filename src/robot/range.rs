//! Range construction and bar-timestamp interpretation
//!
//! The range is folded over every bar whose open falls inside
//! [range_start, slot). Feed timestamps are interpreted once, from the
//! first bar seen, as either true UTC or exchange-local wall-clock
//! digits; the winning interpretation is locked for the stream's
//! lifetime so out-of-order historical bars after a reconnect cannot
//! flap the clock.

use chrono::{DateTime, Duration, Utc};
use chrono_tz::Tz;
use serde::Serialize;

use crate::time_service;
use crate::types::Bar;

/// How the feed's bar timestamps map to UTC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TzInterpretation {
    /// Timestamps are what they claim to be
    Utc,
    /// The wall-clock digits are exchange-local
    ExchangeLocal,
}

/// Outcome of resolving one bar timestamp.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TzResolution {
    Ok,
    /// Locked on this bar (first bar seen)
    LockedNow(TzInterpretation),
    /// Implied age implausible under the locked interpretation
    ImplausibleAge { age_secs: i64 },
}

/// Per-stream timestamp interpreter.
#[derive(Debug)]
pub struct TzLock {
    tz: Tz,
    bar_width: Duration,
    locked: Option<TzInterpretation>,
}

impl TzLock {
    /// Age window under which a bar counts as "just happened".
    const PLAUSIBLE_MIN_SECS: i64 = -120;
    const PLAUSIBLE_MAX_SECS: i64 = 30 * 60;
    /// Post-lock anomaly bounds. Hydrated history is legitimately old,
    /// so only ages beyond any same-day backfill are anomalous.
    const ANOMALY_FUTURE_SECS: i64 = -300;
    const ANOMALY_STALE_SECS: i64 = 24 * 3600;

    pub fn new(tz: Tz, bar_width: Duration) -> Self {
        Self { tz, bar_width, locked: None }
    }

    pub fn locked(&self) -> Option<TzInterpretation> {
        self.locked
    }

    /// Map a raw bar-open timestamp to UTC.
    ///
    /// First call detects and locks the interpretation; later calls
    /// only report implausible ages, never re-detect.
    pub fn resolve(
        &mut self,
        raw: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> (DateTime<Utc>, TzResolution) {
        let as_local = time_service::naive_local_to_utc(self.tz, raw.naive_utc()).ok();

        match self.locked {
            None => {
                let interp = self.detect(raw, as_local, now);
                self.locked = Some(interp);
                let ts = self.apply(interp, raw, as_local);
                (ts, TzResolution::LockedNow(interp))
            }
            Some(interp) => {
                let ts = self.apply(interp, raw, as_local);
                let age_secs = (now - ts).num_seconds();
                if age_secs < Self::ANOMALY_FUTURE_SECS || age_secs > Self::ANOMALY_STALE_SECS {
                    (ts, TzResolution::ImplausibleAge { age_secs })
                } else {
                    (ts, TzResolution::Ok)
                }
            }
        }
    }

    fn detect(
        &self,
        raw: DateTime<Utc>,
        as_local: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> TzInterpretation {
        let plausible = |ts: DateTime<Utc>| {
            let age = (now - (ts + self.bar_width)).num_seconds();
            (Self::PLAUSIBLE_MIN_SECS..=Self::PLAUSIBLE_MAX_SECS).contains(&age)
        };

        // UTC wins ties; local only when it alone looks fresh
        if plausible(raw) {
            TzInterpretation::Utc
        } else if as_local.is_some_and(plausible) {
            TzInterpretation::ExchangeLocal
        } else {
            TzInterpretation::Utc
        }
    }

    fn apply(
        &self,
        interp: TzInterpretation,
        raw: DateTime<Utc>,
        as_local: Option<DateTime<Utc>>,
    ) -> DateTime<Utc> {
        match interp {
            TzInterpretation::Utc => raw,
            TzInterpretation::ExchangeLocal => as_local.unwrap_or(raw),
        }
    }
}

/// Breakout levels derived from a locked range.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BreakoutLevels {
    pub brk_long: f64,
    pub brk_short: f64,
}

#[derive(Debug, Clone, Copy)]
struct ObservedBar {
    resolved_open: DateTime<Utc>,
    high: f64,
    low: f64,
    close: f64,
}

/// High/low/freeze-close fold over the pre-slot window. Individual
/// bars are retained so the freeze bar's own contribution can be
/// excluded when testing whether its close already cleared the range.
#[derive(Debug, Default)]
pub struct RangeTracker {
    pub high: Option<f64>,
    pub low: Option<f64>,
    bars: Vec<ObservedBar>,
}

impl RangeTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one in-window bar. Out-of-order arrival is fine: high/low
    /// are order-independent and the freeze bar is picked by open.
    pub fn observe(&mut self, bar: &Bar, resolved_open: DateTime<Utc>) {
        self.high = Some(self.high.map_or(bar.high, |h| h.max(bar.high)));
        self.low = Some(self.low.map_or(bar.low, |l| l.min(bar.low)));
        self.bars.push(ObservedBar {
            resolved_open,
            high: bar.high,
            low: bar.low,
            close: bar.close,
        });
    }

    pub fn bar_count(&self) -> usize {
        self.bars.len()
    }

    /// Index of the freeze bar: the latest open, later arrival winning
    /// a tie.
    fn freeze_index(&self) -> Option<usize> {
        let mut best: Option<usize> = None;
        for (i, observed) in self.bars.iter().enumerate() {
            if best.is_none_or(|b| observed.resolved_open >= self.bars[b].resolved_open) {
                best = Some(i);
            }
        }
        best
    }

    pub fn freeze_close(&self) -> Option<f64> {
        self.freeze_index().map(|i| self.bars[i].close)
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }

    /// One tick beyond each extreme. None until at least one bar.
    pub fn levels(&self, tick_size: f64) -> Option<BreakoutLevels> {
        match (self.high, self.low) {
            (Some(high), Some(low)) => Some(BreakoutLevels {
                brk_long: high + tick_size,
                brk_short: low - tick_size,
            }),
            _ => None,
        }
    }

    /// Levels over the range the earlier bars established, leaving the
    /// freeze bar out. The freeze bar's close always sits inside the
    /// full range, so this reduced range is what its close can clear.
    /// None until two bars exist.
    pub fn levels_excluding_freeze(&self, tick_size: f64) -> Option<BreakoutLevels> {
        let freeze = self.freeze_index()?;
        let mut high: Option<f64> = None;
        let mut low: Option<f64> = None;
        for (i, observed) in self.bars.iter().enumerate() {
            if i == freeze {
                continue;
            }
            high = Some(high.map_or(observed.high, |h| h.max(observed.high)));
            low = Some(low.map_or(observed.low, |l| l.min(observed.low)));
        }
        match (high, low) {
            (Some(high), Some(low)) => Some(BreakoutLevels {
                brk_long: high + tick_size,
                brk_short: low - tick_size,
            }),
            _ => None,
        }
    }
}
