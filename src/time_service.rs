//! Exchange-local / UTC session boundary math
//!
//! Pure and stateless. All engine state is kept in UTC; this module is
//! the only place local times are interpreted.

use anyhow::{bail, Result};
use chrono::{DateTime, LocalResult, NaiveDate, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;

use crate::config::SessionSpec;

/// UTC instants for one stream's trading window.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SessionBounds {
    /// Range-building window opens
    pub range_start_utc: DateTime<Utc>,
    /// Range locks, breakout watch begins
    pub slot_utc: DateTime<Utc>,
    /// Last admissible breakout; forced flatten for open positions
    pub close_cutoff_utc: DateTime<Utc>,
}

/// Convert an exchange-local wall-clock time on a trading date to UTC.
///
/// DST edges: an ambiguous local time maps to its earliest valid
/// instant; a nonexistent local time is shifted forward one hour.
pub fn local_to_utc(tz: Tz, date: NaiveDate, time: NaiveTime) -> Result<DateTime<Utc>> {
    let naive = date.and_time(time);
    match tz.from_local_datetime(&naive) {
        LocalResult::Single(dt) => Ok(dt.with_timezone(&Utc)),
        LocalResult::Ambiguous(earliest, _) => Ok(earliest.with_timezone(&Utc)),
        LocalResult::None => {
            let shifted = naive + chrono::Duration::hours(1);
            match tz.from_local_datetime(&shifted) {
                LocalResult::Single(dt) | LocalResult::Ambiguous(dt, _) => {
                    Ok(dt.with_timezone(&Utc))
                }
                LocalResult::None => bail!(
                    "local time {} does not exist in {} even shifted",
                    naive,
                    tz
                ),
            }
        }
    }
}

/// Interpret a naive wall-clock timestamp as exchange-local and convert
/// to UTC. Used by timezone-interpretation detection on inbound bars.
pub fn naive_local_to_utc(tz: Tz, naive: chrono::NaiveDateTime) -> Result<DateTime<Utc>> {
    local_to_utc(tz, naive.date(), naive.time())
}

/// Compute the UTC bounds of a session for a trading date.
///
/// `slot_local` comes from the execution plan and must fall inside
/// `(range_start, close_cutoff)`.
pub fn session_bounds(
    tz: Tz,
    trading_date: NaiveDate,
    session: &SessionSpec,
    slot_local: NaiveTime,
) -> Result<SessionBounds> {
    if slot_local <= session.range_start || slot_local >= session.close_cutoff {
        bail!(
            "slot {} outside session window {}..{}",
            slot_local,
            session.range_start,
            session.close_cutoff
        );
    }

    Ok(SessionBounds {
        range_start_utc: local_to_utc(tz, trading_date, session.range_start)?,
        slot_utc: local_to_utc(tz, trading_date, slot_local)?,
        close_cutoff_utc: local_to_utc(tz, trading_date, session.close_cutoff)?,
    })
}
