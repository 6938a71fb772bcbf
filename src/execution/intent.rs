//! Trade intent lifecycle
//!
//! One Intent per attempted trade, owned exclusively by its stream
//! until filled. The journal is system-of-record for fills and exits
//! thereafter.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::adapter::OrderRef;

/// Trade direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    Long,
    Short,
}

impl Direction {
    pub fn opposite(&self) -> Self {
        match self {
            Self::Long => Self::Short,
            Self::Short => Self::Long,
        }
    }

    /// Signed favorable-excursion of `price` relative to `entry`.
    pub fn excursion(&self, entry: f64, price: f64) -> f64 {
        match self {
            Self::Long => price - entry,
            Self::Short => entry - price,
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Long => write!(f, "LONG"),
            Self::Short => write!(f, "SHORT"),
        }
    }
}

/// Which stop is protecting the position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StopKind {
    /// Initial protective stop at the capped distance
    Protective,
    /// Stop moved one tick beyond entry after the trigger crossing
    BreakEven,
}

/// Why an intent closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExitReason {
    StopHit,
    TargetFill,
    Flattened,
}

/// Intent status, journaled on every change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IntentStatus {
    Created,
    EntrySubmitted,
    EntryFilled,
    StopWorking,
    StopAtBreakEven,
    Closed(ExitReason),
    Rejected,
}

impl IntentStatus {
    pub fn is_open(&self) -> bool {
        !matches!(self, Self::Closed(_) | Self::Rejected)
    }
}

/// One attempted trade.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Intent {
    pub intent_id: Uuid,
    pub stream_id: String,
    pub direction: Direction,
    /// Breakout level the entry was taken at
    pub entry_price: f64,
    /// Working stop price
    pub stop_price: f64,
    pub stop_kind: StopKind,
    pub status: IntentStatus,
    pub quantity: i32,
    pub entry_ref: Option<OrderRef>,
    pub stop_ref: Option<OrderRef>,
    pub fill_price: Option<f64>,
    pub exit_price: Option<f64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Intent {
    pub fn new(
        stream_id: &str,
        direction: Direction,
        entry_price: f64,
        stop_price: f64,
        quantity: i32,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            intent_id: Uuid::new_v4(),
            stream_id: stream_id.to_string(),
            direction,
            entry_price,
            stop_price,
            stop_kind: StopKind::Protective,
            status: IntentStatus::Created,
            quantity,
            entry_ref: None,
            stop_ref: None,
            fill_price: None,
            exit_price: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_open(&self) -> bool {
        self.status.is_open()
    }

    fn touch(&mut self, status: IntentStatus, now: DateTime<Utc>) {
        self.status = status;
        self.updated_at = now;
    }

    pub fn mark_entry_submitted(&mut self, order_ref: OrderRef, now: DateTime<Utc>) {
        self.entry_ref = Some(order_ref);
        self.touch(IntentStatus::EntrySubmitted, now);
    }

    pub fn record_entry_fill(&mut self, fill_price: f64, now: DateTime<Utc>) {
        self.fill_price = Some(fill_price);
        self.touch(IntentStatus::EntryFilled, now);
    }

    pub fn mark_stop_working(&mut self, order_ref: OrderRef, now: DateTime<Utc>) {
        self.stop_ref = Some(order_ref);
        self.touch(IntentStatus::StopWorking, now);
    }

    pub fn move_stop_to_breakeven(&mut self, new_stop: f64, now: DateTime<Utc>) {
        self.stop_price = new_stop;
        self.stop_kind = StopKind::BreakEven;
        self.touch(IntentStatus::StopAtBreakEven, now);
    }

    pub fn close(&mut self, reason: ExitReason, exit_price: f64, now: DateTime<Utc>) {
        self.exit_price = Some(exit_price);
        self.touch(IntentStatus::Closed(reason), now);
    }

    pub fn reject(&mut self, now: DateTime<Utc>) {
        self.touch(IntentStatus::Rejected, now);
    }

    /// Realized points, available once closed.
    pub fn realized_points(&self) -> Option<f64> {
        match (self.fill_price, self.exit_price) {
            (Some(entry), Some(exit)) => Some(self.direction.excursion(entry, exit)),
            _ => None,
        }
    }
}
