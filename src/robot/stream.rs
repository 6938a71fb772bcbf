//! Per-(instrument, session) trading stream
//!
//! The stream is the broker-agnostic state machine: it builds the
//! pre-slot range, detects the breakout, and supervises the position to
//! break-even. It never touches the adapter directly; every transition
//! returns effects that the engine executes and journals, which keeps
//! the machine deterministic and testable against fixed bar sequences.

use chrono::{DateTime, Duration, Utc};
use serde_json::json;
use tracing::debug;
use uuid::Uuid;

use super::breakeven::{BreakEvenAction, BreakEvenSupervisor};
use super::range::{BreakoutLevels, RangeTracker, TzLock, TzResolution};
use crate::events::EventType;
use crate::execution::{Direction, ExitReason, Intent, OrderRef};
use crate::journal::JournalEntry;
use crate::time_service::SessionBounds;
use crate::types::{Bar, TradingSession};

/// Lifecycle states. StandDown is terminal and reachable from any
/// state on a fatal condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    PreHydration,
    RangeBuilding,
    RangeLocked,
    Armed,
    Entered,
    Managing,
    Committed,
    StandDown,
}

impl std::fmt::Display for StreamState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::PreHydration => "PRE_HYDRATION",
            Self::RangeBuilding => "RANGE_BUILDING",
            Self::RangeLocked => "RANGE_LOCKED",
            Self::Armed => "ARMED",
            Self::Entered => "ENTERED",
            Self::Managing => "MANAGING",
            Self::Committed => "COMMITTED",
            Self::StandDown => "STAND_DOWN",
        };
        write!(f, "{}", s)
    }
}

/// Why a stream stood down.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StandDownReason {
    NoTradeRangeDataMissing,
    OrderRejected(String),
    ContractViolation(String),
}

impl StandDownReason {
    pub fn code(&self) -> &'static str {
        match self {
            Self::NoTradeRangeDataMissing => "NO_TRADE_RANGE_DATA_MISSING",
            Self::OrderRejected(_) => "ORDER_REJECTED",
            Self::ContractViolation(_) => "CONTRACT_VIOLATION",
        }
    }
}

/// Everything the stream needs at construction.
#[derive(Debug, Clone)]
pub struct StreamParams {
    pub stream_id: String,
    pub session: TradingSession,
    pub bounds: SessionBounds,
    pub tick_size: f64,
    pub quantity: i32,
    pub point_value: f64,
    pub target_points: f64,
    pub breakeven_trigger_ratio: f64,
    pub stop_cap_multiple: f64,
    pub scan_interval: Duration,
    pub retry_interval: Duration,
    pub ack_timeout: Duration,
}

/// Side effects the engine executes on the stream's behalf.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEffect {
    SubmitEntry {
        intent_id: Uuid,
        direction: Direction,
        quantity: i32,
        tag: String,
    },
    SubmitStop {
        intent_id: Uuid,
        closing_side: Direction,
        quantity: i32,
        stop_price: f64,
        tag: String,
    },
    ModifyStop {
        order_ref: OrderRef,
        new_price: f64,
    },
    CancelOrder {
        order_ref: OrderRef,
    },
    FlattenPosition {
        closing_side: Direction,
        quantity: i32,
        tag: String,
    },
    RequestLateHydration,
    Journal(JournalEntry),
    Event {
        event_type: EventType,
        payload: serde_json::Value,
    },
}

/// Order/fill callbacks after the engine has resolved their role.
#[derive(Debug, Clone)]
pub enum StreamOrderEvent {
    EntryAccepted { order_ref: OrderRef },
    EntryRejected { reason: String },
    EntryFilled { price: f64 },
    StopAccepted { order_ref: OrderRef },
    StopRejected { reason: String },
    StopModifyAcked { price: f64 },
    StopFilled { price: f64 },
    FlattenFilled { price: f64 },
}

pub struct Stream {
    params: StreamParams,
    state: StreamState,
    stand_down: Option<StandDownReason>,
    tz_lock: TzLock,
    range: RangeTracker,
    levels: Option<BreakoutLevels>,
    intent: Option<Intent>,
    breakeven: Option<BreakEvenSupervisor>,
    late_hydration_requested: bool,
    awaiting_late_hydration: bool,
    last_price: Option<f64>,
}

impl Stream {
    pub fn new(params: StreamParams, tz: chrono_tz::Tz, bar_width: Duration) -> Self {
        let tz_lock = TzLock::new(tz, bar_width);
        Self {
            params,
            state: StreamState::PreHydration,
            stand_down: None,
            tz_lock,
            range: RangeTracker::new(),
            levels: None,
            intent: None,
            breakeven: None,
            late_hydration_requested: false,
            awaiting_late_hydration: false,
            last_price: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.params.stream_id
    }

    pub fn session(&self) -> &TradingSession {
        &self.params.session
    }

    pub fn bounds(&self) -> &SessionBounds {
        &self.params.bounds
    }

    pub fn state(&self) -> StreamState {
        self.state
    }

    pub fn stand_down_reason(&self) -> Option<&StandDownReason> {
        self.stand_down.as_ref()
    }

    pub fn intent(&self) -> Option<&Intent> {
        self.intent.as_ref()
    }

    pub fn levels(&self) -> Option<BreakoutLevels> {
        self.levels
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.state, StreamState::Committed | StreamState::StandDown)
    }

    /// True while the stream still wants hydration to finish.
    pub fn needs_hydration(&self) -> bool {
        matches!(self.state, StreamState::PreHydration | StreamState::RangeBuilding)
    }

    fn transition(&mut self, to: StreamState, effects: &mut Vec<StreamEffect>) {
        if self.state == to {
            return;
        }
        debug!("{}: {} -> {}", self.params.stream_id, self.state, to);
        effects.push(StreamEffect::Event {
            event_type: EventType::StateTransition,
            payload: json!({ "from": self.state.to_string(), "to": to.to_string() }),
        });
        self.state = to;
    }

    fn stand_down(
        &mut self,
        reason: StandDownReason,
        effects: &mut Vec<StreamEffect>,
    ) {
        let detail = match &reason {
            StandDownReason::OrderRejected(r) | StandDownReason::ContractViolation(r) => {
                Some(r.clone())
            }
            StandDownReason::NoTradeRangeDataMissing => None,
        };
        effects.push(StreamEffect::Event {
            event_type: EventType::StandDown,
            payload: json!({ "reason": reason.code(), "detail": detail }),
        });
        self.stand_down = Some(reason);
        self.transition(StreamState::StandDown, effects);
    }

    fn journal_effect(&self, intent: &Intent, now: DateTime<Utc>) -> StreamEffect {
        StreamEffect::Journal(JournalEntry {
            intent_id: intent.intent_id,
            stream_id: intent.stream_id.clone(),
            timestamp_utc: now,
            status: intent.status,
            direction: intent.direction,
            entry_price: intent.entry_price,
            stop_price: intent.stop_price,
            fill_price: intent.fill_price,
            exit_price: intent.exit_price,
        })
    }

    /// Stand the stream down before it ever runs (plan or contract
    /// level failure discovered by the engine).
    pub fn refuse(&mut self, detail: &str) -> Vec<StreamEffect> {
        let mut effects = Vec::new();
        self.stand_down(
            StandDownReason::ContractViolation(detail.to_string()),
            &mut effects,
        );
        effects
    }

    // ------------------------------------------------------------------
    // Hydration

    /// Engine delivers the hydration outcome. `bars` is None when the
    /// fetch failed or timed out; the stream then degrades to live
    /// bars only.
    pub fn hydration_completed(
        &mut self,
        bars: Option<Vec<Bar>>,
        now: DateTime<Utc>,
    ) -> Vec<StreamEffect> {
        let mut effects = Vec::new();
        if self.is_terminal() {
            return effects;
        }

        let was_late_attempt = self.awaiting_late_hydration;
        self.awaiting_late_hydration = false;

        if let Some(bars) = bars {
            let mut absorbed = 0usize;
            for bar in &bars {
                if self.absorb_range_bar(bar, now, &mut effects) {
                    absorbed += 1;
                }
            }
            effects.push(StreamEffect::Event {
                event_type: EventType::HydrationCompleted,
                payload: json!({ "bars": bars.len(), "in_window": absorbed }),
            });
        } else {
            effects.push(StreamEffect::Event {
                event_type: EventType::HydrationFailed,
                payload: json!({ "degraded_to": "live bars only" }),
            });
        }

        if self.state == StreamState::PreHydration {
            self.transition(StreamState::RangeBuilding, &mut effects);
        }

        if was_late_attempt && now >= self.params.bounds.slot_utc && self.range.is_empty() {
            self.stand_down(StandDownReason::NoTradeRangeDataMissing, &mut effects);
            return effects;
        }

        self.advance_clock(now, &mut effects);
        effects
    }

    // ------------------------------------------------------------------
    // Market data

    pub fn on_bar(&mut self, bar: &Bar, now: DateTime<Utc>) -> Vec<StreamEffect> {
        let mut effects = Vec::new();
        if self.is_terminal() {
            return effects;
        }

        self.absorb_range_bar(bar, now, &mut effects);
        self.last_price = Some(bar.close);

        if self.state == StreamState::PreHydration && !self.range.is_empty() {
            // live bars arrived before hydration resolved
            self.transition(StreamState::RangeBuilding, &mut effects);
        }

        self.advance_clock(now, &mut effects);

        if self.state == StreamState::Armed {
            self.check_bar_breach(bar, now, &mut effects);
        }
        if self.state == StreamState::Managing {
            if let Some(be) = self.breakeven.as_mut() {
                be.update_tick(bar.close);
            }
            self.run_breakeven_scan(now, &mut effects);
        }
        effects
    }

    pub fn on_tick(&mut self, price: f64, now: DateTime<Utc>) -> Vec<StreamEffect> {
        let mut effects = Vec::new();
        if self.is_terminal() {
            return effects;
        }

        self.last_price = Some(price);
        self.advance_clock(now, &mut effects);

        match self.state {
            StreamState::Armed => {
                if let Some(levels) = self.levels {
                    if price >= levels.brk_long {
                        self.enter(Direction::Long, levels.brk_long, now, &mut effects);
                    } else if price <= levels.brk_short {
                        self.enter(Direction::Short, levels.brk_short, now, &mut effects);
                    }
                }
            }
            StreamState::Managing => {
                if let Some(be) = self.breakeven.as_mut() {
                    be.update_tick(price);
                }
                self.run_breakeven_scan(now, &mut effects);
            }
            _ => {}
        }
        effects
    }

    /// Fold a bar into the range if its resolved open is in-window.
    /// Returns whether it was absorbed.
    fn absorb_range_bar(
        &mut self,
        bar: &Bar,
        now: DateTime<Utc>,
        effects: &mut Vec<StreamEffect>,
    ) -> bool {
        let (resolved, resolution) = self.tz_lock.resolve(bar.timestamp_open_utc, now);
        match resolution {
            TzResolution::LockedNow(interp) => {
                debug!(
                    "{}: bar timestamps locked as {:?}",
                    self.params.stream_id, interp
                );
            }
            TzResolution::ImplausibleAge { age_secs } => {
                // engine rate-limits this category before logging
                effects.push(StreamEffect::Event {
                    event_type: EventType::BarAgeAnomaly,
                    payload: json!({ "age_secs": age_secs }),
                });
            }
            TzResolution::Ok => {}
        }

        let in_window = resolved >= self.params.bounds.range_start_utc
            && resolved < self.params.bounds.slot_utc;
        let building = matches!(
            self.state,
            StreamState::PreHydration | StreamState::RangeBuilding
        );
        if in_window && building {
            self.range.observe(bar, resolved);
            return true;
        }
        false
    }

    /// Time-driven transitions: range lock at slot, no-trade and forced
    /// flatten at the close cutoff.
    fn advance_clock(&mut self, now: DateTime<Utc>, effects: &mut Vec<StreamEffect>) {
        let bounds = self.params.bounds;

        if now >= bounds.slot_utc
            && matches!(
                self.state,
                StreamState::PreHydration | StreamState::RangeBuilding
            )
            && !self.awaiting_late_hydration
        {
            if self.range.is_empty() {
                if !self.late_hydration_requested {
                    // one opportunistic attempt before giving up
                    self.late_hydration_requested = true;
                    self.awaiting_late_hydration = true;
                    effects.push(StreamEffect::RequestLateHydration);
                } else {
                    self.stand_down(StandDownReason::NoTradeRangeDataMissing, effects);
                }
                return;
            }
            self.lock_range(now, effects);
        }

        if now >= bounds.close_cutoff_utc {
            match self.state {
                StreamState::Armed | StreamState::RangeLocked => {
                    effects.push(StreamEffect::Event {
                        event_type: EventType::IntentClosed,
                        payload: json!({ "no_trade": "CUTOFF_NO_BREAKOUT" }),
                    });
                    self.transition(StreamState::Committed, effects);
                }
                StreamState::Entered | StreamState::Managing => {
                    self.flatten_at_cutoff(now, effects);
                }
                _ => {}
            }
        }
    }

    fn lock_range(&mut self, now: DateTime<Utc>, effects: &mut Vec<StreamEffect>) {
        let levels = match self.range.levels(self.params.tick_size) {
            Some(levels) => levels,
            None => return,
        };
        self.levels = Some(levels);
        self.transition(StreamState::RangeLocked, effects);
        effects.push(StreamEffect::Event {
            event_type: EventType::RangeLocked,
            payload: json!({
                "high": self.range.high,
                "low": self.range.low,
                "freeze_close": self.range.freeze_close(),
                "brk_long": levels.brk_long,
                "brk_short": levels.brk_short,
                "bars": self.range.bar_count(),
            }),
        });

        // The freeze bar's close sits inside the full range by
        // construction, so the clearing test runs against the range
        // the earlier bars established. A final pre-slot bar closing
        // beyond that range is the breakout already underway: enter
        // immediately at the cleared level. When both clear, the
        // closer level wins.
        if let (Some(close), Some(prior)) = (
            self.range.freeze_close(),
            self.range.levels_excluding_freeze(self.params.tick_size),
        ) {
            let clears_long = close >= prior.brk_long;
            let clears_short = close <= prior.brk_short;
            let immediate = match (clears_long, clears_short) {
                (true, false) => Some((Direction::Long, prior.brk_long)),
                (false, true) => Some((Direction::Short, prior.brk_short)),
                (true, true) => {
                    if (close - prior.brk_long).abs() <= (close - prior.brk_short).abs() {
                        Some((Direction::Long, prior.brk_long))
                    } else {
                        Some((Direction::Short, prior.brk_short))
                    }
                }
                (false, false) => None,
            };
            if let Some((direction, level)) = immediate {
                self.enter(direction, level, now, effects);
                return;
            }
        }

        self.transition(StreamState::Armed, effects);
    }

    fn enter(
        &mut self,
        direction: Direction,
        level: f64,
        now: DateTime<Utc>,
        effects: &mut Vec<StreamEffect>,
    ) {
        // breakouts after the cutoff are no-trade
        if now >= self.params.bounds.close_cutoff_utc {
            return;
        }
        // exactly one open intent per stream, ever
        if self.intent.as_ref().is_some_and(|i| i.is_open()) {
            effects.push(StreamEffect::Event {
                event_type: EventType::InvariantViolation,
                payload: json!({ "violation": "second open intent refused" }),
            });
            return;
        }

        let stop_price = self.protective_stop_price(direction, level);
        let intent = Intent::new(
            &self.params.stream_id,
            direction,
            level,
            stop_price,
            self.params.quantity,
            now,
        );

        effects.push(StreamEffect::Event {
            event_type: EventType::BreakoutDetected,
            payload: json!({
                "direction": direction.to_string(),
                "level": level,
                "intent_id": intent.intent_id,
            }),
        });
        effects.push(self.journal_effect(&intent, now));
        effects.push(StreamEffect::SubmitEntry {
            intent_id: intent.intent_id,
            direction,
            quantity: self.params.quantity,
            tag: format!("{}:entry", intent.intent_id),
        });

        self.intent = Some(intent);
        self.transition(StreamState::Entered, effects);
    }

    /// Natural stop is the opposite breakout level, capped at a
    /// multiple of target distance from entry.
    fn protective_stop_price(&self, direction: Direction, entry: f64) -> f64 {
        let cap = self.params.stop_cap_multiple * self.params.target_points;
        let natural = self.levels.map(|l| match direction {
            Direction::Long => l.brk_short,
            Direction::Short => l.brk_long,
        });
        match direction {
            Direction::Long => natural.unwrap_or(entry - cap).max(entry - cap),
            Direction::Short => natural.unwrap_or(entry + cap).min(entry + cap),
        }
    }

    fn realized_dollars(&self, intent: &Intent) -> Option<f64> {
        intent
            .realized_points()
            .map(|points| points * self.params.point_value * f64::from(intent.quantity))
    }

    fn flatten_at_cutoff(&mut self, now: DateTime<Utc>, effects: &mut Vec<StreamEffect>) {
        let Some(intent) = self.intent.as_mut() else {
            self.transition(StreamState::Committed, effects);
            return;
        };

        if let Some(stop_ref) = intent.stop_ref.clone() {
            effects.push(StreamEffect::CancelOrder { order_ref: stop_ref });
        }
        effects.push(StreamEffect::FlattenPosition {
            closing_side: intent.direction.opposite(),
            quantity: intent.quantity,
            tag: format!("{}:flatten", intent.intent_id),
        });

        let exit = self.last_price.unwrap_or(intent.entry_price);
        intent.close(ExitReason::Flattened, exit, now);
        if let Some(closed) = self.intent.as_ref() {
            effects.push(self.journal_effect(closed, now));
            effects.push(StreamEffect::Event {
                event_type: EventType::Flattened,
                payload: json!({
                    "at": exit,
                    "reason": "close cutoff",
                    "points": closed.realized_points(),
                    "dollars": self.realized_dollars(closed),
                }),
            });
        }
        self.breakeven = None;
        self.transition(StreamState::Committed, effects);
    }

    fn check_bar_breach(
        &mut self,
        bar: &Bar,
        now: DateTime<Utc>,
        effects: &mut Vec<StreamEffect>,
    ) {
        let Some(levels) = self.levels else { return };
        let breaches_long = bar.high >= levels.brk_long;
        let breaches_short = bar.low <= levels.brk_short;
        match (breaches_long, breaches_short) {
            (true, false) => self.enter(Direction::Long, levels.brk_long, now, effects),
            (false, true) => self.enter(Direction::Short, levels.brk_short, now, effects),
            (true, true) => {
                // both inside one bar: take the side closer to the open
                if (bar.open - levels.brk_long).abs() <= (bar.open - levels.brk_short).abs() {
                    self.enter(Direction::Long, levels.brk_long, now, effects);
                } else {
                    self.enter(Direction::Short, levels.brk_short, now, effects);
                }
            }
            (false, false) => {}
        }
    }

    fn run_breakeven_scan(&mut self, now: DateTime<Utc>, effects: &mut Vec<StreamEffect>) {
        let Some(be) = self.breakeven.as_mut() else { return };
        let was_triggered = be.triggered();
        let Some(action) = be.scan(now) else { return };
        if !was_triggered && be.triggered() {
            effects.push(StreamEffect::Event {
                event_type: EventType::BreakEvenTriggered,
                payload: json!({ "target_stop": be.breakeven_stop() }),
            });
        }

        match action {
            BreakEvenAction::MoveStop { new_stop } => {
                let Some(intent) = self.intent.as_ref() else { return };
                match intent.stop_ref.clone() {
                    Some(order_ref) => {
                        effects.push(StreamEffect::ModifyStop {
                            order_ref,
                            new_price: new_stop,
                        });
                    }
                    None => {
                        // protective order not visible yet; the retry
                        // pacing inside the supervisor re-sends
                        effects.push(StreamEffect::Event {
                            event_type: EventType::StopRetry,
                            payload: json!({ "waiting_for": "stop order ref" }),
                        });
                    }
                }
            }
            BreakEvenAction::RaiseAlert { waited_secs } => {
                effects.push(StreamEffect::Event {
                    event_type: EventType::VisibilityAlert,
                    payload: json!({ "unacked_secs": waited_secs }),
                });
            }
        }
    }

    // ------------------------------------------------------------------
    // Order callbacks (already serialized onto the lane by the engine)

    pub fn on_order_event(
        &mut self,
        event: StreamOrderEvent,
        now: DateTime<Utc>,
    ) -> Vec<StreamEffect> {
        let mut effects = Vec::new();
        let Some(mut intent) = self.intent.take() else {
            effects.push(StreamEffect::Event {
                event_type: EventType::AdapterError,
                payload: json!({ "orphan_order_event": format!("{:?}", event) }),
            });
            return effects;
        };

        match event {
            StreamOrderEvent::EntryAccepted { order_ref } => {
                effects.push(StreamEffect::Event {
                    event_type: EventType::EntrySubmitted,
                    payload: json!({ "order_ref": order_ref.0 }),
                });
                intent.mark_entry_submitted(order_ref, now);
                effects.push(self.journal_effect(&intent, now));
            }
            StreamOrderEvent::EntryRejected { reason } => {
                intent.reject(now);
                effects.push(self.journal_effect(&intent, now));
                self.intent = Some(intent);
                self.stand_down(StandDownReason::OrderRejected(reason), &mut effects);
                return effects;
            }
            StreamOrderEvent::EntryFilled { price } => {
                intent.record_entry_fill(price, now);
                effects.push(self.journal_effect(&intent, now));
                effects.push(StreamEffect::Event {
                    event_type: EventType::EntryFilled,
                    payload: json!({ "fill": price, "level": intent.entry_price }),
                });
                effects.push(StreamEffect::SubmitStop {
                    intent_id: intent.intent_id,
                    closing_side: intent.direction.opposite(),
                    quantity: intent.quantity,
                    stop_price: intent.stop_price,
                    tag: format!("{}:stop", intent.intent_id),
                });
                // break-even math keys off the breakout level, not the
                // fill, so levels stay deterministic for a fixed feed
                self.breakeven = Some(BreakEvenSupervisor::new(
                    intent.direction,
                    intent.entry_price,
                    self.params.tick_size,
                    self.params.target_points,
                    self.params.breakeven_trigger_ratio,
                    self.params.scan_interval,
                    self.params.retry_interval,
                    self.params.ack_timeout,
                ));
                self.intent = Some(intent);
                self.transition(StreamState::Managing, &mut effects);
                return effects;
            }
            StreamOrderEvent::StopAccepted { order_ref } => {
                intent.mark_stop_working(order_ref, now);
                effects.push(self.journal_effect(&intent, now));
                effects.push(StreamEffect::Event {
                    event_type: EventType::StopSubmitted,
                    payload: json!({ "stop": intent.stop_price }),
                });
            }
            StreamOrderEvent::StopRejected { reason } => {
                // position is unprotected: flatten immediately
                effects.push(StreamEffect::Event {
                    event_type: EventType::AdapterError,
                    payload: json!({ "stop_rejected": reason.clone() }),
                });
                effects.push(StreamEffect::FlattenPosition {
                    closing_side: intent.direction.opposite(),
                    quantity: intent.quantity,
                    tag: format!("{}:flatten", intent.intent_id),
                });
                let exit = self.last_price.unwrap_or(intent.entry_price);
                intent.close(ExitReason::Flattened, exit, now);
                effects.push(self.journal_effect(&intent, now));
                self.intent = Some(intent);
                self.stand_down(StandDownReason::OrderRejected(reason), &mut effects);
                return effects;
            }
            StreamOrderEvent::StopModifyAcked { price } => {
                if let Some(be) = self.breakeven.as_mut() {
                    if !be.acked() {
                        be.record_ack();
                        intent.move_stop_to_breakeven(price, now);
                        effects.push(self.journal_effect(&intent, now));
                        effects.push(StreamEffect::Event {
                            event_type: EventType::StopModified,
                            payload: json!({ "stop": price, "kind": "BREAK_EVEN" }),
                        });
                    }
                }
            }
            StreamOrderEvent::StopFilled { price } => {
                intent.close(ExitReason::StopHit, price, now);
                effects.push(self.journal_effect(&intent, now));
                effects.push(StreamEffect::Event {
                    event_type: EventType::IntentClosed,
                    payload: json!({
                        "exit": price,
                        "reason": "STOP_HIT",
                        "points": intent.realized_points(),
                        "dollars": self.realized_dollars(&intent),
                    }),
                });
                self.breakeven = None;
                self.intent = Some(intent);
                self.transition(StreamState::Committed, &mut effects);
                return effects;
            }
            StreamOrderEvent::FlattenFilled { price } => {
                // close already journaled at cutoff; this only confirms
                // the venue-side fill
                effects.push(StreamEffect::Event {
                    event_type: EventType::FlattenFillConfirmed,
                    payload: json!({ "fill": price }),
                });
            }
        }

        self.intent = Some(intent);
        effects
    }
}
