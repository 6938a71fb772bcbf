//! Break-even stop supervision
//!
//! Every tick updates a price watermark in O(1); a throttled scan
//! decides whether favorable excursion has crossed the trigger
//! threshold. The resulting stop move is retried at a bounded, jittered
//! rate until the venue acknowledges, because the protective order may
//! not be visible at the instant of crossing. An overdue ack raises a
//! visibility alert without halting management.

use chrono::{DateTime, Duration, Utc};
use rand::Rng;

use crate::execution::Direction;

/// What the throttled scan wants done.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BreakEvenAction {
    /// Move (or re-send) the stop to the break-even price
    MoveStop { new_stop: f64 },
    /// Trigger fired but no ack within the timeout
    RaiseAlert { waited_secs: i64 },
}

#[derive(Debug)]
pub struct BreakEvenSupervisor {
    direction: Direction,
    entry_price: f64,
    tick_size: f64,
    trigger_distance: f64,
    scan_interval: Duration,
    retry_interval: Duration,
    ack_timeout: Duration,

    /// Most favorable traded price since entry
    watermark: f64,
    triggered: bool,
    acked: bool,
    alerted: bool,
    triggered_at: Option<DateTime<Utc>>,
    last_scan_at: Option<DateTime<Utc>>,
    last_send_at: Option<DateTime<Utc>>,
    next_retry_in: Duration,
}

impl BreakEvenSupervisor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        direction: Direction,
        entry_price: f64,
        tick_size: f64,
        target_distance: f64,
        trigger_ratio: f64,
        scan_interval: Duration,
        retry_interval: Duration,
        ack_timeout: Duration,
    ) -> Self {
        Self {
            direction,
            entry_price,
            tick_size,
            trigger_distance: target_distance * trigger_ratio,
            scan_interval,
            retry_interval,
            ack_timeout,
            watermark: entry_price,
            triggered: false,
            acked: false,
            alerted: false,
            triggered_at: None,
            last_scan_at: None,
            last_send_at: None,
            next_retry_in: retry_interval,
        }
    }

    /// One tick beyond entry, in the favorable direction.
    pub fn breakeven_stop(&self) -> f64 {
        match self.direction {
            Direction::Long => self.entry_price + self.tick_size,
            Direction::Short => self.entry_price - self.tick_size,
        }
    }

    /// O(1) per tick regardless of tick rate.
    pub fn update_tick(&mut self, price: f64) {
        match self.direction {
            Direction::Long => {
                if price > self.watermark {
                    self.watermark = price;
                }
            }
            Direction::Short => {
                if price < self.watermark {
                    self.watermark = price;
                }
            }
        }
    }

    pub fn triggered(&self) -> bool {
        self.triggered
    }

    pub fn acked(&self) -> bool {
        self.acked
    }

    /// Venue confirmed the stop sits at break-even.
    pub fn record_ack(&mut self) {
        self.acked = true;
    }

    fn favorable_excursion(&self) -> f64 {
        self.direction.excursion(self.entry_price, self.watermark)
    }

    fn jittered_retry(&self) -> Duration {
        let base = self.retry_interval.num_milliseconds().max(1);
        let spread = (base / 5).max(1); // ±20%
        let offset = rand::thread_rng().gen_range(-spread..=spread);
        Duration::milliseconds(base + offset)
    }

    /// Throttled scan. Returns at most one action; never called off the
    /// stream's lane.
    pub fn scan(&mut self, now: DateTime<Utc>) -> Option<BreakEvenAction> {
        if let Some(last) = self.last_scan_at {
            if now - last < self.scan_interval {
                return None;
            }
        }
        self.last_scan_at = Some(now);

        if !self.triggered {
            if self.favorable_excursion() + 1e-9 < self.trigger_distance {
                return None;
            }
            // Latched for the life of the intent; the stop never reverts
            self.triggered = true;
            self.triggered_at = Some(now);
            self.last_send_at = Some(now);
            return Some(BreakEvenAction::MoveStop { new_stop: self.breakeven_stop() });
        }

        if self.acked {
            return None;
        }

        // Overdue ack degrades to an alert, once; retries continue
        if !self.alerted {
            if let Some(at) = self.triggered_at {
                if now - at >= self.ack_timeout {
                    self.alerted = true;
                    return Some(BreakEvenAction::RaiseAlert {
                        waited_secs: (now - at).num_seconds(),
                    });
                }
            }
        }

        let due = self
            .last_send_at
            .is_none_or(|last| now - last >= self.next_retry_in);
        if due {
            self.last_send_at = Some(now);
            self.next_retry_in = self.jittered_retry();
            return Some(BreakEvenAction::MoveStop { new_stop: self.breakeven_stop() });
        }

        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 2, 14, 0, 0).unwrap() + Duration::seconds(secs)
    }

    fn supervisor(direction: Direction, entry: f64) -> BreakEvenSupervisor {
        BreakEvenSupervisor::new(
            direction,
            entry,
            0.25,
            10.0,
            0.65,
            Duration::milliseconds(250),
            Duration::milliseconds(500),
            Duration::seconds(30),
        )
    }

    #[test]
    fn triggers_at_sixty_five_percent_of_target() {
        let mut sup = supervisor(Direction::Long, 4010.25);
        sup.update_tick(4016.0); // +5.75, below 6.50
        assert_eq!(sup.scan(t(1)), None);

        sup.update_tick(4016.75); // +6.50 exactly
        assert_eq!(
            sup.scan(t(2)),
            Some(BreakEvenAction::MoveStop { new_stop: 4010.50 })
        );
        assert!(sup.triggered());
    }

    #[test]
    fn retreat_after_trigger_does_not_revert() {
        let mut sup = supervisor(Direction::Long, 4010.25);
        sup.update_tick(4016.75);
        assert!(sup.scan(t(1)).is_some());
        sup.record_ack();

        sup.update_tick(4011.0); // retreat below threshold
        assert_eq!(sup.scan(t(10)), None);
        assert!(sup.triggered());
    }

    #[test]
    fn short_breakeven_is_one_tick_below_entry() {
        let mut sup = supervisor(Direction::Short, 3999.75);
        sup.update_tick(3993.25); // -6.50 favorable
        assert_eq!(
            sup.scan(t(1)),
            Some(BreakEvenAction::MoveStop { new_stop: 3999.50 })
        );
    }

    #[test]
    fn scan_is_throttled() {
        let mut sup = supervisor(Direction::Long, 4010.25);
        sup.update_tick(4016.75);
        assert!(sup.scan(t(1)).is_some());

        // unacked: next scan inside the throttle window does nothing
        sup.update_tick(4020.0);
        let within = t(1) + Duration::milliseconds(100);
        assert_eq!(sup.scan(within), None);
    }

    #[test]
    fn unacked_move_is_retried() {
        let mut sup = supervisor(Direction::Long, 4010.25);
        sup.update_tick(4016.75);
        assert!(matches!(sup.scan(t(1)), Some(BreakEvenAction::MoveStop { .. })));

        // retry pacing is 500ms ±20%; after 2s one retry is surely due
        assert!(matches!(sup.scan(t(3)), Some(BreakEvenAction::MoveStop { .. })));
    }

    #[test]
    fn overdue_ack_raises_alert_once_and_keeps_retrying() {
        let mut sup = supervisor(Direction::Long, 4010.25);
        sup.update_tick(4016.75);
        assert!(sup.scan(t(0)).is_some());

        assert!(matches!(
            sup.scan(t(31)),
            Some(BreakEvenAction::RaiseAlert { .. })
        ));
        // after the alert, retries resume and no second alert fires
        assert!(matches!(sup.scan(t(35)), Some(BreakEvenAction::MoveStop { .. })));
        assert!(matches!(sup.scan(t(40)), Some(BreakEvenAction::MoveStop { .. })));
    }

    #[test]
    fn ack_stops_retries() {
        let mut sup = supervisor(Direction::Long, 4010.25);
        sup.update_tick(4016.75);
        assert!(sup.scan(t(0)).is_some());
        sup.record_ack();
        assert_eq!(sup.scan(t(5)), None);
        assert_eq!(sup.scan(t(60)), None);
    }
}
