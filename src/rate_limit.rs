//! Rate-limited logging and alerting
//!
//! One limiter keyed by (category, key) replaces per-call-site
//! last-logged maps. Categories are static strings ("bar_age_anomaly",
//! "stop_retry", ...); keys identify the instrument, stream or intent.

use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;

/// Minimum-interval limiter with bounded memory.
#[derive(Debug)]
pub struct RateLimiter {
    min_interval: Duration,
    max_entries: usize,
    last_fired: HashMap<(&'static str, String), DateTime<Utc>>,
}

impl RateLimiter {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            max_entries: 1024,
            last_fired: HashMap::new(),
        }
    }

    pub fn with_capacity(min_interval: Duration, max_entries: usize) -> Self {
        Self {
            min_interval,
            max_entries,
            last_fired: HashMap::new(),
        }
    }

    /// Returns true if (category, key) has not fired within the
    /// interval, and records the firing.
    pub fn allow(&mut self, category: &'static str, key: &str, now: DateTime<Utc>) -> bool {
        let map_key = (category, key.to_string());
        match self.last_fired.get(&map_key) {
            Some(last) if now - *last < self.min_interval => false,
            _ => {
                if self.last_fired.len() >= self.max_entries {
                    self.evict_stale(now);
                }
                self.last_fired.insert(map_key, now);
                true
            }
        }
    }

    /// Drop entries old enough that they can no longer suppress
    /// anything. If everything is fresh, drop the oldest instead so a
    /// new key can always be recorded.
    fn evict_stale(&mut self, now: DateTime<Utc>) {
        let cutoff = now - self.min_interval;
        self.last_fired.retain(|_, t| *t > cutoff);

        if self.last_fired.len() >= self.max_entries {
            if let Some(oldest) = self
                .last_fired
                .iter()
                .min_by_key(|(_, t)| **t)
                .map(|(k, _)| k.clone())
            {
                self.last_fired.remove(&oldest);
            }
        }
    }

    #[cfg(test)]
    pub fn tracked(&self) -> usize {
        self.last_fired.len()
    }
}
