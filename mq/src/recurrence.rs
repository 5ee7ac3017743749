//! Recurrence computation for test groups
//!
//! A recurrence turns a half-open interval `[start, end)` into the ordered
//! instants at which a group should run. Implementations must be pure and
//! deterministic: the queue may ask for overlapping or adjacent intervals and
//! relies on getting the same answer every time.

use std::fmt;

use chrono::{DateTime, NaiveTime, TimeDelta, Utc};
use tracing::debug;

/// Produces the instants a test group runs at
pub trait Recurrence: Send + Sync + fmt::Debug {
    /// All instants `t` with `start <= t < end`, ascending
    fn times_in_interval(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Vec<DateTime<Utc>>;
}

/// Fixed period, anchored at the Unix epoch plus an offset
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Every {
    period: TimeDelta,
    offset: TimeDelta,
}

impl Every {
    /// Returns `None` for a period shorter than one millisecond
    pub fn new(period: TimeDelta, offset: TimeDelta) -> Option<Self> {
        if period < TimeDelta::milliseconds(1) {
            return None;
        }
        Some(Self { period, offset })
    }

    pub fn period(&self) -> TimeDelta {
        self.period
    }
}

impl Recurrence for Every {
    fn times_in_interval(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Vec<DateTime<Utc>> {
        debug!(%start, %end, period = ?self.period, "Every::times_in_interval: called");
        let period = self.period.num_milliseconds();
        // reduced into [0, period) so large offsets cannot overflow below
        let anchor = self.offset.num_milliseconds().rem_euclid(period);
        let start_ms = start.timestamp_millis();
        let end_ms = end.timestamp_millis();

        let mut t = anchor + (start_ms - anchor).div_euclid(period) * period;
        if t < start_ms {
            t += period;
        }

        let mut times = Vec::new();
        while t < end_ms {
            if let Some(instant) = DateTime::from_timestamp_millis(t) {
                times.push(instant);
            }
            match t.checked_add(period) {
                Some(next) => t = next,
                None => break,
            }
        }
        times
    }
}

/// A fixed set of UTC times of day, repeated every day
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Daily {
    times: Vec<NaiveTime>,
}

impl Daily {
    pub fn new(mut times: Vec<NaiveTime>) -> Self {
        times.sort();
        times.dedup();
        Self { times }
    }

    /// Parse `HH:MM:SS` or `HH:MM`
    pub fn parse_time(s: &str) -> Option<NaiveTime> {
        NaiveTime::parse_from_str(s, "%H:%M:%S")
            .or_else(|_| NaiveTime::parse_from_str(s, "%H:%M"))
            .ok()
    }
}

impl Recurrence for Daily {
    fn times_in_interval(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Vec<DateTime<Utc>> {
        debug!(%start, %end, count = self.times.len(), "Daily::times_in_interval: called");
        let mut times = Vec::new();
        if start >= end || self.times.is_empty() {
            return times;
        }

        let last_day = end.date_naive();
        let mut day = start.date_naive();
        while day <= last_day {
            for time in &self.times {
                let instant = day.and_time(*time).and_utc();
                if instant >= start && instant < end {
                    times.push(instant);
                }
            }
            match day.succ_opt() {
                Some(next) => day = next,
                None => break,
            }
        }
        times
    }
}
