//! Materialized schedule horizon

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

/// The `[start, end)` span currently materialized into the queue.
///
/// Both bounds only ever move forward and `start <= end` always holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleWindow {
    #[serde(with = "chrono::serde::ts_milliseconds")]
    start: DateTime<Utc>,

    #[serde(with = "chrono::serde::ts_milliseconds")]
    end: DateTime<Utc>,
}

impl ScheduleWindow {
    /// Create an empty window anchored at `now`
    pub fn starting_at(now: DateTime<Utc>) -> Self {
        Self { start: now, end: now }
    }

    pub fn start(&self) -> DateTime<Utc> {
        self.start
    }

    pub fn end(&self) -> DateTime<Utc> {
        self.end
    }

    /// Horizon still ahead of `now` (negative once the window has lapsed)
    pub fn remaining(&self, now: DateTime<Utc>) -> TimeDelta {
        self.end - now
    }

    /// Advance the window towards `new_end` and return the span to fill.
    ///
    /// The fill span starts at `max(end, now)` so nothing already covered or
    /// already past is materialized twice, and no gap is left behind.
    pub fn advance(&mut self, new_end: DateTime<Utc>, now: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
        let fill_start = self.end.max(now);
        let fill_end = new_end.max(fill_start);
        self.start = fill_start;
        self.end = fill_end;
        (fill_start, fill_end)
    }

    /// A restored window is only usable if its bounds are ordered
    pub(crate) fn is_well_formed(&self) -> bool {
        self.start <= self.end
    }
}
