//! Entry queue and cycle report types

use std::cmp::Reverse;
use std::collections::BinaryHeap;

use chrono::TimeDelta;
use serde::{Deserialize, Serialize};

use crate::admission::Admission;
use crate::domain::ScheduleEntry;
use crate::executor::ExecutionOutcome;

/// Min-ordered multiset of scheduled entries
#[derive(Debug, Clone, Default)]
pub struct EntryQueue {
    heap: BinaryHeap<Reverse<ScheduleEntry>>,
}

impl EntryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn peek(&self) -> Option<&ScheduleEntry> {
        self.heap.peek().map(|Reverse(entry)| entry)
    }

    pub fn pop(&mut self) -> Option<ScheduleEntry> {
        self.heap.pop().map(|Reverse(entry)| entry)
    }

    pub fn push(&mut self, entry: ScheduleEntry) {
        self.heap.push(Reverse(entry));
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// Entries in the order they would be popped
    pub fn to_sorted_vec(&self) -> Vec<ScheduleEntry> {
        let mut entries: Vec<_> = self.heap.iter().map(|Reverse(entry)| entry.clone()).collect();
        entries.sort();
        entries
    }

    /// Keep only entries for which `f` returns `Some`, replacing them with the result
    pub fn rebuild<F>(&mut self, mut f: F)
    where
        F: FnMut(ScheduleEntry) -> Option<ScheduleEntry>,
    {
        self.heap = std::mem::take(&mut self.heap)
            .into_iter()
            .filter_map(|Reverse(entry)| f(entry).map(Reverse))
            .collect();
    }
}

impl FromIterator<ScheduleEntry> for EntryQueue {
    fn from_iter<I: IntoIterator<Item = ScheduleEntry>>(iter: I) -> Self {
        Self {
            heap: iter.into_iter().map(Reverse).collect(),
        }
    }
}

/// What happened to one entry taken off the queue during a cycle
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntryOutcome {
    pub entry: ScheduleEntry,
    pub admission: Admission,
    /// `None` when admission was denied
    pub execution: Option<ExecutionOutcome>,
}

impl EntryOutcome {
    pub fn failed(&self) -> bool {
        matches!(self.execution, Some(ExecutionOutcome::Failed { .. }))
    }
}

/// Summary of one execution cycle
#[derive(Debug, Clone)]
pub struct CycleReport {
    /// Missed entries dropped before running anything
    pub pruned: usize,

    /// One record per entry taken off the queue, in run order
    pub outcomes: Vec<EntryOutcome>,

    /// Whether the horizon was refilled
    pub extended: bool,

    /// Time until the next wake-up; negative if an entry is already overdue
    pub sleep: TimeDelta,

    /// True when the retry policy shortened `sleep`
    pub retry_scheduled: bool,
}

impl CycleReport {
    pub fn executed(&self) -> usize {
        self.outcomes.iter().filter(|o| o.execution.is_some()).count()
    }

    pub fn denied(&self) -> usize {
        self.outcomes.iter().filter(|o| !o.admission.is_granted()).count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.iter().filter(|o| o.failed()).count()
    }

    /// Sleep duration clamped to zero for timers that cannot go negative
    pub fn sleep_std(&self) -> std::time::Duration {
        self.sleep.to_std().unwrap_or_default()
    }
}
