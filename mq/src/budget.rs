//! Data-usage budget
//!
//! The scheduler never measures traffic itself. It consults a [`BudgetCheck`]
//! once per eligible entry; [`DataCapLedger`] is the monthly implementation
//! the binary uses.

use std::fmt;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use chrono::{DateTime, Datelike, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Answers "would one more test breach the cap?"
pub trait BudgetCheck: Send + Sync + fmt::Debug {
    /// True when running a test that may use up to `maximum_test_usage` bytes
    /// would exceed the remaining budget
    fn is_reached(&self, maximum_test_usage: u64) -> bool;
}

/// Monthly data-cap ledger.
///
/// Usage is accumulated with atomics so the executor can record while the
/// admission gate reads. The counter resets when the UTC calendar month
/// changes, see [`DataCapLedger::roll_over`].
#[derive(Debug)]
pub struct DataCapLedger {
    /// `None` means no cap is configured
    cap_bytes: Option<u64>,
    used_bytes: AtomicU64,
    period: AtomicU32,
}

/// Serializable form of the ledger
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerSnapshot {
    pub used_bytes: u64,
    pub period: u32,
}

fn period_of(now: DateTime<Utc>) -> u32 {
    (now.year().max(0) as u32) * 12 + now.month0()
}

impl DataCapLedger {
    pub fn new(cap_bytes: Option<u64>, now: DateTime<Utc>) -> Self {
        debug!(?cap_bytes, "DataCapLedger::new: called");
        Self {
            cap_bytes,
            used_bytes: AtomicU64::new(0),
            period: AtomicU32::new(period_of(now)),
        }
    }

    /// Rebuild a ledger from a snapshot; the cap always comes from configuration
    pub fn restore(cap_bytes: Option<u64>, snapshot: LedgerSnapshot, now: DateTime<Utc>) -> Self {
        debug!(?cap_bytes, ?snapshot, "DataCapLedger::restore: called");
        let ledger = Self {
            cap_bytes,
            used_bytes: AtomicU64::new(snapshot.used_bytes),
            period: AtomicU32::new(snapshot.period),
        };
        ledger.roll_over(now);
        ledger
    }

    pub fn snapshot(&self) -> LedgerSnapshot {
        LedgerSnapshot {
            used_bytes: self.used_bytes.load(Ordering::Relaxed),
            period: self.period.load(Ordering::Relaxed),
        }
    }

    pub fn cap_bytes(&self) -> Option<u64> {
        self.cap_bytes
    }

    pub fn used_bytes(&self) -> u64 {
        self.used_bytes.load(Ordering::Relaxed)
    }

    /// Record traffic consumed by a test run
    pub fn record_usage(&self, bytes: u64) {
        debug!(%bytes, "DataCapLedger::record_usage: called");
        self.used_bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    /// Reset usage when `now` falls in a later month than the ledger's period.
    /// Returns true if a reset happened.
    pub fn roll_over(&self, now: DateTime<Utc>) -> bool {
        let current = period_of(now);
        let previous = self.period.load(Ordering::Relaxed);
        if current > previous
            && self
                .period
                .compare_exchange(previous, current, Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
        {
            let used = self.used_bytes.swap(0, Ordering::AcqRel);
            info!(used_bytes = used, "Data cap period rolled over, usage reset");
            return true;
        }
        false
    }
}

impl BudgetCheck for DataCapLedger {
    fn is_reached(&self, maximum_test_usage: u64) -> bool {
        match self.cap_bytes {
            None => {
                debug!("DataCapLedger::is_reached: no cap configured");
                false
            }
            Some(cap) => {
                let used = self.used_bytes.load(Ordering::Relaxed);
                let reached = used.saturating_add(maximum_test_usage) > cap;
                debug!(%used, %cap, %maximum_test_usage, %reached, "DataCapLedger::is_reached: checked");
                reached
            }
        }
    }
}
