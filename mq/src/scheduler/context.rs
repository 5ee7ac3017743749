//! Context the schedule queue runs against
//!
//! Everything the queue consults but does not own: the group list, the
//! admission gate and the timing settings. A context can be swapped between
//! cycles without touching queue state.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::TimeDelta;
use serde::{Deserialize, Serialize};

use crate::admission::AdmissionGate;
use crate::recurrence::Recurrence;

use super::error::ScheduleError;

/// Largest max horizon a context may ask for
pub const MAX_HORIZON_DAYS: i64 = 3650;

/// A configured test group
#[derive(Debug, Clone)]
pub struct TestGroup {
    pub id: String,
    pub recurrence: Arc<dyn Recurrence>,
}

impl TestGroup {
    pub fn new(id: impl Into<String>, recurrence: Arc<dyn Recurrence>) -> Self {
        Self {
            id: id.into(),
            recurrence,
        }
    }
}

/// What to do when an admitted test fails
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RetryPolicy {
    /// Failures are recorded and the schedule carries on
    #[default]
    Never,

    /// Wake up again after `delay_ms` if that is sooner than the next entry
    AfterDelay { delay_ms: i64 },
}

impl RetryPolicy {
    pub fn after(delay: TimeDelta) -> Self {
        Self::AfterDelay {
            delay_ms: delay.num_milliseconds(),
        }
    }
}

/// Timing and budget settings for the queue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduleSettings {
    /// Width of the margin around an instant that still counts as on time
    pub test_start_window: TimeDelta,

    /// Low-water mark: refill when less horizon than this remains
    pub min_horizon: TimeDelta,

    /// Refill target
    pub max_horizon: TimeDelta,

    /// Worst-case bytes a single group run may consume
    pub maximum_test_usage: u64,

    pub retry_policy: RetryPolicy,
}

impl ScheduleSettings {
    /// Half the start window; entries closer than this to `now` are eligible
    pub fn tolerance(&self) -> TimeDelta {
        self.test_start_window / 2
    }
}

impl Default for ScheduleSettings {
    fn default() -> Self {
        Self {
            test_start_window: TimeDelta::hours(1),
            min_horizon: TimeDelta::days(3),
            max_horizon: TimeDelta::days(7),
            maximum_test_usage: 0,
            retry_policy: RetryPolicy::Never,
        }
    }
}

/// Groups, gate and settings for a schedule queue
#[derive(Debug, Clone)]
pub struct TestContext {
    pub groups: Vec<TestGroup>,
    pub gate: Arc<dyn AdmissionGate>,
    pub settings: ScheduleSettings,
}

impl TestContext {
    pub fn new(groups: Vec<TestGroup>, gate: Arc<dyn AdmissionGate>, settings: ScheduleSettings) -> Self {
        Self { groups, gate, settings }
    }

    /// Position of `group_id` in the configured list
    pub fn declaration_order(&self, group_id: &str) -> Option<usize> {
        self.groups.iter().position(|g| g.id == group_id)
    }

    /// Reject contexts the queue cannot run against
    pub fn validate(&self) -> Result<(), ScheduleError> {
        let settings = &self.settings;
        if settings.tolerance() <= TimeDelta::zero() {
            return Err(ScheduleError::InvalidContext("test start window must be positive".to_string()));
        }
        if settings.min_horizon <= TimeDelta::zero() {
            return Err(ScheduleError::InvalidContext("min horizon must be positive".to_string()));
        }
        if settings.min_horizon > settings.max_horizon {
            return Err(ScheduleError::InvalidContext(format!(
                "min horizon ({}d) exceeds max horizon ({}d)",
                settings.min_horizon.num_days(),
                settings.max_horizon.num_days()
            )));
        }
        if settings.max_horizon > TimeDelta::days(MAX_HORIZON_DAYS) {
            return Err(ScheduleError::InvalidContext(format!(
                "max horizon ({}d) exceeds {}d",
                settings.max_horizon.num_days(),
                MAX_HORIZON_DAYS
            )));
        }
        if matches!(settings.retry_policy, RetryPolicy::AfterDelay { delay_ms } if delay_ms <= 0) {
            return Err(ScheduleError::InvalidContext("retry delay must be positive".to_string()));
        }

        let mut seen = HashSet::new();
        for group in &self.groups {
            if !seen.insert(group.id.as_str()) {
                return Err(ScheduleError::InvalidContext(format!("duplicate test group id: {}", group.id)));
            }
        }
        Ok(())
    }
}
