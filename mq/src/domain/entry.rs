//! Scheduled entry type

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One concrete scheduled execution of a test group.
///
/// Entries order by `instant`, then by `declaration_order`. The group id is
/// compared last so that `Ord` agrees with the derived `Eq`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ScheduleEntry {
    /// Scheduled wall-clock time
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub instant: DateTime<Utc>,

    /// Position of the group in the configured list (tie-breaker only)
    pub declaration_order: usize,

    /// Test group to run
    pub group_id: String,
}

impl ScheduleEntry {
    /// Create a new entry
    pub fn new(instant: DateTime<Utc>, group_id: impl Into<String>, declaration_order: usize) -> Self {
        Self {
            instant,
            declaration_order,
            group_id: group_id.into(),
        }
    }
}

impl std::fmt::Display for ScheduleEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} : {}", self.group_id, self.instant.format("%Y-%m-%d %H:%M:%S%.3f"))
    }
}
