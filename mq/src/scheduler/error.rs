//! Schedule queue error types

use thiserror::Error;

/// Errors surfaced by the schedule queue.
///
/// Per-entry conditions (missed, denied, failed) never show up here; they are
/// folded into the cycle report.
#[derive(Debug, Error)]
pub enum ScheduleError {
    #[error("Invalid test context: {0}")]
    InvalidContext(String),

    #[error("Corrupt queue snapshot: {0}")]
    CorruptSnapshot(String),
}
