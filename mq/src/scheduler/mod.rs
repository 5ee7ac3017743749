//! Scheduled test execution queue
//!
//! Keeps a rolling horizon of concrete test-group executions, runs whatever
//! is due within the start window on each wake-up, drops what was missed,
//! and tells the caller how long to sleep.

mod context;
mod core;
mod error;
mod queue;

pub use context::{MAX_HORIZON_DAYS, RetryPolicy, ScheduleSettings, TestContext, TestGroup};
pub use core::{QueueSnapshot, ScheduleQueue, is_eligible, is_stale};
pub use error::ScheduleError;
pub use queue::{CycleReport, EntryOutcome, EntryQueue};
