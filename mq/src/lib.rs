//! MeasureQueue - rolling execution queue for periodic measurement tests
//!
//! Test groups declare when they recur; the queue materializes those
//! instants over a forward horizon and, on every wake-up, decides which
//! entries were missed, which may run now, and how long to sleep.
//!
//! # Modules
//!
//! - [`scheduler`] - the schedule queue and its execution cycle
//! - [`domain`] - entry and window types
//! - [`recurrence`] - recurrence computation for test groups
//! - [`admission`] - admission gating before a test runs
//! - [`budget`] - data-cap ledger
//! - [`executor`] - test execution seam and the shell-command executor
//! - [`store`] - durable queue state
//! - [`host`] - glue used by the `mq` binary
//! - [`config`] - configuration types and loading
//! - [`cli`] - command-line interface

pub mod admission;
pub mod budget;
pub mod cli;
pub mod config;
pub mod domain;
pub mod executor;
pub mod host;
pub mod recurrence;
pub mod scheduler;
pub mod store;

// Re-export commonly used types
pub use admission::{Admission, AdmissionGate, Condition, DataCapGate, DenialReason};
pub use budget::{BudgetCheck, DataCapLedger, LedgerSnapshot};
pub use config::Config;
pub use domain::{ScheduleEntry, ScheduleWindow};
pub use executor::{CommandExecutor, ExecutionOutcome, SCHEDULED_TESTS, TestExecutor};
pub use host::{Host, QueueStatus};
pub use recurrence::{Daily, Every, Recurrence};
pub use scheduler::{
    CycleReport, EntryOutcome, QueueSnapshot, RetryPolicy, ScheduleError, ScheduleQueue, ScheduleSettings,
    TestContext, TestGroup,
};
pub use store::{PersistedState, QueueStore, StoreError};
