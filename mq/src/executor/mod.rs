//! Test execution seam
//!
//! The schedule queue drives an executor through a start / execute / stop /
//! save lifecycle around each batch of due entries. How a group actually runs
//! and where its results end up is up to the implementation.

mod command;

pub use command::{BatchRecord, CommandExecutor, GroupCommand, TestResult, read_batches};

use serde::{Deserialize, Serialize};

use crate::admission::Condition;

/// Category under which scheduled batches are saved
pub const SCHEDULED_TESTS: &str = "scheduled_tests";

/// How a single group execution went
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ExecutionOutcome {
    Succeeded,
    Failed { reason: String },
}

impl ExecutionOutcome {
    pub fn failed(reason: impl Into<String>) -> Self {
        Self::Failed { reason: reason.into() }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded)
    }
}

/// Runs test groups on behalf of the schedule queue
pub trait TestExecutor {
    /// Begin a batch
    fn start(&mut self);

    /// Run one group synchronously
    fn execute_group(&mut self, group_id: &str) -> ExecutionOutcome;

    /// Attach a condition record to the current batch
    fn add_condition(&mut self, condition: Condition);

    /// Mark a named condition as failed for the current batch
    fn add_failed_condition(&mut self, name: &str);

    /// End the batch
    fn stop(&mut self);

    /// Persist the accumulated batch under `category`
    fn save(&mut self, category: &str) -> eyre::Result<()>;
}
