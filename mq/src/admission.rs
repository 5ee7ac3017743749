//! Admission gating before a test runs

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::budget::BudgetCheck;

/// Condition name recorded for data-cap admission decisions
pub const DATACAP: &str = "DATACAP";

/// Why an entry was not admitted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DenialReason {
    /// Running the test could breach the data cap
    DataCapReached,
}

impl DenialReason {
    /// Name of the failed condition recorded with the results
    pub fn condition_name(&self) -> &'static str {
        match self {
            Self::DataCapReached => DATACAP,
        }
    }
}

impl fmt::Display for DenialReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DataCapReached => write!(f, "data cap reached"),
        }
    }
}

/// Result of consulting an [`AdmissionGate`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Admission {
    Granted,
    Denied { reason: DenialReason },
}

impl Admission {
    pub fn is_granted(&self) -> bool {
        matches!(self, Self::Granted)
    }

    /// Condition record attached to the cycle's results for this decision
    pub fn condition(&self) -> Condition {
        match self {
            Self::Granted => Condition {
                name: DATACAP.to_string(),
                success: true,
            },
            Self::Denied { reason } => Condition {
                name: reason.condition_name().to_string(),
                success: false,
            },
        }
    }
}

/// A named precondition and whether it held
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Condition {
    pub name: String,
    pub success: bool,
}

/// Precondition consulted once per execution attempt
pub trait AdmissionGate: Send + Sync + fmt::Debug {
    fn admit(&self, maximum_test_usage: u64) -> Admission;
}

/// Admits while the data budget has room for one more test
#[derive(Debug, Clone)]
pub struct DataCapGate {
    budget: Arc<dyn BudgetCheck>,
}

impl DataCapGate {
    pub fn new(budget: Arc<dyn BudgetCheck>) -> Self {
        Self { budget }
    }
}

impl AdmissionGate for DataCapGate {
    fn admit(&self, maximum_test_usage: u64) -> Admission {
        debug!(%maximum_test_usage, "DataCapGate::admit: called");
        if self.budget.is_reached(maximum_test_usage) {
            debug!("DataCapGate::admit: budget reached, denying");
            Admission::Denied {
                reason: DenialReason::DataCapReached,
            }
        } else {
            Admission::Granted
        }
    }
}
