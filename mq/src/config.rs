//! MeasureQueue configuration types and loading

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::TimeDelta;
use eyre::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::admission::AdmissionGate;
use crate::executor::GroupCommand;
use crate::recurrence::{Daily, Every, Recurrence};
use crate::scheduler::{MAX_HORIZON_DAYS, RetryPolicy, ScheduleSettings, TestContext, TestGroup};

const BYTES_PER_MB: u64 = 1024 * 1024;

fn mb_to_bytes(mb: u64, field: &str) -> Result<u64> {
    mb.checked_mul(BYTES_PER_MB)
        .ok_or_else(|| eyre::eyre!("{} is too large: {} MB", field, mb))
}

fn secs_to_delta(secs: u64, field: &str) -> Result<TimeDelta> {
    i64::try_from(secs)
        .ok()
        .and_then(TimeDelta::try_seconds)
        .ok_or_else(|| eyre::eyre!("{} is too large: {}s", field, secs))
}

/// Main configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Queue timing
    pub schedule: ScheduleConfig,

    /// Data budget
    #[serde(rename = "data-cap")]
    pub data_cap: DataCapConfig,

    /// Reschedule after a failed test
    #[serde(rename = "retry-fail-action")]
    pub retry_fail_action: Option<RetryFailAction>,

    /// Where state and results live
    pub storage: StorageConfig,

    /// Ordered list of test groups; order breaks ties between equal instants
    #[serde(rename = "test-groups")]
    pub test_groups: Vec<TestGroupConfig>,
}

impl Config {
    /// Load configuration with fallback chain
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        // If explicit config path provided, try to load it
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        // Try project-local config: .measurequeue.yml
        let local_config = PathBuf::from(".measurequeue.yml");
        if local_config.exists() {
            match Self::load_from_file(&local_config) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    tracing::warn!("Failed to load config from {}: {}", local_config.display(), e);
                }
            }
        }

        // Try user config: ~/.config/measurequeue/measurequeue.yml
        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("measurequeue").join("measurequeue.yml");
            if user_config.exists() {
                match Self::load_from_file(&user_config) {
                    Ok(config) => return Ok(config),
                    Err(e) => {
                        tracing::warn!("Failed to load config from {}: {}", user_config.display(), e);
                    }
                }
            }
        }

        tracing::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;

        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;
        config.validate()?;

        tracing::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }

    /// Validate configuration before use
    pub fn validate(&self) -> Result<()> {
        if self.schedule.test_start_window_secs == 0 {
            return Err(eyre::eyre!("schedule.test-start-window-secs must be positive"));
        }
        if self.schedule.min_horizon_days == 0 || self.schedule.min_horizon_days > self.schedule.max_horizon_days {
            return Err(eyre::eyre!(
                "schedule horizons must satisfy 0 < min-horizon-days ({}) <= max-horizon-days ({})",
                self.schedule.min_horizon_days,
                self.schedule.max_horizon_days
            ));
        }
        if i64::from(self.schedule.max_horizon_days) > MAX_HORIZON_DAYS {
            return Err(eyre::eyre!(
                "schedule.max-horizon-days ({}) must not exceed {}",
                self.schedule.max_horizon_days,
                MAX_HORIZON_DAYS
            ));
        }
        if self.retry_fail_action.as_ref().is_some_and(|retry| retry.delay_secs == 0) {
            return Err(eyre::eyre!("retry-fail-action.delay-secs must be positive"));
        }
        self.settings()?;
        self.cap_bytes()?;
        self.group_commands()?;

        let mut seen = HashSet::new();
        for group in &self.test_groups {
            if group.id.trim().is_empty() {
                return Err(eyre::eyre!("test group id must not be empty"));
            }
            if !seen.insert(group.id.as_str()) {
                return Err(eyre::eyre!("duplicate test group id: {}", group.id));
            }
            group
                .schedule
                .build()
                .context(format!("Invalid schedule for test group {}", group.id))?;
        }
        Ok(())
    }

    /// Timing settings for the schedule queue
    pub fn settings(&self) -> Result<ScheduleSettings> {
        let horizon_days = |days: u32, field: &str| {
            TimeDelta::try_days(i64::from(days)).ok_or_else(|| eyre::eyre!("{} is too large: {}", field, days))
        };

        Ok(ScheduleSettings {
            test_start_window: secs_to_delta(self.schedule.test_start_window_secs, "schedule.test-start-window-secs")?,
            min_horizon: horizon_days(self.schedule.min_horizon_days, "schedule.min-horizon-days")?,
            max_horizon: horizon_days(self.schedule.max_horizon_days, "schedule.max-horizon-days")?,
            maximum_test_usage: mb_to_bytes(self.data_cap.maximum_test_usage_mb, "data-cap.maximum-test-usage-mb")?,
            retry_policy: match &self.retry_fail_action {
                Some(retry) => RetryPolicy::after(secs_to_delta(retry.delay_secs, "retry-fail-action.delay-secs")?),
                None => RetryPolicy::Never,
            },
        })
    }

    /// Build the context the schedule queue runs against
    pub fn to_context(&self, gate: Arc<dyn AdmissionGate>) -> Result<TestContext> {
        let groups = self
            .test_groups
            .iter()
            .map(|g| {
                let recurrence = g
                    .schedule
                    .build()
                    .context(format!("Invalid schedule for test group {}", g.id))?;
                Ok(TestGroup::new(g.id.clone(), recurrence))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(TestContext::new(groups, gate, self.settings()?))
    }

    /// Commands for the shell executor, keyed by group id
    pub fn group_commands(&self) -> Result<HashMap<String, GroupCommand>> {
        self.test_groups
            .iter()
            .map(|g| -> Result<(String, GroupCommand)> {
                let usage_bytes = mb_to_bytes(g.usage_mb, &format!("usage-mb of test group {}", g.id))?;
                Ok((
                    g.id.clone(),
                    GroupCommand {
                        command: g.command.clone(),
                        usage_bytes,
                    },
                ))
            })
            .collect()
    }

    /// Data cap in bytes, if any
    pub fn cap_bytes(&self) -> Result<Option<u64>> {
        self.data_cap
            .cap_mb
            .map(|mb| mb_to_bytes(mb, "data-cap.cap-mb"))
            .transpose()
    }
}

/// Queue timing
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    /// Margin around an instant that still counts as on time
    #[serde(rename = "test-start-window-secs")]
    pub test_start_window_secs: u64,

    /// Refill when less than this many days are materialized
    #[serde(rename = "min-horizon-days")]
    pub min_horizon_days: u32,

    /// Refill up to this many days ahead
    #[serde(rename = "max-horizon-days")]
    pub max_horizon_days: u32,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            test_start_window_secs: 3600,
            min_horizon_days: 3,
            max_horizon_days: 7,
        }
    }
}

/// Data budget
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DataCapConfig {
    /// Monthly cap in MB; no cap when absent
    #[serde(rename = "cap-mb")]
    pub cap_mb: Option<u64>,

    /// Worst-case usage of a single group run in MB
    #[serde(rename = "maximum-test-usage-mb")]
    pub maximum_test_usage_mb: u64,
}

/// Reschedule after a failed test
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryFailAction {
    #[serde(rename = "delay-secs")]
    pub delay_secs: u64,
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory for queue state and results
    #[serde(rename = "state-dir")]
    pub state_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            state_dir: dirs::data_local_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("measurequeue"),
        }
    }
}

impl StorageConfig {
    pub fn results_dir(&self) -> PathBuf {
        self.state_dir.join("results")
    }
}

/// A configured test group
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestGroupConfig {
    pub id: String,

    pub schedule: RecurrenceConfig,

    /// Shell command that runs the group
    pub command: String,

    /// Data the group consumes per run, in MB
    #[serde(rename = "usage-mb", default)]
    pub usage_mb: u64,
}

/// When a group runs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum RecurrenceConfig {
    /// Fixed period anchored at the epoch plus an offset
    Every {
        #[serde(rename = "period-secs")]
        period_secs: u64,

        #[serde(rename = "offset-secs", default)]
        offset_secs: u64,
    },

    /// UTC times of day, `HH:MM` or `HH:MM:SS`
    Daily { times: Vec<String> },
}

impl RecurrenceConfig {
    pub fn build(&self) -> Result<Arc<dyn Recurrence>> {
        match self {
            Self::Every {
                period_secs,
                offset_secs,
            } => {
                let every = Every::new(
                    secs_to_delta(*period_secs, "period-secs")?,
                    secs_to_delta(*offset_secs, "offset-secs")?,
                )
                .ok_or_else(|| eyre::eyre!("period-secs must be positive"))?;
                Ok(Arc::new(every))
            }
            Self::Daily { times } => {
                if times.is_empty() {
                    return Err(eyre::eyre!("daily schedule needs at least one time"));
                }
                let parsed = times
                    .iter()
                    .map(|t| Daily::parse_time(t).ok_or_else(|| eyre::eyre!("invalid time of day: {}", t)))
                    .collect::<Result<Vec<_>>>()?;
                Ok(Arc::new(Daily::new(parsed)))
            }
        }
    }
}
