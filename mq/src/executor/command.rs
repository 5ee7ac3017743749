//! Shell-command executor
//!
//! Each configured group maps to a shell command. Results for a batch are
//! appended as one JSON line to `<results_dir>/<category>.jsonl`.

use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{ExecutionOutcome, TestExecutor};
use crate::admission::Condition;
use crate::budget::DataCapLedger;

/// What to run for a group and how much data it may consume
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupCommand {
    pub command: String,
    pub usage_bytes: u64,
}

/// Result of one group run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestResult {
    pub run_id: String,
    pub group_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub exit_code: Option<i32>,
    pub outcome: ExecutionOutcome,
}

/// Everything accumulated between `start` and `save`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BatchRecord {
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub results: Vec<TestResult>,
    pub conditions: Vec<Condition>,
    pub failed_conditions: Vec<String>,
}

/// Runs group commands through `sh -c`
#[derive(Debug)]
pub struct CommandExecutor {
    commands: HashMap<String, GroupCommand>,
    ledger: Option<Arc<DataCapLedger>>,
    results_dir: PathBuf,
    batch: BatchRecord,
}

impl CommandExecutor {
    pub fn new(commands: HashMap<String, GroupCommand>, results_dir: impl Into<PathBuf>) -> Self {
        let results_dir = results_dir.into();
        debug!(?results_dir, count = commands.len(), "CommandExecutor::new: called");
        Self {
            commands,
            ledger: None,
            results_dir,
            batch: BatchRecord::default(),
        }
    }

    /// Charge each run's usage against `ledger`
    pub fn with_ledger(mut self, ledger: Arc<DataCapLedger>) -> Self {
        self.ledger = Some(ledger);
        self
    }

    /// The batch accumulated since the last save
    pub fn pending(&self) -> &BatchRecord {
        &self.batch
    }

    pub fn results_file(&self, category: &str) -> PathBuf {
        self.results_dir.join(format!("{}.jsonl", category))
    }
}

impl TestExecutor for CommandExecutor {
    fn start(&mut self) {
        debug!("CommandExecutor::start: called");
        self.batch = BatchRecord {
            started_at: Some(Utc::now()),
            ..Default::default()
        };
    }

    fn execute_group(&mut self, group_id: &str) -> ExecutionOutcome {
        debug!(%group_id, "CommandExecutor::execute_group: called");
        let started_at = Utc::now();

        let Some(group) = self.commands.get(group_id) else {
            warn!(%group_id, "No command configured for test group");
            let outcome = ExecutionOutcome::failed(format!("no command configured for group {}", group_id));
            self.batch.results.push(TestResult {
                run_id: Uuid::now_v7().to_string(),
                group_id: group_id.to_string(),
                started_at,
                finished_at: Utc::now(),
                exit_code: None,
                outcome: outcome.clone(),
            });
            return outcome;
        };

        info!(%group_id, command = %group.command, "Running test group");
        let (exit_code, outcome) = match Command::new("sh").arg("-c").arg(&group.command).output() {
            Ok(output) if output.status.success() => {
                debug!(%group_id, "CommandExecutor::execute_group: command succeeded");
                (output.status.code(), ExecutionOutcome::Succeeded)
            }
            Ok(output) => {
                let stderr = String::from_utf8_lossy(&output.stderr);
                debug!(%group_id, status = ?output.status, "CommandExecutor::execute_group: command failed");
                (
                    output.status.code(),
                    ExecutionOutcome::failed(format!("{}: {}", output.status, stderr.trim())),
                )
            }
            Err(e) => {
                warn!(%group_id, error = %e, "Failed to spawn test command");
                (None, ExecutionOutcome::failed(format!("failed to spawn command: {}", e)))
            }
        };

        if let Some(ledger) = &self.ledger {
            ledger.record_usage(group.usage_bytes);
        }

        self.batch.results.push(TestResult {
            run_id: Uuid::now_v7().to_string(),
            group_id: group_id.to_string(),
            started_at,
            finished_at: Utc::now(),
            exit_code,
            outcome: outcome.clone(),
        });
        outcome
    }

    fn add_condition(&mut self, condition: Condition) {
        debug!(?condition, "CommandExecutor::add_condition: called");
        self.batch.conditions.push(condition);
    }

    fn add_failed_condition(&mut self, name: &str) {
        debug!(%name, "CommandExecutor::add_failed_condition: called");
        self.batch.failed_conditions.push(name.to_string());
    }

    fn stop(&mut self) {
        debug!("CommandExecutor::stop: called");
        self.batch.finished_at = Some(Utc::now());
    }

    fn save(&mut self, category: &str) -> Result<()> {
        debug!(%category, "CommandExecutor::save: called");
        fs::create_dir_all(&self.results_dir).context("Failed to create results directory")?;

        let path = self.results_file(category);
        let line = serde_json::to_string(&self.batch)? + "\n";
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .context(format!("Failed to open results file {}", path.display()))?;
        file.write_all(line.as_bytes())?;
        file.flush()?;

        info!(
            results = self.batch.results.len(),
            path = %path.display(),
            "Saved test batch"
        );
        self.batch = BatchRecord::default();
        Ok(())
    }
}

/// Read back every saved batch for `category`; unparseable lines are skipped
pub fn read_batches(results_dir: &Path, category: &str) -> Result<Vec<BatchRecord>> {
    debug!(?results_dir, %category, "read_batches: called");
    let path = results_dir.join(format!("{}.jsonl", category));
    if !path.exists() {
        debug!("read_batches: results file does not exist");
        return Ok(Vec::new());
    }

    let content = fs::read_to_string(&path).context(format!("Failed to read {}", path.display()))?;
    Ok(content
        .lines()
        .filter_map(|line| serde_json::from_str(line).ok())
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::admission::Admission;
    use tempfile::TempDir;

    fn executor(dir: &Path) -> CommandExecutor {
        let mut commands = HashMap::new();
        commands.insert(
            "ok".to_string(),
            GroupCommand {
                command: "true".to_string(),
                usage_bytes: 10,
            },
        );
        commands.insert(
            "broken".to_string(),
            GroupCommand {
                command: "echo boom >&2; exit 3".to_string(),
                usage_bytes: 5,
            },
        );
        CommandExecutor::new(commands, dir)
    }

    #[test]
    fn test_execute_success_and_failure() {
        let temp_dir = TempDir::new().unwrap();
        let mut exec = executor(temp_dir.path());

        exec.start();
        assert_eq!(exec.execute_group("ok"), ExecutionOutcome::Succeeded);

        match exec.execute_group("broken") {
            ExecutionOutcome::Failed { reason } => assert!(reason.contains("boom")),
            other => panic!("expected failure, got {:?}", other),
        }

        let results = &exec.pending().results;
        assert_eq!(results.len(), 2);
        assert_eq!(results[1].exit_code, Some(3));
    }

    #[test]
    fn test_unknown_group_fails() {
        let temp_dir = TempDir::new().unwrap();
        let mut exec = executor(temp_dir.path());
        exec.start();
        assert!(!exec.execute_group("missing").is_success());
        assert_eq!(exec.pending().results[0].exit_code, None);
    }

    #[test]
    fn test_usage_charged_to_ledger() {
        let temp_dir = TempDir::new().unwrap();
        let ledger = Arc::new(DataCapLedger::new(Some(1_000), Utc::now()));
        let mut exec = executor(temp_dir.path()).with_ledger(ledger.clone());

        exec.start();
        exec.execute_group("ok");
        exec.execute_group("broken");
        assert_eq!(ledger.used_bytes(), 15);
    }

    #[test]
    fn test_save_appends_batches() {
        let temp_dir = TempDir::new().unwrap();
        let mut exec = executor(temp_dir.path());

        exec.start();
        exec.execute_group("ok");
        exec.add_condition(Admission::Granted.condition());
        exec.stop();
        exec.save("scheduled_tests").unwrap();

        exec.start();
        exec.add_failed_condition("DATACAP");
        exec.stop();
        exec.save("scheduled_tests").unwrap();

        let batches = read_batches(temp_dir.path(), "scheduled_tests").unwrap();
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[0].results.len(), 1);
        assert_eq!(batches[0].conditions.len(), 1);
        assert_eq!(batches[1].failed_conditions, vec!["DATACAP".to_string()]);
        assert!(exec.pending().results.is_empty());
    }

    #[test]
    fn test_read_batches_missing_file() {
        let temp_dir = TempDir::new().unwrap();
        assert!(read_batches(temp_dir.path(), "nothing").unwrap().is_empty());
    }
}
