//! Hosting process glue
//!
//! Wires configuration, the data-cap ledger, the shell executor and the state
//! store around a [`ScheduleQueue`]. The binary drives a [`Host`] from its
//! timer loop; everything here is synchronous.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use eyre::{Context, Result};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::admission::DataCapGate;
use crate::budget::DataCapLedger;
use crate::config::Config;
use crate::domain::ScheduleEntry;
use crate::executor::CommandExecutor;
use crate::scheduler::{CycleReport, ScheduleQueue};
use crate::store::{PersistedState, QueueStore, StateLock};

/// Queue overview for `mq status`
#[derive(Debug, Clone, Serialize)]
pub struct QueueStatus {
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub size: usize,
    pub next: Vec<ScheduleEntry>,
    pub data_used_bytes: u64,
    pub data_cap_bytes: Option<u64>,
}

/// A schedule queue together with the collaborators it runs against.
///
/// A writable host holds the state directory's [`StateLock`] until it is
/// dropped; a read-only host never locks and never saves.
#[derive(Debug)]
pub struct Host {
    queue: ScheduleQueue,
    ledger: Arc<DataCapLedger>,
    executor: CommandExecutor,
    store: QueueStore,
    lock: Option<StateLock>,
}

impl Host {
    /// Lock the state directory, then restore persisted state for `config`
    /// or start a fresh queue. Fails fast if another process holds the lock.
    pub fn open(config: &Config, now: DateTime<Utc>) -> Result<Self> {
        debug!(%now, "Host::open: called");
        config.validate()?;
        let store = QueueStore::new(&config.storage.state_dir);
        let lock = store.lock().context("Failed to lock queue state")?;

        let host = Self::build(config, store, Some(lock), now)?;
        host.persist()?;
        Ok(host)
    }

    /// Load state for inspection without locking or saving anything
    pub fn open_read_only(config: &Config, now: DateTime<Utc>) -> Result<Self> {
        debug!(%now, "Host::open_read_only: called");
        config.validate()?;
        let store = QueueStore::new(&config.storage.state_dir);
        Self::build(config, store, None, now)
    }

    fn build(config: &Config, store: QueueStore, lock: Option<StateLock>, now: DateTime<Utc>) -> Result<Self> {
        let persisted = match store.load() {
            Ok(state) => state,
            Err(e) => {
                warn!(error = %e, "Discarding unreadable queue state");
                None
            }
        };

        let cap_bytes = config.cap_bytes()?;
        let (ledger, queue) = match persisted {
            Some(state) => {
                debug!("Host::build: restoring persisted state");
                let ledger = Arc::new(DataCapLedger::restore(cap_bytes, state.ledger, now));
                let context = config.to_context(Arc::new(DataCapGate::new(ledger.clone())))?;
                let queue = state.queue.attach(context).context("Failed to restore queue state")?;
                info!(size = queue.len(), "Restored test queue");
                (ledger, queue)
            }
            None => {
                debug!("Host::build: no persisted state, building new queue");
                let ledger = Arc::new(DataCapLedger::new(cap_bytes, now));
                let context = config.to_context(Arc::new(DataCapGate::new(ledger.clone())))?;
                let queue = ScheduleQueue::new(context, now).context("Failed to create test queue")?;
                info!(size = queue.len(), "Created test queue");
                (ledger, queue)
            }
        };

        let executor =
            CommandExecutor::new(config.group_commands()?, config.storage.results_dir()).with_ledger(ledger.clone());

        Ok(Self {
            queue,
            ledger,
            executor,
            store,
            lock,
        })
    }

    pub fn queue(&self) -> &ScheduleQueue {
        &self.queue
    }

    pub fn is_read_only(&self) -> bool {
        self.lock.is_none()
    }

    fn ensure_writable(&self) -> Result<()> {
        if self.is_read_only() {
            return Err(eyre::eyre!(
                "Queue state in {} was opened read-only",
                self.store.state_dir().display()
            ));
        }
        Ok(())
    }

    /// Run one execution cycle and persist the result
    pub fn cycle(&mut self, now: DateTime<Utc>) -> Result<CycleReport> {
        debug!(%now, "Host::cycle: called");
        self.ensure_writable()?;
        self.ledger.roll_over(now);
        let report = self.queue.run_cycle(now, &mut self.executor);
        self.persist()?;
        Ok(report)
    }

    /// Apply a reloaded configuration without losing queue state
    pub fn reload(&mut self, config: &Config, now: DateTime<Utc>) -> Result<()> {
        debug!("Host::reload: called");
        self.ensure_writable()?;
        config.validate()?;

        let store = QueueStore::new(&config.storage.state_dir);
        let moved_lock = if store.state_dir() != self.store.state_dir() {
            debug!(state_dir = ?store.state_dir(), "Host::reload: state directory changed");
            Some(store.lock().context("Failed to lock new queue state directory")?)
        } else {
            None
        };

        let ledger = Arc::new(DataCapLedger::restore(config.cap_bytes()?, self.ledger.snapshot(), now));
        let context = config.to_context(Arc::new(DataCapGate::new(ledger.clone())))?;
        let executor =
            CommandExecutor::new(config.group_commands()?, config.storage.results_dir()).with_ledger(ledger.clone());
        self.queue.set_context(context)?;

        self.executor = executor;
        self.ledger = ledger;
        self.store = store;
        if let Some(lock) = moved_lock {
            self.lock = Some(lock);
        }

        info!(groups = config.test_groups.len(), size = self.queue.len(), "Configuration reloaded");
        self.persist()
    }

    pub fn status(&self, limit: usize) -> QueueStatus {
        let window = self.queue.window();
        let entries = self.queue.entries();
        QueueStatus {
            window_start: window.start(),
            window_end: window.end(),
            size: entries.len(),
            next: entries.into_iter().take(limit).collect(),
            data_used_bytes: self.ledger.used_bytes(),
            data_cap_bytes: self.ledger.cap_bytes(),
        }
    }

    fn persist(&self) -> Result<()> {
        let state = PersistedState {
            queue: self.queue.snapshot(),
            ledger: self.ledger.snapshot(),
        };
        self.store.save(&state).context("Failed to persist queue state")?;
        Ok(())
    }
}
