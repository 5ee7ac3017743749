//! Schedule queue implementation

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::admission::Admission;
use crate::domain::{ScheduleEntry, ScheduleWindow};
use crate::executor::{ExecutionOutcome, SCHEDULED_TESTS, TestExecutor};

use super::context::{RetryPolicy, ScheduleSettings, TestContext};
use super::error::ScheduleError;
use super::queue::{CycleReport, EntryOutcome, EntryQueue};

/// An entry may run while it is strictly closer than `tolerance` to `now`
pub fn is_eligible(entry: &ScheduleEntry, now: DateTime<Utc>, tolerance: TimeDelta) -> bool {
    (entry.instant - now).abs() < tolerance
}

/// A missed entry: out of tolerance and already in the past
pub fn is_stale(entry: &ScheduleEntry, now: DateTime<Utc>, tolerance: TimeDelta) -> bool {
    !is_eligible(entry, now, tolerance) && entry.instant < now
}

/// Window and entries, always mutated together under one lock
#[derive(Debug)]
struct QueueState {
    window: ScheduleWindow,
    entries: EntryQueue,
}

/// Durable form of a schedule queue.
///
/// A snapshot carries no context and cannot run; call
/// [`QueueSnapshot::attach`] to get a runnable [`ScheduleQueue`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueSnapshot {
    pub window: ScheduleWindow,
    pub entries: Vec<ScheduleEntry>,
}

impl QueueSnapshot {
    /// Bind a context to restored state
    pub fn attach(self, context: TestContext) -> Result<ScheduleQueue, ScheduleError> {
        debug!(entries = self.entries.len(), "QueueSnapshot::attach: called");
        context.validate()?;
        if !self.window.is_well_formed() {
            return Err(ScheduleError::CorruptSnapshot(format!(
                "window start {} is after end {}",
                self.window.start(),
                self.window.end()
            )));
        }

        let queue = ScheduleQueue {
            context: RwLock::new(Arc::new(context)),
            state: Mutex::new(QueueState {
                window: self.window,
                entries: self.entries.into_iter().collect(),
            }),
            cycle: Mutex::new(()),
        };
        queue.reconcile();
        Ok(queue)
    }
}

/// Rolling queue of scheduled test executions.
///
/// The queue materializes entries for every configured group across a
/// forward horizon, runs whatever is due on each cycle, and refills itself
/// when the horizon runs low.
#[derive(Debug)]
pub struct ScheduleQueue {
    context: RwLock<Arc<TestContext>>,
    state: Mutex<QueueState>,
    /// Held for the whole of `run_cycle`; cycles never overlap
    cycle: Mutex<()>,
}

impl ScheduleQueue {
    /// Create a queue and fill it out to the max horizon
    pub fn new(context: TestContext, now: DateTime<Utc>) -> Result<Self, ScheduleError> {
        debug!(%now, groups = context.groups.len(), "ScheduleQueue::new: called");
        context.validate()?;
        let end = now.checked_add_signed(context.settings.max_horizon).ok_or_else(|| {
            ScheduleError::InvalidContext(format!("max horizon from {} is past the representable range", now))
        })?;

        let queue = Self {
            context: RwLock::new(Arc::new(context)),
            state: Mutex::new(QueueState {
                window: ScheduleWindow::starting_at(now),
                entries: EntryQueue::new(),
            }),
            cycle: Mutex::new(()),
        };
        queue.populate(end, now);
        Ok(queue)
    }

    /// Swap in a new context, e.g. after a configuration reload.
    ///
    /// Entries for groups that are no longer configured are dropped and the
    /// rest pick up their new declaration order.
    pub fn set_context(&self, context: TestContext) -> Result<(), ScheduleError> {
        debug!(groups = context.groups.len(), "ScheduleQueue::set_context: called");
        context.validate()?;
        *self.context.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(context);
        self.reconcile();
        Ok(())
    }

    pub fn context(&self) -> Arc<TestContext> {
        self.context.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    fn lock_state(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn len(&self) -> usize {
        self.lock_state().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock_state().entries.is_empty()
    }

    pub fn window(&self) -> ScheduleWindow {
        self.lock_state().window
    }

    pub fn peek(&self) -> Option<ScheduleEntry> {
        self.lock_state().entries.peek().cloned()
    }

    /// All entries in run order
    pub fn entries(&self) -> Vec<ScheduleEntry> {
        self.lock_state().entries.to_sorted_vec()
    }

    pub fn snapshot(&self) -> QueueSnapshot {
        debug!("ScheduleQueue::snapshot: called");
        let state = self.lock_state();
        QueueSnapshot {
            window: state.window,
            entries: state.entries.to_sorted_vec(),
        }
    }

    /// Insert a single entry for a configured group
    pub fn add_entry(&self, instant: DateTime<Utc>, group_id: &str) -> Result<(), ScheduleError> {
        debug!(%instant, %group_id, "ScheduleQueue::add_entry: called");
        let order = self
            .context()
            .declaration_order(group_id)
            .ok_or_else(|| ScheduleError::InvalidContext(format!("unknown test group: {}", group_id)))?;
        self.lock_state()
            .entries
            .push(ScheduleEntry::new(instant, group_id, order));
        Ok(())
    }

    /// Grow the materialized horizon to `new_end`.
    ///
    /// `now` must not be earlier than the `now` of any cycle already run on
    /// this queue; the fill interval starts at `max(window end, now)`.
    pub fn populate(&self, new_end: DateTime<Utc>, now: DateTime<Utc>) {
        let context = self.context();
        let mut state = self.lock_state();
        Self::populate_locked(&mut state, &context, new_end, now);
    }

    fn populate_locked(state: &mut QueueState, context: &TestContext, new_end: DateTime<Utc>, now: DateTime<Utc>) {
        let (start, end) = state.window.advance(new_end, now);
        debug!(%start, %end, "populating test queue");

        for (order, group) in context.groups.iter().enumerate() {
            for instant in group.recurrence.times_in_interval(start, end) {
                debug!(group_id = %group.id, %instant, "scheduling test group");
                state.entries.push(ScheduleEntry::new(instant, group.id.clone(), order));
            }
        }
        info!(size = state.entries.len(), "Test queue populated");
    }

    /// Refill out to the max horizon once less than the min horizon remains.
    /// Returns true if the queue was extended.
    pub fn extend(&self, now: DateTime<Utc>) -> bool {
        let context = self.context();
        let settings = context.settings;
        let mut state = self.lock_state();

        if state.window.remaining(now) < settings.min_horizon {
            let Some(end) = now.checked_add_signed(settings.max_horizon) else {
                warn!(%now, "max horizon is past the representable range, not extending");
                return false;
            };
            debug!("extending queue");
            Self::populate_locked(&mut state, &context, end, now);
            true
        } else {
            debug!(end = %state.window.end(), "no need to extend queue");
            false
        }
    }

    /// Drop entries for unconfigured groups and re-stamp declaration order
    fn reconcile(&self) {
        let context = self.context();
        let mut state = self.lock_state();
        let before = state.entries.len();

        state.entries.rebuild(|mut entry| {
            let order = context.declaration_order(&entry.group_id)?;
            entry.declaration_order = order;
            Some(entry)
        });

        let dropped = before - state.entries.len();
        if dropped > 0 {
            info!(dropped, "Dropped entries for test groups no longer configured");
        }
    }

    /// Remove missed entries from the head of the queue
    fn prune(&self, now: DateTime<Utc>, tolerance: TimeDelta) -> usize {
        let mut state = self.lock_state();
        let mut pruned = 0;
        while let Some(entry) = state.entries.peek() {
            if !is_stale(entry, now, tolerance) {
                break;
            }
            debug!(%entry, "removing missed test");
            state.entries.pop();
            pruned += 1;
        }
        pruned
    }

    fn head_is_eligible(&self, now: DateTime<Utc>, tolerance: TimeDelta) -> bool {
        self.lock_state()
            .entries
            .peek()
            .is_some_and(|entry| is_eligible(entry, now, tolerance))
    }

    fn pop_eligible(&self, now: DateTime<Utc>, tolerance: TimeDelta) -> Option<ScheduleEntry> {
        let mut state = self.lock_state();
        match state.entries.peek() {
            Some(entry) if is_eligible(entry, now, tolerance) => state.entries.pop(),
            _ => None,
        }
    }

    fn next_wakeup(&self, now: DateTime<Utc>, settings: &ScheduleSettings) -> TimeDelta {
        match self.lock_state().entries.peek() {
            Some(entry) => entry.instant - now,
            None => settings.min_horizon,
        }
    }

    /// One wake-up: prune, run everything due, extend, and report how long
    /// to sleep.
    pub fn run_cycle(&self, now: DateTime<Utc>, executor: &mut dyn TestExecutor) -> CycleReport {
        debug!(%now, "ScheduleQueue::run_cycle: called");
        let _cycle = self.cycle.lock().unwrap_or_else(PoisonError::into_inner);
        let context = self.context();
        let settings = context.settings;
        let tolerance = settings.tolerance();

        let pruned = self.prune(now, tolerance);
        if pruned > 0 {
            info!(pruned, "Dropped missed tests");
        }

        let mut outcomes = Vec::new();
        if self.head_is_eligible(now, tolerance) {
            executor.start();

            while let Some(entry) = self.pop_eligible(now, tolerance) {
                let admission = context.gate.admit(settings.maximum_test_usage);
                let execution = match admission {
                    Admission::Granted => {
                        let outcome = executor.execute_group(&entry.group_id);
                        if let ExecutionOutcome::Failed { reason } = &outcome {
                            warn!(group_id = %entry.group_id, %reason, "Test group failed");
                        }
                        Some(outcome)
                    }
                    Admission::Denied { reason } => {
                        info!(group_id = %entry.group_id, %reason, "Active metrics won't be collected");
                        executor.add_failed_condition(reason.condition_name());
                        None
                    }
                };
                executor.add_condition(admission.condition());
                outcomes.push(EntryOutcome {
                    entry,
                    admission,
                    execution,
                });
            }

            executor.stop();
            if let Err(e) = executor.save(SCHEDULED_TESTS) {
                warn!(error = %e, "Failed to save scheduled test results");
            }
        } else {
            debug!("ScheduleQueue::run_cycle: nothing due");
        }

        let extended = self.extend(now);

        let mut sleep = self.next_wakeup(now, &settings);
        let mut retry_scheduled = false;
        if let RetryPolicy::AfterDelay { delay_ms } = settings.retry_policy {
            let delay = TimeDelta::milliseconds(delay_ms);
            if outcomes.iter().any(EntryOutcome::failed) && delay < sleep {
                debug!(?delay, "ScheduleQueue::run_cycle: retry delay sooner than next entry");
                sleep = delay;
                retry_scheduled = true;
            }
        }

        let report = CycleReport {
            pruned,
            outcomes,
            extended,
            sleep,
            retry_scheduled,
        };
        info!(
            executed = report.executed(),
            denied = report.denied(),
            failed = report.failed(),
            pruned,
            remaining = self.len(),
            sleep_ms = report.sleep.num_milliseconds(),
            "Cycle complete"
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::admission::{AdmissionGate, Condition, DATACAP, DenialReason};
    use crate::recurrence::{Every, Recurrence};
    use crate::scheduler::context::TestGroup;
    use chrono::TimeZone;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap()
    }

    #[derive(Debug)]
    struct Grant;

    impl AdmissionGate for Grant {
        fn admit(&self, _maximum_test_usage: u64) -> Admission {
            Admission::Granted
        }
    }

    /// Denies the first `deny` requests, then grants
    #[derive(Debug)]
    struct DenyFirst {
        deny: usize,
        calls: AtomicUsize,
    }

    impl AdmissionGate for DenyFirst {
        fn admit(&self, _maximum_test_usage: u64) -> Admission {
            if self.calls.fetch_add(1, Ordering::SeqCst) < self.deny {
                Admission::Denied {
                    reason: DenialReason::DataCapReached,
                }
            } else {
                Admission::Granted
            }
        }
    }

    /// Fixed list of instants
    #[derive(Debug)]
    struct At(Vec<DateTime<Utc>>);

    impl Recurrence for At {
        fn times_in_interval(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Vec<DateTime<Utc>> {
            self.0.iter().copied().filter(|t| *t >= start && *t < end).collect()
        }
    }

    #[derive(Debug, Default)]
    struct Recorder {
        calls: Vec<String>,
        executed: Vec<String>,
        conditions: Vec<Condition>,
        failed_conditions: Vec<String>,
        fail: Vec<String>,
        saved: Vec<String>,
    }

    impl TestExecutor for Recorder {
        fn start(&mut self) {
            self.calls.push("start".to_string());
        }

        fn execute_group(&mut self, group_id: &str) -> ExecutionOutcome {
            self.executed.push(group_id.to_string());
            if self.fail.iter().any(|g| g == group_id) {
                ExecutionOutcome::failed("boom")
            } else {
                ExecutionOutcome::Succeeded
            }
        }

        fn add_condition(&mut self, condition: Condition) {
            self.conditions.push(condition);
        }

        fn add_failed_condition(&mut self, name: &str) {
            self.failed_conditions.push(name.to_string());
        }

        fn stop(&mut self) {
            self.calls.push("stop".to_string());
        }

        fn save(&mut self, category: &str) -> eyre::Result<()> {
            self.saved.push(category.to_string());
            Ok(())
        }
    }

    fn settings(window: TimeDelta, min: i64, max: i64) -> ScheduleSettings {
        ScheduleSettings {
            test_start_window: window,
            min_horizon: TimeDelta::days(min),
            max_horizon: TimeDelta::days(max),
            ..Default::default()
        }
    }

    fn daily_context(settings: ScheduleSettings) -> TestContext {
        let daily = Every::new(TimeDelta::days(1), TimeDelta::zero()).unwrap();
        TestContext::new(vec![TestGroup::new("daily", Arc::new(daily))], Arc::new(Grant), settings)
    }

    fn fixed_context(groups: Vec<(&str, Vec<DateTime<Utc>>)>, gate: Arc<dyn AdmissionGate>) -> TestContext {
        let groups = groups
            .into_iter()
            .map(|(id, times)| TestGroup::new(id, Arc::new(At(times))))
            .collect();
        TestContext::new(groups, gate, settings(TimeDelta::hours(2), 3, 30))
    }

    #[test]
    fn test_is_eligible_symmetric() {
        let tolerance = TimeDelta::minutes(30);
        let now = t0();
        let eps = TimeDelta::milliseconds(1);
        let entry = |offset: TimeDelta| ScheduleEntry::new(now + offset, "g", 0);

        assert!(is_eligible(&entry(tolerance - eps), now, tolerance));
        assert!(is_eligible(&entry(-(tolerance - eps)), now, tolerance));
        assert!(!is_eligible(&entry(tolerance), now, tolerance));
        assert!(!is_eligible(&entry(-tolerance), now, tolerance));
        assert!(!is_eligible(&entry(tolerance + eps), now, tolerance));
    }

    #[test]
    fn test_is_stale_only_in_past() {
        let tolerance = TimeDelta::minutes(30);
        let now = t0();
        let past = ScheduleEntry::new(now - TimeDelta::hours(1), "g", 0);
        let future = ScheduleEntry::new(now + TimeDelta::hours(1), "g", 0);
        let due = ScheduleEntry::new(now - TimeDelta::minutes(10), "g", 0);

        assert!(is_stale(&past, now, tolerance));
        assert!(!is_stale(&future, now, tolerance));
        assert!(!is_stale(&due, now, tolerance));
    }

    #[test]
    fn test_new_populates_to_max_horizon() {
        let queue = ScheduleQueue::new(daily_context(settings(TimeDelta::hours(2), 3, 7)), t0()).unwrap();
        let window = queue.window();
        assert_eq!(window.start(), t0());
        assert_eq!(window.end(), t0() + TimeDelta::days(7));
        // t0 itself is a day boundary, so [t0, t0+7d) holds 7 instants
        assert_eq!(queue.len(), 7);
    }

    #[test]
    fn test_new_rejects_invalid_context() {
        let result = ScheduleQueue::new(daily_context(settings(TimeDelta::hours(2), 9, 7)), t0());
        assert!(matches!(result, Err(ScheduleError::InvalidContext(_))));
    }

    #[test]
    fn test_daily_scenario() {
        let queue = ScheduleQueue::new(daily_context(settings(TimeDelta::hours(2), 3, 30)), t0()).unwrap();
        // Drop the t0 instant so the window holds t0+1d .. t0+29d
        queue.lock_state().entries.pop();
        assert_eq!(queue.len(), 29);

        let mut exec = Recorder::default();
        let now = t0() + TimeDelta::days(1);
        let report = queue.run_cycle(now, &mut exec);

        assert_eq!(exec.executed, vec!["daily"]);
        assert_eq!(report.executed(), 1);
        assert_eq!(report.pruned, 0);
        assert!(!report.extended);
        assert_eq!(queue.len(), 28);
        assert_eq!(report.sleep, TimeDelta::days(1));
        assert_eq!(exec.calls, vec!["start", "stop"]);
        assert_eq!(exec.saved, vec![SCHEDULED_TESTS]);
    }

    #[test]
    fn test_ties_run_in_declaration_order() {
        let at = t0() + TimeDelta::hours(1);
        let ctx = fixed_context(vec![("first", vec![at]), ("second", vec![at])], Arc::new(Grant));
        let queue = ScheduleQueue::new(ctx, t0()).unwrap();

        let mut exec = Recorder::default();
        queue.run_cycle(at, &mut exec);
        assert_eq!(exec.executed, vec!["first", "second"]);
    }

    #[test]
    fn test_denied_entry_consumed_and_next_attempted() {
        let at = t0() + TimeDelta::hours(1);
        let gate = Arc::new(DenyFirst {
            deny: 1,
            calls: AtomicUsize::new(0),
        });
        let ctx = fixed_context(vec![("a", vec![at]), ("b", vec![at])], gate);
        let queue = ScheduleQueue::new(ctx, t0()).unwrap();

        let mut exec = Recorder::default();
        let report = queue.run_cycle(at, &mut exec);

        assert_eq!(exec.executed, vec!["b"]);
        assert_eq!(exec.failed_conditions, vec![DATACAP]);
        assert_eq!(exec.conditions.len(), 2);
        assert!(!exec.conditions[0].success);
        assert!(exec.conditions[1].success);
        assert_eq!(report.denied(), 1);
        assert_eq!(report.outcomes[0].execution, None);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_prunes_exactly_stale_entries() {
        let now = t0() + TimeDelta::days(2);
        let tolerance = TimeDelta::hours(1);
        let times = vec![
            now - TimeDelta::hours(5),
            now - TimeDelta::hours(2),
            now - tolerance,
            now - tolerance + TimeDelta::milliseconds(1),
            now + TimeDelta::hours(3),
        ];
        let ctx = fixed_context(vec![("g", times)], Arc::new(Grant));
        let queue = ScheduleQueue::new(ctx, t0()).unwrap();

        let mut exec = Recorder::default();
        let report = queue.run_cycle(now, &mut exec);

        // exactly `now - tolerance` is out of tolerance and in the past
        assert_eq!(report.pruned, 3);
        assert_eq!(report.executed(), 1);
        assert_eq!(queue.len(), 1);
        assert_eq!(report.sleep, TimeDelta::hours(3));
    }

    #[test]
    fn test_idle_cycle_skips_executor_lifecycle() {
        let ctx = fixed_context(vec![("g", vec![t0() + TimeDelta::days(1)])], Arc::new(Grant));
        let queue = ScheduleQueue::new(ctx, t0()).unwrap();

        let mut exec = Recorder::default();
        let report = queue.run_cycle(t0(), &mut exec);

        assert!(exec.calls.is_empty());
        assert!(exec.saved.is_empty());
        assert_eq!(report.sleep, TimeDelta::days(1));
    }

    #[test]
    fn test_empty_queue_sleeps_min_horizon() {
        let ctx = fixed_context(vec![("g", vec![])], Arc::new(Grant));
        let queue = ScheduleQueue::new(ctx, t0()).unwrap();

        let mut exec = Recorder::default();
        let report = queue.run_cycle(t0(), &mut exec);
        assert!(queue.is_empty());
        assert_eq!(report.sleep, TimeDelta::days(3));
    }

    #[test]
    fn test_extend_when_below_low_water_mark() {
        let queue = ScheduleQueue::new(daily_context(settings(TimeDelta::hours(2), 3, 7)), t0()).unwrap();

        assert!(!queue.extend(t0() + TimeDelta::days(3)));
        assert_eq!(queue.window().end(), t0() + TimeDelta::days(7));

        let now = t0() + TimeDelta::days(5);
        assert!(queue.extend(now));
        let window = queue.window();
        assert_eq!(window.start(), t0() + TimeDelta::days(7));
        assert_eq!(window.end(), now + TimeDelta::days(7));
        // 7 initial + days 7..11
        assert_eq!(queue.len(), 12);
    }

    #[test]
    fn test_new_rejects_horizon_past_representable_time() {
        let near_max = DateTime::<Utc>::MAX_UTC - TimeDelta::days(1);
        let result = ScheduleQueue::new(daily_context(settings(TimeDelta::hours(2), 3, 7)), near_max);
        assert!(matches!(result, Err(ScheduleError::InvalidContext(_))));
    }

    #[test]
    fn test_extend_near_representable_limit_is_skipped() {
        let start = DateTime::<Utc>::MAX_UTC - TimeDelta::days(8);
        let queue = ScheduleQueue::new(daily_context(settings(TimeDelta::hours(2), 3, 7)), start).unwrap();
        let end = queue.window().end();

        // below the low-water mark, but now + 7d no longer fits
        let now = DateTime::<Utc>::MAX_UTC - TimeDelta::days(2);
        assert!(!queue.extend(now));
        assert_eq!(queue.window().end(), end);

        let report = queue.run_cycle(now, &mut Recorder::default());
        assert!(!report.extended);
    }

    #[test]
    fn test_retry_policy_shortens_sleep_on_failure() {
        let at = t0() + TimeDelta::hours(1);
        let mut ctx = fixed_context(vec![("flaky", vec![at, at + TimeDelta::days(1)])], Arc::new(Grant));
        ctx.settings.retry_policy = RetryPolicy::after(TimeDelta::minutes(10));
        let queue = ScheduleQueue::new(ctx, t0()).unwrap();

        let mut exec = Recorder {
            fail: vec!["flaky".to_string()],
            ..Default::default()
        };
        let report = queue.run_cycle(at, &mut exec);
        assert_eq!(report.failed(), 1);
        assert!(report.retry_scheduled);
        assert_eq!(report.sleep, TimeDelta::minutes(10));
    }

    #[test]
    fn test_failure_without_retry_keeps_schedule() {
        let at = t0() + TimeDelta::hours(1);
        let ctx = fixed_context(vec![("flaky", vec![at, at + TimeDelta::days(1)])], Arc::new(Grant));
        let queue = ScheduleQueue::new(ctx, t0()).unwrap();

        let mut exec = Recorder {
            fail: vec!["flaky".to_string()],
            ..Default::default()
        };
        let report = queue.run_cycle(at, &mut exec);
        assert_eq!(report.failed(), 1);
        assert!(!report.retry_scheduled);
        assert_eq!(report.sleep, TimeDelta::days(1));
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_snapshot_attach_restores_state() {
        let queue = ScheduleQueue::new(daily_context(settings(TimeDelta::hours(2), 3, 7)), t0()).unwrap();
        let snapshot = queue.snapshot();

        let json = serde_json::to_string(&snapshot).unwrap();
        let restored: QueueSnapshot = serde_json::from_str(&json).unwrap();
        let restored = restored
            .attach(daily_context(settings(TimeDelta::hours(2), 3, 7)))
            .unwrap();

        assert_eq!(restored.window(), queue.window());
        assert_eq!(restored.entries(), queue.entries());
    }

    #[test]
    fn test_set_context_drops_removed_groups_and_restamps_order() {
        let at = t0() + TimeDelta::hours(1);
        let ctx = fixed_context(
            vec![("a", vec![at]), ("b", vec![at]), ("c", vec![at])],
            Arc::new(Grant),
        );
        let queue = ScheduleQueue::new(ctx, t0()).unwrap();

        let reordered = fixed_context(vec![("c", vec![]), ("a", vec![])], Arc::new(Grant));
        queue.set_context(reordered).unwrap();

        let ids: Vec<_> = queue.entries().into_iter().map(|e| e.group_id).collect();
        assert_eq!(ids, vec!["c", "a"]);
    }

    #[test]
    fn test_add_entry_requires_known_group() {
        let ctx = fixed_context(vec![("a", vec![])], Arc::new(Grant));
        let queue = ScheduleQueue::new(ctx, t0()).unwrap();

        queue.add_entry(t0() + TimeDelta::hours(4), "a").unwrap();
        assert_eq!(queue.len(), 1);
        assert!(queue.add_entry(t0(), "zzz").is_err());
    }

    #[test]
    fn test_populate_with_earlier_now_never_refills_lapsed_span() {
        let queue = ScheduleQueue::new(daily_context(settings(TimeDelta::hours(2), 3, 7)), t0()).unwrap();

        // skips days 7..9
        queue.populate(t0() + TimeDelta::days(14), t0() + TimeDelta::days(10));
        assert_eq!(queue.len(), 7 + 4);

        // an older `now` does not reopen the lapsed span
        queue.populate(t0() + TimeDelta::days(16), t0());
        let window = queue.window();
        assert_eq!(window.start(), t0() + TimeDelta::days(14));
        assert_eq!(window.end(), t0() + TimeDelta::days(16));
        assert_eq!(queue.len(), 7 + 4 + 2);
        assert!(
            queue
                .entries()
                .iter()
                .all(|e| e.instant < t0() + TimeDelta::days(7) || e.instant >= t0() + TimeDelta::days(10))
        );
    }

    #[test]
    fn test_populate_concurrent_with_drain() {
        let queue = Arc::new(ScheduleQueue::new(daily_context(settings(TimeDelta::hours(2), 3, 7)), t0()).unwrap());

        let handles: Vec<_> = (1..=4)
            .map(|i| {
                let queue = queue.clone();
                std::thread::spawn(move || queue.populate(t0() + TimeDelta::days(7 + i * 7), t0()))
            })
            .collect();

        let mut exec = Recorder::default();
        queue.run_cycle(t0(), &mut exec);
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(queue.window().end(), t0() + TimeDelta::days(35));
        let entries = queue.entries();
        assert!(entries.windows(2).all(|w| w[0] <= w[1]));
        // day 0 ran; days 1..34 are each present exactly once
        assert_eq!(exec.executed, vec!["daily"]);
        assert_eq!(entries.len(), 34);
    }
}
