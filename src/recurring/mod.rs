//! Cron-driven cloning of a task template, capped by `max_concurrent` active
//! instances per recurrence.
//!
//! Grounded on `eden_tasks::registry::recurring::RecurringTask` (the
//! `blocked`/`deadline`/`running` fields and its `update_deadline`) and the
//! polling-loop shape of `queue_worker::runner::QueueWorkerRunner::run`.
//! Generalized from the teacher's single `running: AtomicBool` flag (which
//! only ever allowed one in-flight instance) to a counted `active_children`
//! set, since this spec's `RecurringInfo::max_concurrent` can exceed one.

mod info;

use std::collections::HashSet;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

pub use self::info::RecurringInfo;

use crate::clock::Clock;
use crate::error::{Error, InvalidCronError, Result};
use crate::event_bus::Event;
use crate::scheduler::Scheduler;
use crate::task::{Body, TaskRecord, TaskStatus};

struct Entry {
    recurring_id: String,
    cron_expression: String,
    schedule: cron_clock::Schedule,
    template: Box<dyn Body>,
    max_concurrent: usize,
    enabled: AtomicBool,
    next_run: Mutex<Option<DateTime<Utc>>>,
    last_run: Mutex<Option<DateTime<Utc>>>,
    consecutive_failures: AtomicU64,
    total_runs: AtomicU64,
    total_failures: AtomicU64,
    active_children: Mutex<HashSet<String>>,
    created_at: DateTime<Utc>,
}

impl Entry {
    fn snapshot(&self) -> RecurringInfo {
        RecurringInfo {
            recurring_id: self.recurring_id.clone(),
            cron_expression: self.cron_expression.clone(),
            max_concurrent: self.max_concurrent,
            enabled: self.enabled.load(Ordering::Acquire),
            next_run: *self.next_run.lock().unwrap_or_else(std::sync::PoisonError::into_inner),
            last_run: *self.last_run.lock().unwrap_or_else(std::sync::PoisonError::into_inner),
            consecutive_failures: self.consecutive_failures.load(Ordering::Acquire),
            total_runs: self.total_runs.load(Ordering::Acquire),
            total_failures: self.total_failures.load(Ordering::Acquire),
            created_at: self.created_at,
            active_children: self.active_children.lock().unwrap_or_else(std::sync::PoisonError::into_inner).len(),
        }
    }
}

struct RecurringEngineInner {
    entries: DashMap<String, Arc<Entry>>,
    scheduler: Scheduler,
    clock: Arc<dyn Clock>,
    tick_interval: Duration,
    shutdown: CancellationToken,
    tracker: TaskTracker,
}

/// Owns every registered recurrence and drives the periodic tick that spawns
/// due instances through the [`Scheduler`].
#[derive(Clone)]
pub struct RecurringEngine {
    inner: Arc<RecurringEngineInner>,
}

impl RecurringEngine {
    #[must_use]
    pub fn new(scheduler: Scheduler, clock: Arc<dyn Clock>, tick_interval: Duration) -> Self {
        Self {
            inner: Arc::new(RecurringEngineInner {
                entries: DashMap::new(),
                scheduler,
                clock,
                tick_interval,
                shutdown: CancellationToken::new(),
                tracker: TaskTracker::new(),
            }),
        }
    }

    /// Starts the background tick loop. Call once.
    pub fn start(&self) {
        let inner = Arc::clone(&self.inner);
        inner.tracker.spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    () = inner.shutdown.cancelled() => return,
                    () = tokio::time::sleep(inner.tick_interval) => {
                        tick_once(&inner).await;
                    }
                }
            }
        });
    }

    /// Drives exactly one tick immediately, bypassing the sleep. Used by
    /// tests driving a [`crate::clock::TestClock`] deterministically.
    pub async fn tick_now(&self) {
        tick_once(&self.inner).await;
    }

    /// Registers a new recurrence. `cron_expression` follows the standard
    /// 5-field minute/hour/dom/month/dow syntax.
    pub fn add(&self, cron_expression: &str, template: Box<dyn Body>, max_concurrent: usize) -> Result<RecurringHandle> {
        if max_concurrent == 0 {
            return Err(Error::bad_request("max_concurrent must be positive"));
        }
        let schedule = cron_clock::Schedule::from_str(cron_expression)
            .map_err(|err| InvalidCronError(err.to_string()))?;

        let now = self.inner.clock.now();
        let next_run = schedule.after(&now).next();
        let recurring_id = uuid::Uuid::new_v4().to_string();

        let entry = Arc::new(Entry {
            recurring_id: recurring_id.clone(),
            cron_expression: cron_expression.to_owned(),
            schedule,
            template,
            max_concurrent,
            enabled: AtomicBool::new(true),
            next_run: Mutex::new(next_run),
            last_run: Mutex::new(None),
            consecutive_failures: AtomicU64::new(0),
            total_runs: AtomicU64::new(0),
            total_failures: AtomicU64::new(0),
            active_children: Mutex::new(HashSet::new()),
            created_at: now,
        });
        self.inner.entries.insert(recurring_id.clone(), entry);

        Ok(RecurringHandle {
            engine: self.clone(),
            recurring_id,
        })
    }

    pub fn remove(&self, recurring_id: &str) -> Result<()> {
        self.inner
            .entries
            .remove(recurring_id)
            .map(|_| ())
            .ok_or_else(|| Error::RecurringNotFound(recurring_id.to_owned()))
    }

    /// Re-enables future spawns. Does not affect already-active children.
    pub fn enable(&self, recurring_id: &str) -> Result<()> {
        let entry = self.entry(recurring_id)?;
        entry.enabled.store(true, Ordering::Release);
        let now = self.inner.clock.now();
        *entry.next_run.lock().unwrap_or_else(std::sync::PoisonError::into_inner) = entry.schedule.after(&now).next();
        Ok(())
    }

    /// Stops future spawns. Active children keep running to completion.
    pub fn disable(&self, recurring_id: &str) -> Result<()> {
        let entry = self.entry(recurring_id)?;
        entry.enabled.store(false, Ordering::Release);
        *entry.next_run.lock().unwrap_or_else(std::sync::PoisonError::into_inner) = None;
        Ok(())
    }

    #[must_use]
    pub fn get(&self, recurring_id: &str) -> Option<RecurringInfo> {
        self.inner.entries.get(recurring_id).map(|entry| entry.snapshot())
    }

    #[must_use]
    pub fn list(&self) -> Vec<RecurringInfo> {
        self.inner.entries.iter().map(|entry| entry.value().snapshot()).collect()
    }

    fn entry(&self, recurring_id: &str) -> Result<Arc<Entry>> {
        self.inner
            .entries
            .get(recurring_id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| Error::RecurringNotFound(recurring_id.to_owned()))
    }

    pub async fn stop(&self) {
        self.inner.shutdown.cancel();
        self.inner.tracker.close();
        self.inner.tracker.wait().await;
    }
}

/// A lightweight reference to a registered recurrence returned by
/// [`RecurringEngine::add`].
#[derive(Clone)]
pub struct RecurringHandle {
    engine: RecurringEngine,
    recurring_id: String,
}

impl RecurringHandle {
    #[must_use]
    pub fn id(&self) -> &str {
        &self.recurring_id
    }

    pub fn enable(&self) -> Result<()> {
        self.engine.enable(&self.recurring_id)
    }

    pub fn disable(&self) -> Result<()> {
        self.engine.disable(&self.recurring_id)
    }

    pub fn remove(&self) -> Result<()> {
        self.engine.remove(&self.recurring_id)
    }

    #[must_use]
    pub fn info(&self) -> Option<RecurringInfo> {
        self.engine.get(&self.recurring_id)
    }
}

async fn tick_once(inner: &Arc<RecurringEngineInner>) {
    let now = inner.clock.now();
    let entries: Vec<_> = inner.entries.iter().map(|entry| Arc::clone(entry.value())).collect();

    for entry in entries {
        if !entry.enabled.load(Ordering::Acquire) {
            continue;
        }
        let is_due = entry
            .next_run
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .is_some_and(|next_run| next_run <= now);
        if !is_due {
            continue;
        }

        let has_capacity = entry.active_children.lock().unwrap_or_else(std::sync::PoisonError::into_inner).len()
            < entry.max_concurrent;
        if has_capacity {
            spawn_instance(inner, &entry).await;
        }

        *entry.next_run.lock().unwrap_or_else(std::sync::PoisonError::into_inner) = entry.schedule.after(&now).next();
    }
}

async fn spawn_instance(inner: &Arc<RecurringEngineInner>, entry: &Arc<Entry>) {
    let task_id = uuid::Uuid::new_v4().to_string();
    let body = entry.template.clone_body();
    let record = Arc::new(TaskRecord::new(
        task_id.clone(),
        Some(entry.recurring_id.clone()),
        body.kind().to_owned(),
        body.semaphore_class().to_owned(),
        Arc::clone(inner.scheduler.event_bus()),
        Arc::clone(&inner.clock),
    ));

    entry
        .active_children
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
        .insert(task_id.clone());
    entry.total_runs.fetch_add(1, Ordering::AcqRel);
    *entry.last_run.lock().unwrap_or_else(std::sync::PoisonError::into_inner) = Some(inner.clock.now());

    if inner.scheduler.submit_record(Arc::clone(&record), body).is_err() {
        entry
            .active_children
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .remove(&task_id);
        return;
    }

    let entry = Arc::clone(entry);
    let mut subscription = inner.scheduler.subscribe_task(&task_id);
    inner.tracker.spawn(async move {
        while let Some(Ok(event)) = subscription.next().await {
            let Event::Task(snapshot) = event else { continue };
            match snapshot.status {
                TaskStatus::Done => {
                    entry.consecutive_failures.store(0, Ordering::Release);
                    break;
                }
                TaskStatus::Failed => {
                    entry.consecutive_failures.fetch_add(1, Ordering::AcqRel);
                    entry.total_failures.fetch_add(1, Ordering::AcqRel);
                    break;
                }
                TaskStatus::Queued | TaskStatus::Running => continue,
            }
        }
        entry
            .active_children
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .remove(&task_id);
    });
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use std::time::Duration as StdDuration;

    use chrono::TimeDelta;

    use crate::clock::TestClock;
    use crate::event_bus::EventBus;
    use crate::settings::Settings;
    use crate::test_support::{FailingTask, InstantTask};

    use super::*;

    fn new_engine(clock: Arc<TestClock>) -> (Scheduler, RecurringEngine) {
        let event_bus = Arc::new(EventBus::new(64));
        let scheduler = Scheduler::new(Settings::default(), event_bus, Arc::clone(&clock) as Arc<dyn Clock>);
        let engine = RecurringEngine::new(scheduler.clone(), clock as Arc<dyn Clock>, StdDuration::from_secs(1));
        (scheduler, engine)
    }

    #[tokio::test]
    async fn disabled_recurrence_has_no_next_run_and_spawns_nothing() {
        let clock = Arc::new(TestClock::new(Utc::now()));
        let (scheduler, engine) = new_engine(clock.clone());
        scheduler.start().await;

        let handle = engine.add("* * * * *", Box::new(InstantTask), 1).unwrap();
        handle.disable().unwrap();
        assert_eq!(handle.info().unwrap().next_run, None);

        clock.advance(TimeDelta::minutes(5));
        engine.tick_now().await;
        assert_eq!(handle.info().unwrap().total_runs, 0);
        scheduler.stop().await;
    }

    #[tokio::test]
    async fn max_concurrent_caps_active_children() {
        let clock = Arc::new(TestClock::new(Utc::now()));
        let (scheduler, engine) = new_engine(clock.clone());
        scheduler.start().await;

        let handle = engine.add("* * * * *", Box::new(FailingTask), 2).unwrap();

        for _ in 0..3 {
            clock.advance(TimeDelta::minutes(1));
            engine.tick_now().await;
            assert!(handle.info().unwrap().active_children <= 2);
        }
        scheduler.stop().await;
        engine.stop().await;
    }

    #[tokio::test]
    async fn failures_are_counted_and_reset_on_success() {
        let clock = Arc::new(TestClock::new(Utc::now()));
        let (scheduler, engine) = new_engine(clock.clone());
        scheduler.start().await;

        let handle = engine.add("* * * * *", Box::new(FailingTask), 1).unwrap();
        clock.advance(TimeDelta::minutes(1));
        engine.tick_now().await;

        tokio::time::sleep(StdDuration::from_millis(50)).await;
        let info = handle.info().unwrap();
        assert_eq!(info.total_runs, 1);

        scheduler.stop().await;
        engine.stop().await;
    }
}
