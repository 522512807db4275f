//! FIFO intake queue, worker pool, and per-task lifecycle orchestration.
//!
//! Grounded on `eden_tasks::QueueWorker`/`queue_worker::task_manager`: a
//! `CancellationToken` for cooperative shutdown, a `TaskTracker` to await
//! in-flight work, and a semaphore-gated admission step before invoking the
//! body. Unlike the teacher this crate has no database to poll — submission
//! goes straight onto an in-memory intake channel — and no retry/backoff
//! loop, since the spec this scheduler implements treats a body failure as
//! terminal rather than retryable.

mod catch_unwind;

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{info_span, Instrument};

use crate::clock::Clock;
use crate::error::{Error, Result};
use crate::event_bus::{Event, EventBus, QueueEvent, QUEUE_TOPIC};
use crate::settings::Settings;
use crate::semaphore::SemaphoreRegistry;
use crate::store::Store;
use crate::task::{Body, TaskContext, TaskOutcome, TaskRecord};

struct Submission {
    record: Arc<TaskRecord>,
    body: Box<dyn Body>,
    cancellation: CancellationToken,
}

struct SchedulerInner {
    event_bus: Arc<EventBus>,
    store: Arc<Store>,
    semaphores: Arc<SemaphoreRegistry>,
    clock: Arc<dyn Clock>,
    settings: Settings,
    sender: mpsc::UnboundedSender<Submission>,
    receiver: AsyncMutex<Option<mpsc::UnboundedReceiver<Submission>>>,
    cancellations: DashMap<String, CancellationToken>,
    shutdown: CancellationToken,
    tracker: TaskTracker,
    started: AsyncMutex<bool>,
}

/// The scheduler/executor core: accepts [`Body`] submissions, runs them
/// under per-class concurrency limits, and publishes lifecycle events.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<SchedulerInner>,
}

impl Scheduler {
    #[must_use]
    pub fn new(settings: Settings, event_bus: Arc<EventBus>, clock: Arc<dyn Clock>) -> Self {
        let semaphores = Arc::new(SemaphoreRegistry::new(&settings));
        let store = Arc::new(Store::new(Arc::clone(&event_bus), settings.max_succeeded_tasks));
        let (sender, receiver) = mpsc::unbounded_channel();

        Self {
            inner: Arc::new(SchedulerInner {
                event_bus,
                store,
                semaphores,
                clock,
                settings,
                sender,
                receiver: AsyncMutex::new(Some(receiver)),
                cancellations: DashMap::new(),
                shutdown: CancellationToken::new(),
                tracker: TaskTracker::new(),
                started: AsyncMutex::new(false),
            }),
        }
    }

    #[must_use]
    pub fn store(&self) -> &Arc<Store> {
        &self.inner.store
    }

    #[must_use]
    pub fn event_bus(&self) -> &Arc<EventBus> {
        &self.inner.event_bus
    }

    #[must_use]
    pub fn semaphores(&self) -> &Arc<SemaphoreRegistry> {
        &self.inner.semaphores
    }

    /// Spawns the dispatcher pool. Must be called once before `submit`.
    #[allow(clippy::expect_used)]
    pub async fn start(&self) {
        let mut started = self.inner.started.lock().await;
        if *started {
            return;
        }
        *started = true;

        let receiver = self
            .inner
            .receiver
            .lock()
            .await
            .take()
            .expect("receiver taken exactly once at start");
        let receiver = Arc::new(AsyncMutex::new(receiver));
        for worker_index in 0..self.inner.settings.dispatcher_pool_size.get() {
            let inner = Arc::clone(&self.inner);
            let receiver = Arc::clone(&receiver);
            self.inner.tracker.spawn(
                async move { dispatcher_loop(inner, receiver).await }
                    .instrument(info_span!("dispatcher", worker_index = %worker_index)),
            );
        }
    }

    /// Submits a body for execution. Returns the generated `task_id`.
    pub fn submit(&self, body: Box<dyn Body>) -> Result<String> {
        if self.inner.shutdown.is_cancelled() {
            return Err(Error::ShutdownInProgress("submissions"));
        }

        let task_id = uuid::Uuid::new_v4().to_string();
        let semaphore_name = body.semaphore_class().to_owned();
        let record = Arc::new(TaskRecord::new(
            task_id.clone(),
            None,
            body.kind().to_owned(),
            semaphore_name,
            Arc::clone(&self.inner.event_bus),
            Arc::clone(&self.inner.clock),
        ));
        self.submit_record(record, body)
    }

    /// Submits a pre-built record (used by the recurring engine to submit
    /// clones that already carry a `parent_id`).
    pub(crate) fn submit_record(&self, record: Arc<TaskRecord>, body: Box<dyn Body>) -> Result<String> {
        if self.inner.shutdown.is_cancelled() {
            return Err(Error::ShutdownInProgress("submissions"));
        }

        let task_id = record.task_id().to_owned();
        self.inner.store.insert(Arc::clone(&record));
        let _ = self.inner.event_bus.publish(
            QUEUE_TOPIC,
            Event::Queue(QueueEvent::TaskAdded { task: record.snapshot() }),
        );

        let cancellation = self.inner.shutdown.child_token();
        self.inner.cancellations.insert(task_id.clone(), cancellation.clone());

        self.inner
            .sender
            .send(Submission { record, body, cancellation })
            .map_err(|_| Error::ShutdownInProgress("submissions"))?;

        Ok(task_id)
    }

    /// Cancels a task. A still-`queued` task is marked `failed`/`cancelled`
    /// immediately. A `running` task is only signalled; the dispatcher
    /// finalizes it as `failed`/`cancelled` once its body actually unwinds.
    pub fn cancel(&self, task_id: &str) -> Result<()> {
        let record = self.inner.store.get(task_id).ok_or_else(|| Error::TaskNotFound(task_id.to_owned()))?;
        if let Some(entry) = self.inner.cancellations.get(task_id) {
            entry.cancel();
        }
        if record.status() == crate::task::TaskStatus::Queued {
            record.mark_failed("cancelled", "task was cancelled", String::new());
        }
        Ok(())
    }

    #[must_use]
    pub fn subscribe_task(&self, task_id: &str) -> crate::event_bus::Subscription {
        self.inner.event_bus.subscribe(&crate::event_bus::task_topic(task_id))
    }

    #[must_use]
    pub fn subscribe_queue(&self) -> crate::event_bus::Subscription {
        self.inner.event_bus.subscribe(QUEUE_TOPIC)
    }

    /// Stops accepting submissions, waits up to `grace_period` for in-flight
    /// dispatchers to unwind, then closes remaining open topics.
    pub async fn stop(&self) {
        self.inner.shutdown.cancel();
        self.inner.tracker.close();

        let _ = tokio::time::timeout(self.inner.settings.grace_period, self.inner.tracker.wait()).await;
    }

    pub(crate) fn clock(&self) -> &Arc<dyn Clock> {
        &self.inner.clock
    }
}

async fn dispatcher_loop(
    inner: Arc<SchedulerInner>,
    receiver: Arc<AsyncMutex<mpsc::UnboundedReceiver<Submission>>>,
) {
    loop {
        if inner.shutdown.is_cancelled() {
            return;
        }

        let submission = {
            let mut guard = receiver.lock().await;
            tokio::select! {
                biased;
                () = inner.shutdown.cancelled() => return,
                maybe = guard.recv() => maybe,
            }
        };

        let Some(submission) = submission else {
            return;
        };

        run_submission(&inner, submission).await;
    }
}

async fn run_submission(inner: &Arc<SchedulerInner>, submission: Submission) {
    let Submission { record, body, cancellation } = submission;
    let task_id = record.task_id().to_owned();

    if cancellation.is_cancelled() {
        inner.cancellations.remove(&task_id);
        return;
    }

    let span = info_span!("run_task", task.id = %task_id, task.kind = body.kind());
    let _guard = span.enter();

    let permit = inner.semaphores.acquire(record.semaphore_name(), &task_id, &cancellation).await;
    let permit = match permit {
        Ok(permit) => permit,
        Err(_) => {
            if !record.is_terminal() {
                record.mark_failed("cancelled", "task was cancelled before it could start", String::new());
            }
            inner.cancellations.remove(&task_id);
            return;
        }
    };

    record.mark_running();
    let ctx = TaskContext::new(Arc::clone(&record), cancellation.clone());
    let outcome = catch_unwind::run_guarded(body.as_ref(), &ctx).await;
    drop(permit);

    if cancellation.is_cancelled() {
        record.mark_failed("cancelled", "task was cancelled while running", String::new());
    } else {
        match outcome {
            TaskOutcome::Done => record.mark_done(),
            TaskOutcome::Failed { kind, message, traceback } => record.mark_failed(kind, message, traceback),
        }
    }

    inner.cancellations.remove(&task_id);
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use std::time::Duration;

    use crate::clock::SystemClock;
    use crate::task::TaskStatus;
    use crate::test_support::{FailingTask, InstantTask, PanickingTask, SleepyTask};

    use super::*;

    fn new_scheduler(settings: Settings) -> Scheduler {
        Scheduler::new(settings, Arc::new(EventBus::new(64)), Arc::new(SystemClock))
    }

    #[tokio::test]
    async fn submitted_task_runs_to_completion() {
        let scheduler = new_scheduler(Settings::default());
        scheduler.start().await;

        let task_id = scheduler.submit(Box::new(InstantTask)).unwrap();
        let mut sub = scheduler.subscribe_task(&task_id);
        loop {
            match sub.next().await {
                Some(Ok(Event::Task(snapshot))) if snapshot.status == TaskStatus::Done => break,
                Some(_) => continue,
                None => panic!("topic closed before task reached done"),
            }
        }
        scheduler.stop().await;
    }

    #[tokio::test]
    async fn failing_body_populates_error_fields() {
        let scheduler = new_scheduler(Settings::default());
        scheduler.start().await;

        let task_id = scheduler.submit(Box::new(FailingTask)).unwrap();
        let mut sub = scheduler.subscribe_task(&task_id);
        let snapshot = loop {
            match sub.next().await {
                Some(Ok(Event::Task(snapshot))) if snapshot.status == TaskStatus::Failed => break snapshot,
                Some(_) => continue,
                None => panic!("topic closed before task reached failed"),
            }
        };
        assert_eq!(snapshot.error_type.as_deref(), Some("ValueError"));
        assert_eq!(snapshot.error_message.as_deref(), Some("boom"));
        scheduler.stop().await;
    }

    #[tokio::test]
    async fn panicking_body_is_captured_not_propagated() {
        let scheduler = new_scheduler(Settings::default());
        scheduler.start().await;

        let task_id = scheduler.submit(Box::new(PanickingTask)).unwrap();
        let mut sub = scheduler.subscribe_task(&task_id);
        let snapshot = loop {
            match sub.next().await {
                Some(Ok(Event::Task(snapshot))) if snapshot.status == TaskStatus::Failed => break snapshot,
                Some(_) => continue,
                None => panic!("topic closed before task reached failed"),
            }
        };
        assert_eq!(snapshot.error_type.as_deref(), Some("panic"));
        scheduler.stop().await;
    }

    #[tokio::test]
    async fn single_class_serializes_execution() {
        let scheduler = new_scheduler(Settings::default());
        scheduler.start().await;

        let ids: Vec<_> = (0..3)
            .map(|_| {
                scheduler
                    .submit(Box::new(SleepyTask { delay: Duration::from_millis(30), semaphore_class: "single" }))
                    .unwrap()
            })
            .collect();

        for id in &ids {
            let mut sub = scheduler.subscribe_task(id);
            while let Some(result) = sub.next().await {
                if matches!(result, Ok(Event::Task(snapshot)) if snapshot.status == TaskStatus::Done) {
                    break;
                }
            }
        }

        let snapshots: Vec<_> = ids.iter().map(|id| scheduler.store().get(id).unwrap().snapshot()).collect();
        let mut started: Vec<_> = snapshots.iter().map(|s| s.started_at.unwrap()).collect();
        started.sort();
        for window in snapshots.windows(2) {
            let (a, b) = (&window[0], &window[1]);
            if a.started_at < b.started_at {
                assert!(a.completed_at.unwrap() <= b.started_at.unwrap());
            }
        }
        scheduler.stop().await;
    }

    #[tokio::test]
    async fn cancelling_a_queued_task_marks_it_failed_cancelled() {
        let settings = Settings::builder().single_permits(1).build();
        let scheduler = new_scheduler(settings);
        scheduler.start().await;

        let blocker = scheduler
            .submit(Box::new(SleepyTask { delay: Duration::from_millis(200), semaphore_class: "single" }))
            .unwrap();
        let queued = scheduler
            .submit(Box::new(SleepyTask { delay: Duration::from_millis(10), semaphore_class: "single" }))
            .unwrap();

        scheduler.cancel(&queued).unwrap();
        let cancelled_snapshot = scheduler.store().get(&queued).unwrap().snapshot();
        assert_eq!(cancelled_snapshot.status, TaskStatus::Failed);
        assert_eq!(cancelled_snapshot.error_type.as_deref(), Some("cancelled"));

        let mut sub = scheduler.subscribe_task(&blocker);
        while let Some(result) = sub.next().await {
            if matches!(result, Ok(Event::Task(snapshot)) if snapshot.status == TaskStatus::Done) {
                break;
            }
        }
        scheduler.stop().await;
    }
}
