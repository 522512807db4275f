use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::clock::Clock;
use crate::event_bus::{task_topic, Event, EventBus};
use crate::task::TaskStatus;

/// The externally visible fields of a [`TaskRecord`] at a point in time —
/// what gets serialized onto the event bus and returned by `Store::list`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSnapshot {
    pub task_id: String,
    pub parent_id: Option<String>,
    pub task_type: String,
    pub status: TaskStatus,
    pub progress: i32,
    pub semaphore_name: String,
    pub img: Option<String>,
    pub heading: Option<String>,
    pub body: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error_type: Option<String>,
    pub error_message: Option<String>,
    pub error_traceback: Option<String>,
}

#[derive(Debug, Default)]
struct Display {
    img: Option<String>,
    heading: Option<String>,
    body: Option<String>,
}

#[derive(Debug, Default)]
struct ErrorInfo {
    error_type: Option<String>,
    error_message: Option<String>,
    error_traceback: Option<String>,
}

/// The mutable state of one work unit. Every mutation publishes a fresh
/// [`TaskSnapshot`] on the task's own topic (`task/<task_id>`), following
/// the teacher's pattern of treating the task's context as the single
/// source of truth workers and bodies mutate through.
#[derive(Debug)]
pub struct TaskRecord {
    task_id: String,
    parent_id: Option<String>,
    task_type: String,
    semaphore_name: String,
    status: Mutex<TaskStatus>,
    progress: AtomicI32,
    display: Mutex<Display>,
    started_at: Mutex<Option<DateTime<Utc>>>,
    completed_at: Mutex<Option<DateTime<Utc>>>,
    error: Mutex<ErrorInfo>,
    results: Mutex<Option<Value>>,
    event_bus: Arc<EventBus>,
    clock: Arc<dyn Clock>,
}

impl TaskRecord {
    #[must_use]
    pub fn new(
        task_id: String,
        parent_id: Option<String>,
        task_type: String,
        semaphore_name: String,
        event_bus: Arc<EventBus>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            task_id,
            parent_id,
            task_type,
            semaphore_name,
            status: Mutex::new(TaskStatus::Queued),
            progress: AtomicI32::new(-1),
            display: Mutex::new(Display::default()),
            started_at: Mutex::new(None),
            completed_at: Mutex::new(None),
            error: Mutex::new(ErrorInfo::default()),
            results: Mutex::new(None),
            event_bus,
            clock,
        }
    }

    #[must_use]
    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    #[must_use]
    pub fn parent_id(&self) -> Option<&str> {
        self.parent_id.as_deref()
    }

    #[must_use]
    pub fn task_type(&self) -> &str {
        &self.task_type
    }

    #[must_use]
    pub fn semaphore_name(&self) -> &str {
        &self.semaphore_name
    }

    #[must_use]
    pub fn status(&self) -> TaskStatus {
        *self.status.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    #[must_use]
    pub fn topic_name(&self) -> String {
        task_topic(&self.task_id)
    }

    #[must_use]
    pub fn snapshot(&self) -> TaskSnapshot {
        let display = self.display.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let error = self.error.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        TaskSnapshot {
            task_id: self.task_id.clone(),
            parent_id: self.parent_id.clone(),
            task_type: self.task_type.clone(),
            status: self.status(),
            progress: self.progress.load(Ordering::Acquire),
            semaphore_name: self.semaphore_name.clone(),
            img: display.img.clone(),
            heading: display.heading.clone(),
            body: display.body.clone(),
            started_at: *self.started_at.lock().unwrap_or_else(std::sync::PoisonError::into_inner),
            completed_at: *self.completed_at.lock().unwrap_or_else(std::sync::PoisonError::into_inner),
            error_type: error.error_type.clone(),
            error_message: error.error_message.clone(),
            error_traceback: error.error_traceback.clone(),
        }
    }

    fn publish(&self) {
        let topic = self.topic_name();
        let _ = self.event_bus.publish(&topic, Event::Task(self.snapshot()));
    }

    pub(crate) fn mark_running(&self) {
        *self.started_at.lock().unwrap_or_else(std::sync::PoisonError::into_inner) = Some(self.clock.now());
        *self.status.lock().unwrap_or_else(std::sync::PoisonError::into_inner) = TaskStatus::Running;
        self.publish();
    }

    pub fn set_progress(&self, progress: i32) {
        self.progress.store(progress.clamp(-1, 100), Ordering::Release);
        self.publish();
    }

    pub fn set_heading(&self, heading: impl Into<String>) {
        self.display.lock().unwrap_or_else(std::sync::PoisonError::into_inner).heading = Some(heading.into());
        self.publish();
    }

    pub fn set_body_text(&self, body: impl Into<String>) {
        self.display.lock().unwrap_or_else(std::sync::PoisonError::into_inner).body = Some(body.into());
        self.publish();
    }

    pub fn set_img(&self, img: impl Into<String>) {
        self.display.lock().unwrap_or_else(std::sync::PoisonError::into_inner).img = Some(img.into());
        self.publish();
    }

    pub fn set_results(&self, results: Value) {
        *self.results.lock().unwrap_or_else(std::sync::PoisonError::into_inner) = Some(results);
    }

    #[must_use]
    pub fn results(&self) -> Option<Value> {
        self.results.lock().unwrap_or_else(std::sync::PoisonError::into_inner).clone()
    }

    /// Marks the record `done`, sets `completed_at`, and publishes the final
    /// snapshot and a topic close. No-op if already terminal.
    pub(crate) fn mark_done(&self) {
        if self.is_terminal() {
            return;
        }
        if self.progress.load(Ordering::Acquire) != 100 {
            self.progress.store(100, Ordering::Release);
        }
        *self.completed_at.lock().unwrap_or_else(std::sync::PoisonError::into_inner) = Some(self.clock.now());
        *self.status.lock().unwrap_or_else(std::sync::PoisonError::into_inner) = TaskStatus::Done;
        let topic = self.topic_name();
        let snapshot = self.snapshot();
        let _ = self.event_bus.close(&topic, Some(Event::Task(snapshot)));
    }

    /// Marks the record `failed` with the given error fields, sets
    /// `completed_at`, and publishes the final snapshot and a topic close.
    pub(crate) fn mark_failed(&self, kind: impl Into<String>, message: impl Into<String>, traceback: impl Into<String>) {
        if self.is_terminal() {
            return;
        }
        {
            let mut error = self.error.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
            error.error_type = Some(kind.into());
            error.error_message = Some(message.into());
            error.error_traceback = Some(traceback.into());
        }
        *self.completed_at.lock().unwrap_or_else(std::sync::PoisonError::into_inner) = Some(self.clock.now());
        *self.status.lock().unwrap_or_else(std::sync::PoisonError::into_inner) = TaskStatus::Failed;
        let topic = self.topic_name();
        let snapshot = self.snapshot();
        let _ = self.event_bus.close(&topic, Some(Event::Task(snapshot)));
    }

    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self.status(), TaskStatus::Done | TaskStatus::Failed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;

    fn new_record(id: &str) -> TaskRecord {
        TaskRecord::new(
            id.to_owned(),
            None,
            "example".to_owned(),
            "default".to_owned(),
            Arc::new(EventBus::new(16)),
            Arc::new(SystemClock),
        )
    }

    #[test]
    fn new_record_starts_queued_with_indeterminate_progress() {
        let record = new_record("t1");
        assert_eq!(record.status(), TaskStatus::Queued);
        assert_eq!(record.snapshot().progress, -1);
    }

    #[test]
    fn mark_failed_populates_all_three_error_fields() {
        let record = new_record("t1");
        record.mark_running();
        record.mark_failed("ValueError", "boom", "trace...");
        let snapshot = record.snapshot();
        assert_eq!(snapshot.status, TaskStatus::Failed);
        assert_eq!(snapshot.error_type.as_deref(), Some("ValueError"));
        assert_eq!(snapshot.error_message.as_deref(), Some("boom"));
        assert!(snapshot.started_at.is_some());
        assert!(snapshot.completed_at.is_some());
    }

    #[test]
    fn mark_done_sets_full_progress_unless_already_set_higher() {
        let record = new_record("t1");
        record.mark_running();
        record.set_progress(40);
        record.mark_done();
        assert_eq!(record.snapshot().progress, 100);
        assert_eq!(record.status(), TaskStatus::Done);
    }

    #[test]
    fn terminal_transition_is_idempotent() {
        let record = new_record("t1");
        record.mark_running();
        record.mark_done();
        record.mark_failed("ValueError", "too late", "trace");
        assert_eq!(record.status(), TaskStatus::Done);
    }
}
