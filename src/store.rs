//! Indexed in-memory collection of [`TaskRecord`]s.
//!
//! Grounded on `eden_tasks::registry::TaskRegistry`'s use of `DashMap` for a
//! concurrently-mutable lookup table; unlike the registry (which indexes
//! task *kinds*), this indexes task *instances*, since the crate has no
//! persistence layer requiring kind-keyed (de)serialization.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde_json::Value;

use crate::error::{Error, Result};
use crate::event_bus::{task_topic, Event, EventBus, QueueEvent, QUEUE_TOPIC};
use crate::task::{TaskRecord, TaskSnapshot, TaskStatus};

#[derive(Debug, Clone, Copy, Default)]
pub struct DeletionCounts {
    pub deleted_count: usize,
    pub failed_count: usize,
}

#[derive(Debug)]
pub struct Store {
    records: dashmap::DashMap<String, Arc<TaskRecord>>,
    insertion_order: Mutex<Vec<String>>,
    event_bus: Arc<EventBus>,
    max_succeeded_tasks: usize,
}

impl Store {
    #[must_use]
    pub fn new(event_bus: Arc<EventBus>, max_succeeded_tasks: usize) -> Self {
        Self {
            records: dashmap::DashMap::new(),
            insertion_order: Mutex::new(Vec::new()),
            event_bus,
            max_succeeded_tasks,
        }
    }

    pub fn insert(&self, record: Arc<TaskRecord>) {
        let task_id = record.task_id().to_owned();
        self.insertion_order.lock().unwrap_or_else(std::sync::PoisonError::into_inner).push(task_id.clone());
        self.records.insert(task_id, record);
    }

    #[must_use]
    pub fn get(&self, task_id: &str) -> Option<Arc<TaskRecord>> {
        self.records.get(task_id).map(|entry| Arc::clone(entry.value()))
    }

    #[must_use]
    pub fn list(&self) -> Vec<TaskSnapshot> {
        let order = self.insertion_order.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        order
            .iter()
            .filter_map(|task_id| self.records.get(task_id).map(|entry| entry.snapshot()))
            .collect()
    }

    /// Removes `task_id` and publishes `task_removed` on the queue topic.
    pub fn delete(&self, task_id: &str) -> Result<()> {
        if self.records.remove(task_id).is_none() {
            return Err(Error::TaskNotFound(task_id.to_owned()));
        }
        self.forget_position(task_id);
        self.event_bus.forget(&task_topic(task_id));
        let _ = self.event_bus.publish(
            QUEUE_TOPIC,
            Event::Queue(QueueEvent::TaskRemoved {
                task_id: task_id.to_owned(),
            }),
        );
        Ok(())
    }

    /// Removes every `done`/`failed` record. Returns how many were removed
    /// in total and how many of those were `failed`.
    pub fn delete_completed(&self) -> DeletionCounts {
        let terminal_ids: Vec<String> = self
            .records
            .iter()
            .filter(|entry| matches!(entry.value().status(), TaskStatus::Done | TaskStatus::Failed))
            .map(|entry| entry.key().clone())
            .collect();

        let mut counts = DeletionCounts::default();
        for task_id in terminal_ids {
            if let Some((_, record)) = self.records.remove(&task_id) {
                counts.deleted_count += 1;
                if record.status() == TaskStatus::Failed {
                    counts.failed_count += 1;
                }
                self.forget_position(&task_id);
                self.event_bus.forget(&task_topic(&task_id));
                let _ = self.event_bus.publish(
                    QUEUE_TOPIC,
                    Event::Queue(QueueEvent::TaskRemoved { task_id: task_id.clone() }),
                );
            }
        }
        counts
    }

    /// Matches records whose snapshot fields equal every entry in
    /// `criteria`. Unknown attribute names match nothing, never error.
    #[must_use]
    pub fn search(&self, criteria: &HashMap<String, Value>) -> Vec<String> {
        if criteria.is_empty() {
            return Vec::new();
        }
        self.records
            .iter()
            .filter(|entry| Self::matches(&entry.value().snapshot(), criteria))
            .map(|entry| entry.key().clone())
            .collect()
    }

    fn matches(snapshot: &TaskSnapshot, criteria: &HashMap<String, Value>) -> bool {
        let value = match serde_json::to_value(snapshot) {
            Ok(value) => value,
            Err(_) => return false,
        };
        let Some(object) = value.as_object() else {
            return false;
        };
        criteria.iter().all(|(key, expected)| object.get(key).is_some_and(|actual| actual == expected))
    }

    /// Keeps at most `max_succeeded_tasks` `done` records, preferring the
    /// most recently completed; `done` records with no `completed_at` are
    /// dropped first. Never removes `failed` or non-terminal records.
    pub fn prune_succeeded(&self) -> usize {
        let mut done: Vec<(String, Option<chrono::DateTime<chrono::Utc>>)> = self
            .records
            .iter()
            .filter(|entry| entry.value().status() == TaskStatus::Done)
            .map(|entry| (entry.key().clone(), entry.value().snapshot().completed_at))
            .collect();

        if done.len() <= self.max_succeeded_tasks {
            return 0;
        }

        done.sort_by(|a, b| match (a.1, b.1) {
            (Some(a_time), Some(b_time)) => b_time.cmp(&a_time),
            (Some(_), None) => std::cmp::Ordering::Less,
            (None, Some(_)) => std::cmp::Ordering::Greater,
            (None, None) => std::cmp::Ordering::Equal,
        });

        let to_remove = &done[self.max_succeeded_tasks..];
        let mut pruned = 0;
        for (task_id, _) in to_remove {
            if self.records.remove(task_id).is_some() {
                pruned += 1;
                self.forget_position(task_id);
                self.event_bus.forget(&task_topic(task_id));
                let _ = self.event_bus.publish(
                    QUEUE_TOPIC,
                    Event::Queue(QueueEvent::TaskRemoved { task_id: task_id.clone() }),
                );
            }
        }
        pruned
    }

    fn forget_position(&self, task_id: &str) {
        let mut order = self.insertion_order.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        order.retain(|id| id != task_id);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;

    fn record(event_bus: &Arc<EventBus>, id: &str) -> Arc<TaskRecord> {
        Arc::new(TaskRecord::new(
            id.to_owned(),
            None,
            "example".to_owned(),
            "default".to_owned(),
            Arc::clone(event_bus),
            Arc::new(SystemClock),
        ))
    }

    #[test]
    fn list_preserves_submission_order() {
        let bus = Arc::new(EventBus::new(16));
        let store = Store::new(Arc::clone(&bus), 10);
        for id in ["a", "b", "c"] {
            store.insert(record(&bus, id));
        }
        let ids: Vec<_> = store.list().into_iter().map(|snapshot| snapshot.task_id).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
    }

    #[test]
    fn delete_twice_returns_not_found_second_time() {
        let bus = Arc::new(EventBus::new(16));
        let store = Store::new(Arc::clone(&bus), 10);
        store.insert(record(&bus, "a"));
        store.delete("a").unwrap();
        assert!(matches!(store.delete("a"), Err(Error::TaskNotFound(_))));
    }

    #[test]
    fn prune_keeps_cap_and_never_removes_failed() {
        let bus = Arc::new(EventBus::new(16));
        let store = Store::new(Arc::clone(&bus), 2);
        for i in 0..5 {
            let rec = record(&bus, &format!("done-{i}"));
            rec.mark_running();
            rec.mark_done();
            store.insert(rec);
        }
        let failed = record(&bus, "failed-0");
        failed.mark_running();
        failed.mark_failed("ValueError", "boom", "trace");
        store.insert(failed);

        let pruned = store.prune_succeeded();
        assert_eq!(pruned, 3);
        assert_eq!(store.list().iter().filter(|s| s.status == TaskStatus::Done).count(), 2);
        assert!(store.list().iter().any(|s| s.status == TaskStatus::Failed));
    }

    #[test]
    fn prune_is_idempotent_with_no_new_completions() {
        let bus = Arc::new(EventBus::new(16));
        let store = Store::new(Arc::clone(&bus), 1);
        for i in 0..3 {
            let rec = record(&bus, &format!("done-{i}"));
            rec.mark_running();
            rec.mark_done();
            store.insert(rec);
        }
        store.prune_succeeded();
        let after_first = store.len();
        let second_pass = store.prune_succeeded();
        assert_eq!(second_pass, 0);
        assert_eq!(store.len(), after_first);
    }

    #[test]
    fn search_matches_on_task_type() {
        let bus = Arc::new(EventBus::new(16));
        let store = Store::new(Arc::clone(&bus), 10);
        store.insert(record(&bus, "a"));
        let mut criteria = HashMap::new();
        criteria.insert("task_type".to_owned(), Value::String("example".to_owned()));
        assert_eq!(store.search(&criteria), vec!["a".to_owned()]);
    }
}
