//! Per-topic publish/subscribe fan-out.
//!
//! Enriched from `Kocoro-lab-Shannon`'s `workflow::embedded::event_bus`
//! (`tokio::sync::broadcast` keyed by a `DashMap`-style topic name), which
//! the teacher has no equivalent of. Two behaviours this crate needs beyond
//! that source: replay of the latest retained event to new subscribers, and
//! an explicit terminal state rather than silent channel drop.

mod topic;

use std::sync::Arc;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::error::{Error, Result};
use crate::task::TaskSnapshot;
use topic::Topic;

/// Events published on the queue-wide topic (`queue`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum QueueEvent {
    TaskAdded { task: TaskSnapshot },
    TaskRemoved { task_id: String },
    QueueUpdated,
}

/// Anything the bus can carry. Task topics only ever carry `Task`; the
/// queue topic only ever carries `Queue`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Event {
    Task(TaskSnapshot),
    Queue(QueueEvent),
}

pub const QUEUE_TOPIC: &str = "queue";

pub fn task_topic(task_id: &str) -> String {
    format!("task/{task_id}")
}

#[derive(Debug)]
pub struct EventBus {
    topics: DashMap<String, Arc<Topic>>,
    subscriber_buffer: usize,
}

impl EventBus {
    #[must_use]
    pub fn new(subscriber_buffer: usize) -> Self {
        Self {
            topics: DashMap::new(),
            subscriber_buffer,
        }
    }

    fn topic(&self, name: &str) -> Arc<Topic> {
        Arc::clone(
            self.topics
                .entry(name.to_owned())
                .or_insert_with(|| Arc::new(Topic::new(self.subscriber_buffer)))
                .value(),
        )
    }

    /// Subscribes to `topic_name`, replaying the retained latest event (if
    /// any) as the subscription's first item.
    #[must_use]
    pub fn subscribe(&self, topic_name: &str) -> Subscription {
        let topic = self.topic(topic_name);
        let replay = topic.latest();
        let receiver = topic.subscribe();
        Subscription {
            topic_name: topic_name.to_owned(),
            replay,
            receiver,
        }
    }

    /// Publishes `event` on `topic_name`. A no-op error if the topic is
    /// already terminal.
    pub fn publish(&self, topic_name: &str, event: Event) -> Result<usize> {
        self.topic(topic_name).publish(topic_name, event)
    }

    /// Optionally publishes `final_event` then marks `topic_name` terminal.
    pub fn close(&self, topic_name: &str, final_event: Option<Event>) -> Result<()> {
        self.topic(topic_name).close(topic_name, final_event)
    }

    #[must_use]
    pub fn subscriber_count(&self, topic_name: &str) -> usize {
        self.topic(topic_name).subscriber_count()
    }

    #[must_use]
    pub fn active_topics(&self) -> usize {
        self.topics.len()
    }

    /// Drops the bus's own handle to a topic. Existing subscriptions still
    /// drain whatever was already queued for them.
    pub fn forget(&self, topic_name: &str) {
        self.topics.remove(topic_name);
    }
}

/// A live subscription to one topic. `next` yields `None` once the topic is
/// closed and any replay/backlog has drained.
///
/// `receiver` is `None` when the subscription was created after the topic
/// had already closed with no live channel left to join — in that case only
/// the replayed final event (if any) is delivered before the stream ends.
#[derive(Debug)]
pub struct Subscription {
    topic_name: String,
    replay: Option<Event>,
    receiver: Option<broadcast::Receiver<Event>>,
}

impl Subscription {
    pub async fn next(&mut self) -> Option<Result<Event>> {
        if let Some(event) = self.replay.take() {
            return Some(Ok(event));
        }
        let receiver = self.receiver.as_mut()?;
        match receiver.recv().await {
            Ok(event) => Some(Ok(event)),
            Err(broadcast::error::RecvError::Lagged(_)) => {
                self.receiver = None;
                Some(Err(Error::Overflow {
                    topic: self.topic_name.clone(),
                }))
            }
            Err(broadcast::error::RecvError::Closed) => {
                self.receiver = None;
                None
            }
        }
    }
}
