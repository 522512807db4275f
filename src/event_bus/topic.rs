use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use tokio::sync::broadcast;

use crate::error::{Error, Result};
use crate::event_bus::Event;

/// One named event stream: retains the latest published event for replay to
/// late subscribers, and tracks whether it has been closed.
///
/// The broadcast sender is dropped as part of `close`, not just flagged
/// terminal — that is what lets already-subscribed receivers drain their
/// buffered backlog and then observe `RecvError::Closed` on their own,
/// rather than blocking forever waiting for a send that will never come.
#[derive(Debug)]
pub(crate) struct Topic {
    sender: Mutex<Option<broadcast::Sender<Event>>>,
    latest: Mutex<Option<Event>>,
    terminal: AtomicBool,
}

impl Topic {
    pub(crate) fn new(buffer: usize) -> Self {
        let (sender, _receiver) = broadcast::channel(buffer.max(1));
        Self {
            sender: Mutex::new(Some(sender)),
            latest: Mutex::new(None),
            terminal: AtomicBool::new(false),
        }
    }

    pub(crate) fn is_terminal(&self) -> bool {
        self.terminal.load(Ordering::Acquire)
    }

    pub(crate) fn latest(&self) -> Option<Event> {
        self.latest.lock().unwrap_or_else(std::sync::PoisonError::into_inner).clone()
    }

    /// `None` if the topic is already terminal — there is nothing left to
    /// subscribe a live receiver to; callers fall back to replay only.
    pub(crate) fn subscribe(&self) -> Option<broadcast::Receiver<Event>> {
        self.sender
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .as_ref()
            .map(broadcast::Sender::subscribe)
    }

    #[allow(clippy::expect_used)]
    pub(crate) fn publish(&self, name: &str, event: Event) -> Result<usize> {
        if self.is_terminal() {
            return Err(Error::BadRequest(format!("topic {name} is closed")));
        }
        *self.latest.lock().unwrap_or_else(std::sync::PoisonError::into_inner) = Some(event.clone());
        let guard = self.sender.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let sender = guard.as_ref().expect("sender is present while the topic is open");
        Ok(sender.send(event).unwrap_or(0))
    }

    pub(crate) fn close(&self, name: &str, final_event: Option<Event>) -> Result<()> {
        if let Some(event) = final_event {
            self.publish(name, event)?;
        }
        self.terminal.store(true, Ordering::Release);
        self.sender.lock().unwrap_or_else(std::sync::PoisonError::into_inner).take();
        Ok(())
    }

    pub(crate) fn subscriber_count(&self) -> usize {
        self.sender
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .as_ref()
            .map_or(0, broadcast::Sender::receiver_count)
    }
}
