pub mod clock;
pub mod error;
pub mod event_bus;
pub mod recurring;
pub mod scheduler;
pub mod semaphore;
pub mod settings;
pub mod store;
pub mod task;

#[cfg(test)]
pub(crate) mod test_support;

pub use self::clock::{Clock, SystemClock};
pub use self::error::{Error, ErrorKind, Result};
pub use self::event_bus::{Event, EventBus, QueueEvent};
pub use self::recurring::{RecurringEngine, RecurringHandle, RecurringInfo};
pub use self::scheduler::Scheduler;
pub use self::semaphore::SemaphoreRegistry;
pub use self::settings::Settings;
pub use self::store::{DeletionCounts, Store};
pub use self::task::{Body, TaskContext, TaskOutcome, TaskRecord, TaskSnapshot, TaskStatus};

pub mod prelude {
    pub use super::task::{Body, TaskContext, TaskOutcome, TaskRecord, TaskStatus};
    pub use ::async_trait::async_trait;
    pub use ::chrono::{DateTime, Utc};
    pub use ::serde::{Deserialize, Serialize};
}
