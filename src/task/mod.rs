//! Task bodies, their lifecycle record, and the snapshot shape published on
//! the event bus.
//!
//! `Body` is grounded on `eden_tasks::Task`: an `#[async_trait]` capability
//! object invoked by a worker, kept object-safe the same way (tested with
//! `static_assertions::assert_obj_safe!`). Unlike the teacher, a body here
//! carries no retry/backoff/priority contract — those are scheduler-level
//! concerns in `eden_tasks` that the spec this crate implements does not
//! have at the task level.

mod context;
mod record;

pub use self::context::TaskContext;
pub use self::record::{TaskRecord, TaskSnapshot};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// The externally observable lifecycle stage of a [`TaskRecord`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Queued,
    Running,
    Done,
    Failed,
}

/// What a [`Body`] reports when it returns without the engine needing to
/// infer completion from an exception.
#[derive(Debug, Clone)]
pub enum TaskOutcome {
    /// The body finished its work; the engine marks the record `done`.
    Done,
    /// The body failed; the engine records the three `error_*` fields and
    /// marks the record `failed`.
    Failed {
        kind: String,
        message: String,
        traceback: String,
    },
}

/// User-supplied work. Opaque to the engine beyond `kind()` and `run()`.
#[async_trait]
pub trait Body: Send + Sync + 'static {
    /// The class/kind name reported on the task's snapshot (`task_type`).
    fn kind(&self) -> &'static str;

    /// The semaphore class this body should be admitted under. Defaults to
    /// `"default"`.
    fn semaphore_class(&self) -> &'static str {
        crate::semaphore::DEFAULT
    }

    /// Invoked by a dispatcher once a semaphore permit has been acquired.
    async fn run(&self, ctx: &TaskContext) -> TaskOutcome;

    /// Polled periodically (default cadence: `Settings::progress_coalesce_interval`)
    /// so bodies that track progress externally (e.g. bytes read from a
    /// file) don't need their own timer. Errors are logged and ignored.
    async fn sample_progress(&self, _ctx: &TaskContext) {}

    /// A deep copy used by the recurring engine to spawn a fresh instance
    /// from a template. Bodies with no internal state can derive this
    /// trivially; implementations that carry large immutable config should
    /// wrap it in an `Arc` and clone cheaply.
    fn clone_body(&self) -> Box<dyn Body>;
}

#[cfg(test)]
mod tests {
    use super::*;

    static_assertions::assert_obj_safe!(Body);
}
