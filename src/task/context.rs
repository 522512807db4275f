use std::sync::Arc;

use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::task::TaskRecord;

/// Passed to a [`crate::task::Body`]'s `run`/`sample_progress`. Lets the
/// body mutate its own display fields and observe cancellation without
/// exposing the engine-only terminal-transition methods on [`TaskRecord`].
#[derive(Debug, Clone)]
pub struct TaskContext {
    record: Arc<TaskRecord>,
    cancellation: CancellationToken,
}

impl TaskContext {
    pub(crate) fn new(record: Arc<TaskRecord>, cancellation: CancellationToken) -> Self {
        Self { record, cancellation }
    }

    #[must_use]
    pub fn task_id(&self) -> &str {
        self.record.task_id()
    }

    pub fn set_progress(&self, progress: i32) {
        self.record.set_progress(progress);
    }

    pub fn set_heading(&self, heading: impl Into<String>) {
        self.record.set_heading(heading);
    }

    pub fn set_body_text(&self, body: impl Into<String>) {
        self.record.set_body_text(body);
    }

    pub fn set_img(&self, img: impl Into<String>) {
        self.record.set_img(img);
    }

    pub fn set_results(&self, results: Value) {
        self.record.set_results(results);
    }

    /// Bodies that run long loops should check this periodically and
    /// return early when it fires; cancellation of a running task is
    /// best-effort and cooperative.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    pub async fn cancelled(&self) {
        self.cancellation.cancelled().await;
    }
}
