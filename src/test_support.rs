//! Sample [`crate::task::Body`] implementations used by this crate's own
//! test suite, grounded on `eden_tasks::test_utils::SampleRecurringTask`.

use async_trait::async_trait;
use tokio::time::{sleep, Duration};

use crate::task::{Body, TaskContext, TaskOutcome};

#[derive(Debug, Clone)]
pub(crate) struct SleepyTask {
    pub delay: Duration,
    pub semaphore_class: &'static str,
}

#[async_trait]
impl Body for SleepyTask {
    fn kind(&self) -> &'static str {
        "sleepy"
    }

    fn semaphore_class(&self) -> &'static str {
        self.semaphore_class
    }

    async fn run(&self, _ctx: &TaskContext) -> TaskOutcome {
        sleep(self.delay).await;
        TaskOutcome::Done
    }

    fn clone_body(&self) -> Box<dyn Body> {
        Box::new(self.clone())
    }
}

#[derive(Debug, Clone, Default)]
pub(crate) struct FailingTask;

#[async_trait]
impl Body for FailingTask {
    fn kind(&self) -> &'static str {
        "failing"
    }

    async fn run(&self, _ctx: &TaskContext) -> TaskOutcome {
        TaskOutcome::Failed {
            kind: "ValueError".to_owned(),
            message: "boom".to_owned(),
            traceback: "trace...".to_owned(),
        }
    }

    fn clone_body(&self) -> Box<dyn Body> {
        Box::new(self.clone())
    }
}

#[derive(Debug, Clone, Default)]
pub(crate) struct PanickingTask;

#[async_trait]
impl Body for PanickingTask {
    fn kind(&self) -> &'static str {
        "panicking"
    }

    async fn run(&self, _ctx: &TaskContext) -> TaskOutcome {
        panic!("deliberate panic for test coverage");
    }

    fn clone_body(&self) -> Box<dyn Body> {
        Box::new(self.clone())
    }
}

#[derive(Debug, Clone, Default)]
pub(crate) struct InstantTask;

#[async_trait]
impl Body for InstantTask {
    fn kind(&self) -> &'static str {
        "instant"
    }

    async fn run(&self, _ctx: &TaskContext) -> TaskOutcome {
        TaskOutcome::Done
    }

    fn clone_body(&self) -> Box<dyn Body> {
        Box::new(self.clone())
    }
}
