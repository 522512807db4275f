//! Wraps a body invocation so a panic becomes a captured [`TaskOutcome::Failed`]
//! instead of unwinding the dispatcher task.
//!
//! Grounded on `queue_worker::catch_unwind::CatchUnwindTaskFuture`, which
//! wraps a boxed future and calls `std::panic::catch_unwind` inside `poll`.
//! This crate has no custom `Future` impl to maintain since the body is
//! already `async`; `futures::FutureExt::catch_unwind` gives the same
//! guarantee with less code.

use std::panic::AssertUnwindSafe;

use futures::FutureExt;

use crate::task::{Body, TaskContext, TaskOutcome};

pub(crate) async fn run_guarded(body: &dyn Body, ctx: &TaskContext) -> TaskOutcome {
    match AssertUnwindSafe(body.run(ctx)).catch_unwind().await {
        Ok(outcome) => outcome,
        Err(panic) => TaskOutcome::Failed {
            kind: "panic".to_owned(),
            message: panic_message(&panic),
            traceback: format!("task {} panicked during execution", ctx.task_id()),
        },
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_owned()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "task panicked with a non-string payload".to_owned()
    }
}
