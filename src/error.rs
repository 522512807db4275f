//! Crate-wide error type.
//!
//! Grounded on `eden_tasks::error`: small, named failure variants rather than
//! a stringly-typed catch-all. Unlike the teacher this crate has no
//! `error-stack` dependency; variants carry only the context needed to render
//! them and convert with plain `?`/`.map_err`.

use std::fmt;

use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// The discriminant exposed to callers who need to branch on failure kind
/// without matching the full [`Error`] enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    Cancelled,
    BodyError,
    Overflow,
    ShutdownInProgress,
    BadRequest,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::NotFound => "not_found",
            Self::Cancelled => "cancelled",
            Self::BodyError => "body_error",
            Self::Overflow => "overflow",
            Self::ShutdownInProgress => "shutdown_in_progress",
            Self::BadRequest => "bad_request",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("task {0} was not found")]
    TaskNotFound(String),

    #[error("recurring entry {0} was not found")]
    RecurringNotFound(String),

    #[error("task {task_id} was cancelled")]
    Cancelled { task_id: String },

    #[error("task body failed: {message}")]
    BodyError {
        kind: String,
        message: String,
        traceback: String,
    },

    #[error("subscriber for topic {topic} could not keep up and was dropped")]
    Overflow { topic: String },

    #[error("engine is shutting down, no new {0} are accepted")]
    ShutdownInProgress(&'static str),

    #[error("bad request: {0}")]
    BadRequest(String),
}

impl Error {
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::TaskNotFound(_) | Self::RecurringNotFound(_) => ErrorKind::NotFound,
            Self::Cancelled { .. } => ErrorKind::Cancelled,
            Self::BodyError { .. } => ErrorKind::BodyError,
            Self::Overflow { .. } => ErrorKind::Overflow,
            Self::ShutdownInProgress(_) => ErrorKind::ShutdownInProgress,
            Self::BadRequest(_) => ErrorKind::BadRequest,
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest(message.into())
    }
}

/// Failure to parse a cron expression when registering a recurrence.
///
/// Kept separate from [`Error`] because it only ever needs to be folded into
/// [`Error::BadRequest`]; the teacher follows the same pattern for its own
/// small conversion-only error structs (e.g. `ScheduleTaskError`).
#[derive(Debug, Error)]
#[error("invalid cron expression: {0}")]
pub struct InvalidCronError(pub String);

impl From<InvalidCronError> for Error {
    fn from(err: InvalidCronError) -> Self {
        Error::bad_request(err.to_string())
    }
}
