//! Injectable time source.
//!
//! Every component that needs wall time takes an `Arc<dyn Clock>` instead of
//! calling `Utc::now()` directly, the same way the teacher threads an
//! optional `now: DateTime<Utc>` through `TaskTrigger::upcoming` rather than
//! reading the clock inline. This is what lets the scheduling and recurring
//! tests in this crate run without real sleeps.

use std::sync::Mutex;

use chrono::{DateTime, Utc};

pub trait Clock: Send + Sync + std::fmt::Debug {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only advances when told to. Used by tests that exercise
/// recurring-engine ticks and semaphore-serialization scenarios without
/// waiting on real time.
#[derive(Debug)]
pub struct TestClock {
    current: Mutex<DateTime<Utc>>,
}

impl TestClock {
    #[must_use]
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            current: Mutex::new(start),
        }
    }

    pub fn advance(&self, delta: chrono::TimeDelta) {
        let mut guard = self.current.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        *guard += delta;
    }

    pub fn set(&self, to: DateTime<Utc>) {
        let mut guard = self.current.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        *guard = to;
    }
}

impl Clock for TestClock {
    fn now(&self) -> DateTime<Utc> {
        *self.current.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clock_advances_monotonically_on_request() {
        let clock = TestClock::new(Utc::now());
        let first = clock.now();
        clock.advance(chrono::TimeDelta::seconds(5));
        let second = clock.now();
        assert_eq!(second - first, chrono::TimeDelta::seconds(5));
    }
}
