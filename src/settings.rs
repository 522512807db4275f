//! Engine-wide tunables.
//!
//! Grounded on `eden_tasks::Settings`: a `serde`-deserializable,
//! `doku`-documented, `TypedBuilder`-constructed struct with `#[serde(default)]`
//! field defaults and a manual `Default` impl mirroring those defaults.

use std::num::NonZeroUsize;
use std::time::Duration;

use doku::Document;
use serde::{Deserialize, Serialize};
use serde_with::serde_as;
use typed_builder::TypedBuilder;

const fn default_dispatcher_pool_size() -> NonZeroUsize {
    match NonZeroUsize::new(16) {
        Some(value) => value,
        None => unreachable!(),
    }
}

const fn default_single_permits() -> usize {
    1
}

const fn default_multiple_permits() -> usize {
    10
}

const fn default_default_permits() -> usize {
    3
}

const fn default_max_succeeded_tasks() -> usize {
    10
}

fn default_tick_interval() -> Duration {
    Duration::from_secs(1)
}

fn default_progress_coalesce_interval() -> Duration {
    Duration::from_millis(100)
}

fn default_grace_period() -> Duration {
    Duration::from_secs(5)
}

const fn default_subscriber_buffer() -> usize {
    16
}

/// Configuration for a [`crate::Scheduler`] and the components it owns.
///
/// Unknown semaphore-class names outside of `single`/`multiple`/`default`
/// fall back to `default` at lookup time (see [`crate::SemaphoreRegistry`]);
/// `Settings` only controls the three required classes' permit counts.
#[serde_as]
#[derive(Debug, Clone, Deserialize, Document, Serialize, TypedBuilder)]
#[serde(default)]
pub struct Settings {
    /// Number of dispatcher workers draining the intake queue.
    #[builder(default = default_dispatcher_pool_size())]
    #[serde(default = "default_dispatcher_pool_size")]
    pub dispatcher_pool_size: NonZeroUsize,

    /// Permits for the `single` semaphore class.
    #[builder(default = default_single_permits())]
    #[serde(default = "default_single_permits")]
    pub single_permits: usize,

    /// Permits for the `multiple` semaphore class.
    #[builder(default = default_multiple_permits())]
    #[serde(default = "default_multiple_permits")]
    pub multiple_permits: usize,

    /// Permits for the `default` semaphore class (also the fallback for
    /// unknown class names).
    #[builder(default = default_default_permits())]
    #[serde(default = "default_default_permits")]
    pub default_permits: usize,

    /// How many successfully completed tasks the [`crate::Store`] retains.
    #[builder(default = default_max_succeeded_tasks())]
    #[serde(default = "default_max_succeeded_tasks")]
    pub max_succeeded_tasks: usize,

    /// How often the recurring engine checks for due entries, in milliseconds.
    #[builder(default_code = "default_tick_interval()")]
    #[serde(default = "default_tick_interval")]
    #[serde_as(as = "serde_with::DurationMilliSeconds")]
    #[doku(as = "u64")]
    pub tick_interval: Duration,

    /// Minimum spacing between progress-only event publications for a task,
    /// in milliseconds.
    #[builder(default_code = "default_progress_coalesce_interval()")]
    #[serde(default = "default_progress_coalesce_interval")]
    #[serde_as(as = "serde_with::DurationMilliSeconds")]
    #[doku(as = "u64")]
    pub progress_coalesce_interval: Duration,

    /// How long `Scheduler::stop` waits for in-flight bodies to unwind, in
    /// milliseconds.
    #[builder(default_code = "default_grace_period()")]
    #[serde(default = "default_grace_period")]
    #[serde_as(as = "serde_with::DurationMilliSeconds")]
    #[doku(as = "u64")]
    pub grace_period: Duration,

    /// Bound on each subscriber's per-topic buffer before it is dropped as
    /// too slow.
    #[builder(default = default_subscriber_buffer())]
    #[serde(default = "default_subscriber_buffer")]
    pub subscriber_buffer: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            dispatcher_pool_size: default_dispatcher_pool_size(),
            single_permits: default_single_permits(),
            multiple_permits: default_multiple_permits(),
            default_permits: default_default_permits(),
            max_succeeded_tasks: default_max_succeeded_tasks(),
            tick_interval: default_tick_interval(),
            progress_coalesce_interval: default_progress_coalesce_interval(),
            grace_period: default_grace_period(),
            subscriber_buffer: default_subscriber_buffer(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_required_values() {
        let settings = Settings::default();
        assert_eq!(settings.single_permits, 1);
        assert_eq!(settings.multiple_permits, 10);
        assert_eq!(settings.default_permits, 3);
        assert_eq!(settings.max_succeeded_tasks, 10);
        assert_eq!(settings.tick_interval, Duration::from_secs(1));
        assert_eq!(settings.grace_period, Duration::from_secs(5));
    }

    #[test]
    fn builder_overrides_single_field() {
        let settings = Settings::builder().max_succeeded_tasks(25).build();
        assert_eq!(settings.max_succeeded_tasks, 25);
        assert_eq!(settings.single_permits, 1);
    }
}
