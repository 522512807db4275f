//! Named counting semaphores gating concurrent task execution per class.
//!
//! Grounded on `queue_worker::task_manager`'s single `tokio::sync::Semaphore`
//! used to cap a worker's running tasks, generalized here into a registry of
//! named semaphores so distinct task classes get distinct limits.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::settings::Settings;

pub const SINGLE: &str = "single";
pub const MULTIPLE: &str = "multiple";
pub const DEFAULT: &str = "default";

/// A registry of named semaphores. Looking up an unregistered name falls
/// back to the `default` class rather than erroring, matching the spec's
/// "unknown-name fallback" contract.
#[derive(Debug)]
pub struct SemaphoreRegistry {
    classes: DashMap<String, Arc<Semaphore>>,
}

impl SemaphoreRegistry {
    #[must_use]
    pub fn new(settings: &Settings) -> Self {
        let classes = DashMap::new();
        classes.insert(SINGLE.to_owned(), Arc::new(Semaphore::new(settings.single_permits)));
        classes.insert(MULTIPLE.to_owned(), Arc::new(Semaphore::new(settings.multiple_permits)));
        classes.insert(DEFAULT.to_owned(), Arc::new(Semaphore::new(settings.default_permits)));
        Self { classes }
    }

    /// Registers an additional named class with its own permit count. Must
    /// be called before the scheduler starts accepting submissions for that
    /// class.
    pub fn register(&self, name: impl Into<String>, permits: usize) {
        self.classes.insert(name.into(), Arc::new(Semaphore::new(permits)));
    }

    #[allow(clippy::expect_used)]
    fn resolve(&self, name: &str) -> Arc<Semaphore> {
        self.classes
            .get(name)
            .map(|entry| Arc::clone(entry.value()))
            .unwrap_or_else(|| {
                Arc::clone(
                    self.classes
                        .get(DEFAULT)
                        .expect("default semaphore class is always registered")
                        .value(),
                )
            })
    }

    /// Acquires a permit for `name`, or returns [`Error::Cancelled`] if
    /// `cancellation` fires first.
    #[allow(clippy::expect_used)]
    pub async fn acquire(
        &self,
        name: &str,
        task_id: &str,
        cancellation: &CancellationToken,
    ) -> Result<OwnedSemaphorePermit> {
        let semaphore = self.resolve(name);
        tokio::select! {
            biased;
            () = cancellation.cancelled() => Err(Error::Cancelled { task_id: task_id.to_owned() }),
            permit = semaphore.acquire_owned() => {
                Ok(permit.expect("semaphore is never closed while the registry is alive"))
            }
        }
    }

    #[must_use]
    pub fn available_permits(&self, name: &str) -> usize {
        self.resolve(name).available_permits()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn required_classes_have_spec_mandated_permit_counts() {
        let registry = SemaphoreRegistry::new(&Settings::default());
        assert_eq!(registry.available_permits(SINGLE), 1);
        assert_eq!(registry.available_permits(MULTIPLE), 10);
        assert_eq!(registry.available_permits(DEFAULT), 3);
    }

    #[test]
    fn unknown_class_falls_back_to_default() {
        let registry = SemaphoreRegistry::new(&Settings::default());
        assert_eq!(registry.available_permits("nonexistent"), registry.available_permits(DEFAULT));
    }

    #[tokio::test]
    async fn acquire_is_cancellable() {
        let registry = SemaphoreRegistry::new(&Settings::builder().single_permits(1).build());
        let cancellation = CancellationToken::new();
        let _held = registry.acquire(SINGLE, "a", &cancellation).await.unwrap();

        cancellation.cancel();
        let result = registry.acquire(SINGLE, "b", &cancellation).await;
        assert!(matches!(result, Err(Error::Cancelled { .. })));
    }
}
