//! Keyed single-flight guard.
//!
//! A second caller for a key that is already held is rejected, not queued.
//! The key is released when the returned [`FlightGuard`] drops, including
//! during unwinding.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::Notify;

/// Tracks which job keys are currently running.
#[derive(Debug, Clone, Default)]
pub struct SingleFlight {
    active: Arc<Mutex<HashSet<String>>>,
    released: Arc<Notify>,
}

fn lock_active(active: &Mutex<HashSet<String>>) -> MutexGuard<'_, HashSet<String>> {
    active
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
}

impl SingleFlight {
    /// Empty guard set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim `key`, or `None` when another holder has it.
    #[must_use]
    pub fn try_acquire(&self, key: &str) -> Option<FlightGuard> {
        let mut active = lock_active(&self.active);
        if !active.insert(key.to_string()) {
            return None;
        }
        Some(FlightGuard {
            active: Arc::clone(&self.active),
            released: Arc::clone(&self.released),
            key: key.to_string(),
        })
    }

    /// Whether `key` is currently held.
    #[must_use]
    pub fn is_active(&self, key: &str) -> bool {
        lock_active(&self.active).contains(key)
    }

    /// Resolve once `key` is not held.
    pub async fn released(&self, key: &str) {
        loop {
            let notified = self.released.notified();
            if !self.is_active(key) {
                return;
            }
            notified.await;
        }
    }
}

/// Releases its key on drop.
#[derive(Debug)]
pub struct FlightGuard {
    active: Arc<Mutex<HashSet<String>>>,
    released: Arc<Notify>,
    key: String,
}

impl FlightGuard {
    /// Key held by this guard.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl Drop for FlightGuard {
    fn drop(&mut self) {
        lock_active(&self.active).remove(&self.key);
        self.released.notify_waiters();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_acquire_is_rejected_until_release() {
        let flights = SingleFlight::new();
        let guard = flights.try_acquire("mail-backup");
        assert!(guard.is_some());
        assert!(flights.is_active("mail-backup"));
        assert!(flights.try_acquire("mail-backup").is_none());
        assert!(flights.try_acquire("other").is_some());

        drop(guard);
        assert!(!flights.is_active("mail-backup"));
        assert!(flights.try_acquire("mail-backup").is_some());
    }

    #[test]
    fn clones_share_state() {
        let flights = SingleFlight::new();
        let shared = flights.clone();
        let guard = flights.try_acquire("mail-backup");
        assert_eq!(guard.as_ref().map(FlightGuard::key), Some("mail-backup"));
        assert!(shared.try_acquire("mail-backup").is_none());
    }

    #[tokio::test]
    async fn released_waits_for_the_holder() {
        let flights = SingleFlight::new();
        flights.released("mail-backup").await;

        let guard = flights.try_acquire("mail-backup");
        let waiter = tokio::spawn({
            let flights = flights.clone();
            async move { flights.released("mail-backup").await }
        });
        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());
        drop(guard);
        assert!(waiter.await.is_ok());
    }

    #[test]
    fn guard_releases_during_unwind() {
        let flights = SingleFlight::new();
        let inner = flights.clone();
        let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(move || {
            let _guard = inner.try_acquire("mail-backup");
            panic!("boom");
        }));
        assert!(outcome.is_err());
        assert!(!flights.is_active("mail-backup"));
    }
}
