//! Run cancellation, per spec §4.14 step 5 (`stop(reason)`) and §5
//! ("Cancellation and timeouts").

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

struct Inner {
    stopped: AtomicBool,
    reason: Mutex<Option<String>>,
    notify: Notify,
}

/// A cloneable handle letting a caller cancel an in-flight
/// [`crate::run_turn_non_interactive`] call from another task.
///
/// Calling [`stop`](Self::stop) more than once is harmless; only the first
/// reason is kept.
#[derive(Clone)]
pub struct RunHandle {
    inner: Arc<Inner>,
}

impl RunHandle {
    /// Create a fresh, not-yet-stopped handle.
    #[must_use]
    pub fn new() -> Self {
        Self { inner: Arc::new(Inner { stopped: AtomicBool::new(false), reason: Mutex::new(None), notify: Notify::new() }) }
    }

    /// Signal cancellation with a human-readable reason.
    pub fn stop(&self, reason: impl Into<String>) {
        let mut guard = self.inner.reason.lock().expect("reason lock poisoned");
        if guard.is_none() {
            *guard = Some(reason.into());
        }
        drop(guard);
        self.inner.stopped.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    /// Whether [`stop`](Self::stop) has been called.
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.inner.stopped.load(Ordering::SeqCst)
    }

    /// The reason passed to [`stop`](Self::stop), if any.
    #[must_use]
    pub fn reason(&self) -> Option<String> {
        self.inner.reason.lock().expect("reason lock poisoned").clone()
    }

    /// Resolves once [`stop`](Self::stop) has been called. Resolves
    /// immediately if already stopped.
    pub async fn stopped(&self) {
        if self.is_stopped() {
            return;
        }
        loop {
            self.inner.notify.notified().await;
            if self.is_stopped() {
                return;
            }
        }
    }
}

impl Default for RunHandle {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_not_stopped() {
        let handle = RunHandle::new();
        assert!(!handle.is_stopped());
        assert!(handle.reason().is_none());
    }

    #[test]
    fn stop_keeps_first_reason() {
        let handle = RunHandle::new();
        handle.stop("first");
        handle.stop("second");
        assert_eq!(handle.reason(), Some("first".to_string()));
    }

    #[tokio::test]
    async fn stopped_resolves_after_stop() {
        let handle = RunHandle::new();
        let waiter = handle.clone();
        let task = tokio::spawn(async move {
            waiter.stopped().await;
        });
        handle.stop("user requested");
        task.await.unwrap();
    }

    #[tokio::test]
    async fn stopped_resolves_immediately_if_already_stopped() {
        let handle = RunHandle::new();
        handle.stop("already");
        tokio::time::timeout(std::time::Duration::from_millis(100), handle.stopped()).await.unwrap();
    }
}
