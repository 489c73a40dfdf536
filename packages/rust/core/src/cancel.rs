//! Cooperative cancellation for enrichment runs.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

use tokio::sync::Notify;
use tracing::info;

/// A cloneable, one-shot cancellation signal.
///
/// Raising it is idempotent; only the first reason is kept. Once raised the
/// scheduler dispatches no further tasks and abandons in-flight ones.
#[derive(Clone, Default)]
pub struct CancelSignal {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    cancelled: AtomicBool,
    reason: OnceLock<String>,
    notify: Notify,
}

impl CancelSignal {
    /// A fresh, unraised signal.
    pub fn new() -> Self {
        Self::default()
    }

    /// Raise the signal.
    pub fn cancel(&self, reason: impl Into<String>) {
        if self
            .inner
            .cancelled
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            let reason = reason.into();
            info!(%reason, "cancellation requested");
            let _ = self.inner.reason.set(reason);
            self.inner.notify.notify_waiters();
        }
    }

    /// Whether the signal has been raised.
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// The first reason given, if raised.
    pub fn reason(&self) -> Option<&str> {
        self.inner.reason.get().map(String::as_str)
    }

    /// Resolve once the signal is raised.
    pub async fn cancelled(&self) {
        // Register before checking the flag so a concurrent `cancel` can't slip between.
        let notified = self.inner.notify.notified();
        if self.is_cancelled() {
            return;
        }
        notified.await;
    }
}

impl std::fmt::Debug for CancelSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancelSignal")
            .field("cancelled", &self.is_cancelled())
            .field("reason", &self.reason())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn starts_unraised() {
        let signal = CancelSignal::new();
        assert!(!signal.is_cancelled());
        assert!(signal.reason().is_none());
    }

    #[test]
    fn first_reason_wins() {
        let signal = CancelSignal::new();
        signal.cancel("interrupted");
        signal.cancel("second");
        assert!(signal.is_cancelled());
        assert_eq!(signal.reason(), Some("interrupted"));
    }

    #[test]
    fn clones_share_state() {
        let signal = CancelSignal::new();
        let clone = signal.clone();
        clone.cancel("stop");
        assert!(signal.is_cancelled());
    }

    #[tokio::test]
    async fn cancelled_resolves_for_waiters() {
        let signal = CancelSignal::new();
        let waiter = {
            let signal = signal.clone();
            tokio::spawn(async move { signal.cancelled().await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        signal.cancel("stop");

        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter should wake")
            .unwrap();
    }

    #[tokio::test]
    async fn cancelled_returns_immediately_when_already_raised() {
        let signal = CancelSignal::new();
        signal.cancel("early");
        tokio::time::timeout(Duration::from_millis(100), signal.cancelled())
            .await
            .expect("already cancelled");
    }
}
