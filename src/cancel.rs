//! Cooperative cancellation token carried by every job.
//!
//! Cancelling stops the crawl loop from dequeuing, aborts in-flight fetches
//! at their next suspension point, and lets the engine drain cleanly before
//! the job is marked failed with reason `cancelled`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::Notify;

#[derive(Debug, Default)]
struct Inner {
    cancelled: AtomicBool,
    notify: Notify,
}

/// Cheaply cloneable cancellation handle.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    inner: Arc<Inner>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Signal cancellation. Idempotent.
    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::Release);
        self.inner.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::Acquire)
    }

    /// Resolve once the token is cancelled.
    pub async fn cancelled(&self) {
        loop {
            // Register interest before checking the flag so a concurrent
            // `cancel()` between the check and the await cannot be missed.
            let notified = self.inner.notify.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn cancelled_future_resolves_after_cancel() {
        let token = CancelToken::new();
        assert!(!token.is_cancelled());

        let waiter = token.clone();
        let handle = tokio::spawn(async move { waiter.cancelled().await });

        token.cancel();
        handle.await.expect("waiter should resolve");
        assert!(token.is_cancelled());
    }

    #[tokio::test]
    async fn cancelled_resolves_immediately_when_already_cancelled() {
        let token = CancelToken::new();
        token.cancel();
        token.cancelled().await;
    }
}
