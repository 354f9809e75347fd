use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use thiserror::Error;

/// Marker error raised when cooperative cancellation was observed.
///
/// Kept as its own type so every layer can tell a user cancellation apart from
/// a genuine failure by walking the error chain (see [`is_cancellation`]).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Error)]
#[error("operation cancelled")]
pub struct OperationCancelled;

/// Cooperative cancellation token shared across update and startup work.
#[derive(Debug, Clone, Default)]
pub struct CooperativeCancellationToken {
    cancelled: Arc<AtomicBool>,
    notify: Arc<tokio::sync::Notify>,
}

impl CooperativeCancellationToken {
    /// Creates a new, not-yet-cancelled token.
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks the token as cancelled and wakes pending waiters.
    pub fn cancel(&self) {
        let already_cancelled = self.cancelled.swap(true, Ordering::SeqCst);
        if !already_cancelled {
            self.notify.notify_waiters();
        }
    }

    /// Returns true when cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Fails with [`OperationCancelled`] once cancellation has been requested.
    pub fn check(&self) -> Result<(), OperationCancelled> {
        if self.is_cancelled() {
            return Err(OperationCancelled);
        }
        Ok(())
    }

    /// Resolves once cancellation has been requested.
    pub async fn cancelled(&self) {
        let notified = self.notify.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();
        if self.is_cancelled() {
            return;
        }
        notified.await;
    }
}

/// Returns true when `error` or any of its sources is [`OperationCancelled`].
pub fn is_cancellation(error: &anyhow::Error) -> bool {
    error
        .chain()
        .any(|cause| cause.downcast_ref::<OperationCancelled>().is_some())
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use anyhow::Context;

    use super::*;

    #[test]
    fn unit_check_reports_cancellation_after_cancel() {
        let token = CooperativeCancellationToken::new();
        assert!(token.check().is_ok());
        let clone = token.clone();
        clone.cancel();
        assert!(token.is_cancelled());
        assert_eq!(token.check(), Err(OperationCancelled));
    }

    #[test]
    fn unit_is_cancellation_walks_context_chain() {
        let wrapped = Err::<(), _>(OperationCancelled)
            .context("download interrupted")
            .expect_err("must fail");
        assert!(is_cancellation(&wrapped));
        assert!(!is_cancellation(&anyhow::anyhow!("network unreachable")));
    }

    #[tokio::test]
    async fn functional_cancelled_wakes_pending_waiter() {
        let token = CooperativeCancellationToken::new();
        let waiter = {
            let token = token.clone();
            tokio::spawn(async move { token.cancelled().await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        token.cancel();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter should wake")
            .expect("waiter task");
    }

    #[tokio::test]
    async fn regression_cancelled_returns_immediately_when_already_cancelled() {
        let token = CooperativeCancellationToken::new();
        token.cancel();
        tokio::time::timeout(Duration::from_millis(100), token.cancelled())
            .await
            .expect("already-cancelled token resolves immediately");
    }
}
