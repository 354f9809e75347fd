use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::Result;
use async_trait::async_trait;
use ccem_core::CooperativeCancellationToken;
use tokio::sync::OnceCell;

/// Surface shown while critical startup work runs.
#[async_trait]
pub trait SplashHost: Send + Sync {
    /// Makes the splash visible. Safe to call repeatedly.
    fn show_splash(&self);

    /// Best effort; the pipeline logs and ignores failures.
    fn update_status(&self, message: &str) -> Result<()>;

    /// Moves from the splash into the main shell. Repeated calls after a
    /// successful transition are no-ops.
    async fn enter_shell(&self, cancellation: &CooperativeCancellationToken) -> Result<()>;
}

/// Runs a shell transition at most once.
///
/// A transition that fails or is cancelled leaves the guard unset so a later
/// call may retry it.
#[derive(Debug, Default)]
pub struct ShellHandoff {
    entered: OnceCell<()>,
}

impl ShellHandoff {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn has_entered(&self) -> bool {
        self.entered.initialized()
    }

    /// Returns `true` when this call performed the transition.
    pub async fn enter<F, Fut>(
        &self,
        cancellation: &CooperativeCancellationToken,
        transition: F,
    ) -> Result<bool>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        if self.has_entered() {
            return Ok(false);
        }
        let performed = AtomicBool::new(false);
        let performed_ref = &performed;
        self.entered
            .get_or_try_init(|| async move {
                cancellation.check()?;
                transition().await?;
                performed_ref.store(true, Ordering::SeqCst);
                Ok::<(), anyhow::Error>(())
            })
            .await?;
        Ok(performed.load(Ordering::SeqCst))
    }
}
