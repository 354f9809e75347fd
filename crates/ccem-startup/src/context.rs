use std::any::Any;
use std::sync::Arc;

use ccem_core::CooperativeCancellationToken;

use crate::{ServiceRegistry, SplashHost, StartupError};

/// Shared by every step of one pipeline run.
pub struct StartupContext {
    services: Arc<ServiceRegistry>,
    splash: Arc<dyn SplashHost>,
    span: tracing::Span,
    cancellation: CooperativeCancellationToken,
}

impl StartupContext {
    pub fn new(
        services: Arc<ServiceRegistry>,
        splash: Arc<dyn SplashHost>,
        span: tracing::Span,
        cancellation: CooperativeCancellationToken,
    ) -> Self {
        Self {
            services,
            splash,
            span,
            cancellation,
        }
    }

    pub fn splash(&self) -> &Arc<dyn SplashHost> {
        &self.splash
    }

    /// Span the pipeline logs under; steps may enter it or parent their own.
    pub fn span(&self) -> &tracing::Span {
        &self.span
    }

    pub fn cancellation(&self) -> &CooperativeCancellationToken {
        &self.cancellation
    }

    pub fn services(&self) -> &ServiceRegistry {
        &self.services
    }

    pub fn required<T: Any + Send + Sync>(&self) -> Result<Arc<T>, StartupError> {
        self.services
            .get::<T>()
            .ok_or(StartupError::MissingService(std::any::type_name::<T>()))
    }

    pub fn optional<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        self.services.get::<T>()
    }
}

impl std::fmt::Debug for StartupContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StartupContext")
            .field("services", &self.services)
            .field("cancelled", &self.cancellation.is_cancelled())
            .finish()
    }
}
