use ccem_core::OperationCancelled;
use thiserror::Error;

/// Failures surfaced by the update service.
#[derive(Debug, Error)]
pub enum UpdateError {
    /// A required argument was missing; always a bug at the call site.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    /// The call was valid but the supplied state cannot be acted on.
    #[error("invalid state: {0}")]
    InvalidState(String),
    #[error("update configuration error: {0}")]
    Configuration(String),
    #[error("update operation cancelled")]
    Cancelled(#[from] OperationCancelled),
    /// Feed, transport, integrity or apply failure from the update manager.
    #[error(transparent)]
    Manager(anyhow::Error),
}

impl UpdateError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, UpdateError::Cancelled(_))
    }

    /// Wraps a manager failure, keeping cancellations recognizable.
    pub(crate) fn from_manager(error: anyhow::Error) -> Self {
        if ccem_core::is_cancellation(&error) {
            return UpdateError::Cancelled(OperationCancelled);
        }
        UpdateError::Manager(error)
    }
}
