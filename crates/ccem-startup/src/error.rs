use ccem_core::OperationCancelled;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("startup was cancelled")]
    Cancelled(#[from] OperationCancelled),
    #[error("critical startup step '{step}' failed")]
    CriticalStepFailed {
        step: String,
        #[source]
        source: anyhow::Error,
    },
    #[error("failed to enter the application shell")]
    ShellHandoff(#[source] anyhow::Error),
    #[error("invalid startup step: {0}")]
    InvalidStep(String),
    #[error("service of type {0} is not registered")]
    MissingService(&'static str),
}

impl StartupError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, StartupError::Cancelled(_))
    }
}
