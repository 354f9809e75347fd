use std::future::Future;
use std::sync::Arc;

use ccem_core::CooperativeCancellationToken;
use futures_util::future::BoxFuture;
use futures_util::FutureExt;

use crate::{StartupContext, StartupError};

pub type StartupAction = Arc<
    dyn Fn(Arc<StartupContext>, CooperativeCancellationToken) -> BoxFuture<'static, anyhow::Result<()>>
        + Send
        + Sync,
>;

/// One named unit of startup work.
#[derive(Clone)]
pub struct StartupOperation {
    name: String,
    status_message: Option<String>,
    action: StartupAction,
}

impl StartupOperation {
    pub fn new<F, Fut>(
        name: impl Into<String>,
        status_message: Option<String>,
        action: F,
    ) -> Result<Self, StartupError>
    where
        F: Fn(Arc<StartupContext>, CooperativeCancellationToken) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(StartupError::InvalidStep(
                "step name cannot be empty".to_string(),
            ));
        }
        Ok(Self {
            name,
            status_message: status_message.filter(|message| !message.trim().is_empty()),
            action: Arc::new(move |context, cancellation| action(context, cancellation).boxed()),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn status_message(&self) -> Option<&str> {
        self.status_message.as_deref()
    }

    pub(crate) fn execute(&self, context: Arc<StartupContext>) -> BoxFuture<'static, anyhow::Result<()>> {
        let cancellation = context.cancellation().clone();
        (self.action)(context, cancellation)
    }
}

impl std::fmt::Debug for StartupOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StartupOperation")
            .field("name", &self.name)
            .field("status_message", &self.status_message)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unit_operation_rejects_blank_name_and_drops_blank_status() {
        let error = StartupOperation::new("  ", None, |_, _| async { Ok(()) })
            .expect_err("blank name");
        assert!(matches!(error, StartupError::InvalidStep(_)));

        let operation = StartupOperation::new("load-settings", Some(" ".to_string()), |_, _| async {
            Ok(())
        })
        .expect("operation");
        assert_eq!(operation.name(), "load-settings");
        assert_eq!(operation.status_message(), None);
    }
}
