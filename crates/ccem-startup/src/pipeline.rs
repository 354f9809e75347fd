use std::future::Future;
use std::sync::Arc;

use ccem_core::{is_cancellation, CooperativeCancellationToken, OperationCancelled};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn, Instrument};

use crate::{ServiceRegistry, SplashHost, StartupContext, StartupError, StartupOperation};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StartupPipelineOptions {
    /// Shown before the first critical step.
    pub initial_status_message: Option<String>,
    /// Shown after the last critical step, right before the shell handoff.
    pub completion_status_message: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelinePhase {
    NotStarted,
    RunningCritical,
    ShellEntered,
    RunningBackground,
}

#[derive(Debug, Default)]
pub struct StartupPipelineBuilder {
    critical: Vec<StartupOperation>,
    background: Vec<StartupOperation>,
}

impl StartupPipelineBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a step that must finish before the shell is entered.
    pub fn critical_step<F, Fut>(
        mut self,
        name: impl Into<String>,
        status_message: Option<&str>,
        action: F,
    ) -> Result<Self, StartupError>
    where
        F: Fn(Arc<StartupContext>, CooperativeCancellationToken) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.critical.push(StartupOperation::new(
            name,
            status_message.map(str::to_string),
            action,
        )?);
        Ok(self)
    }

    /// Adds a step spawned once the shell is visible.
    pub fn background_step<F, Fut>(
        mut self,
        name: impl Into<String>,
        action: F,
    ) -> Result<Self, StartupError>
    where
        F: Fn(Arc<StartupContext>, CooperativeCancellationToken) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.background
            .push(StartupOperation::new(name, None, action)?);
        Ok(self)
    }

    pub fn build(
        self,
        splash: Arc<dyn SplashHost>,
        services: ServiceRegistry,
        options: StartupPipelineOptions,
    ) -> StartupPipeline {
        let (phase, _) = watch::channel(PipelinePhase::NotStarted);
        StartupPipeline {
            critical: self.critical,
            background: self.background,
            splash,
            services: Arc::new(services),
            options,
            phase,
        }
    }
}

pub struct StartupPipeline {
    critical: Vec<StartupOperation>,
    background: Vec<StartupOperation>,
    splash: Arc<dyn SplashHost>,
    services: Arc<ServiceRegistry>,
    options: StartupPipelineOptions,
    phase: watch::Sender<PipelinePhase>,
}

impl StartupPipeline {
    pub fn builder() -> StartupPipelineBuilder {
        StartupPipelineBuilder::new()
    }

    pub fn phase(&self) -> PipelinePhase {
        *self.phase.borrow()
    }

    /// Observes phase changes; the receiver outlives the pipeline.
    pub fn subscribe_phase(&self) -> watch::Receiver<PipelinePhase> {
        self.phase.subscribe()
    }

    /// Runs critical steps, enters the shell and spawns background steps.
    ///
    /// Nothing is spawned unless every critical step and the shell handoff
    /// succeeded.
    pub async fn run(
        self,
        cancellation: CooperativeCancellationToken,
    ) -> Result<BackgroundTasks, StartupError> {
        cancellation.check()?;
        let span = tracing::info_span!(
            "startup",
            critical = self.critical.len(),
            background = self.background.len()
        );

        self.splash.show_splash();
        let context = Arc::new(StartupContext::new(
            Arc::clone(&self.services),
            Arc::clone(&self.splash),
            span.clone(),
            cancellation.clone(),
        ));
        self.phase.send_replace(PipelinePhase::RunningCritical);

        if let Some(message) = self.options.initial_status_message.as_deref() {
            self.update_status_safe(message);
        }

        for operation in &self.critical {
            if cancellation.is_cancelled() {
                warn!(parent: &span, step = operation.name(), "startup cancelled before step");
                return Err(StartupError::Cancelled(OperationCancelled));
            }
            if let Some(message) = operation.status_message() {
                self.update_status_safe(message);
            }

            info!(parent: &span, step = operation.name(), "starting startup step");
            match operation
                .execute(Arc::clone(&context))
                .instrument(span.clone())
                .await
            {
                Ok(()) => info!(parent: &span, step = operation.name(), "completed startup step"),
                Err(error) if is_cancellation(&error) => {
                    warn!(parent: &span, step = operation.name(), "startup step was cancelled");
                    return Err(StartupError::Cancelled(OperationCancelled));
                }
                Err(error) => {
                    error!(
                        parent: &span,
                        step = operation.name(),
                        fatal = true,
                        error = %format!("{error:#}"),
                        "startup step failed"
                    );
                    return Err(StartupError::CriticalStepFailed {
                        step: operation.name().to_string(),
                        source: error,
                    });
                }
            }
        }

        if let Some(message) = self.options.completion_status_message.as_deref() {
            self.update_status_safe(message);
        }

        if let Err(error) = self.splash.enter_shell(&cancellation).await {
            if is_cancellation(&error) {
                warn!(parent: &span, "shell handoff was cancelled");
                return Err(StartupError::Cancelled(OperationCancelled));
            }
            error!(parent: &span, fatal = true, error = %format!("{error:#}"), "shell handoff failed");
            return Err(StartupError::ShellHandoff(error));
        }
        self.phase.send_replace(PipelinePhase::ShellEntered);

        let tasks = self
            .background
            .iter()
            .map(|operation| {
                let handle = spawn_background(operation.clone(), Arc::clone(&context), span.clone());
                (operation.name().to_string(), handle)
            })
            .collect::<Vec<_>>();
        if !tasks.is_empty() {
            self.phase.send_replace(PipelinePhase::RunningBackground);
        }
        debug!(parent: &span, spawned = tasks.len(), "startup critical phase finished");
        Ok(BackgroundTasks { tasks })
    }

    fn update_status_safe(&self, message: &str) {
        if message.trim().is_empty() {
            return;
        }
        if let Err(error) = self.splash.update_status(message) {
            error!(error = %format!("{error:#}"), "failed to update splash status");
        }
    }
}

fn spawn_background(
    operation: StartupOperation,
    context: Arc<StartupContext>,
    span: tracing::Span,
) -> JoinHandle<BackgroundStatus> {
    tokio::spawn(
        async move {
            let step = operation.name().to_string();
            if context.cancellation().is_cancelled() {
                warn!(step = %step, "background startup step cancelled before start");
                return BackgroundStatus::Cancelled;
            }
            info!(step = %step, "starting background startup step");
            match operation.execute(context).await {
                Ok(()) => {
                    info!(step = %step, "completed background startup step");
                    BackgroundStatus::Completed
                }
                Err(error) if is_cancellation(&error) => {
                    warn!(step = %step, "background startup step was cancelled");
                    BackgroundStatus::Cancelled
                }
                Err(error) => {
                    let message = format!("{error:#}");
                    error!(step = %step, error = %message, "background startup step failed");
                    BackgroundStatus::Failed(message)
                }
            }
        }
        .instrument(span),
    )
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackgroundStatus {
    Completed,
    Cancelled,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackgroundOutcome {
    pub name: String,
    pub status: BackgroundStatus,
}

/// Background steps spawned after the shell handoff.
///
/// Either [`join`](Self::join) them for a supervised shutdown or
/// [`detach`](Self::detach) them; detached steps keep running on the runtime
/// and only report through logs.
#[must_use = "background steps are only supervised through join()"]
pub struct BackgroundTasks {
    tasks: Vec<(String, JoinHandle<BackgroundStatus>)>,
}

impl BackgroundTasks {
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn names(&self) -> Vec<&str> {
        self.tasks.iter().map(|(name, _)| name.as_str()).collect()
    }

    /// Waits for every step, in registration order.
    pub async fn join(self) -> Vec<BackgroundOutcome> {
        let mut outcomes = Vec::with_capacity(self.tasks.len());
        for (name, handle) in self.tasks {
            let status = match handle.await {
                Ok(status) => status,
                Err(join_error) => {
                    let message = if join_error.is_panic() {
                        "background step panicked".to_string()
                    } else {
                        join_error.to_string()
                    };
                    error!(step = %name, error = %message, "background startup step aborted");
                    BackgroundStatus::Failed(message)
                }
            };
            outcomes.push(BackgroundOutcome { name, status });
        }
        outcomes
    }

    pub fn detach(self) {
        debug!(detached = self.tasks.len(), "detached background startup steps");
    }
}

impl std::fmt::Debug for BackgroundTasks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackgroundTasks")
            .field("names", &self.names())
            .finish()
    }
}
