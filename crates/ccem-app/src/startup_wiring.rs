use std::sync::Arc;

use anyhow::Result;
use ccem_core::CooperativeCancellationToken;
use ccem_startup::{
    BackgroundOutcome, ServiceRegistry, SplashHost, StartupError, StartupPipeline,
    StartupPipelineOptions,
};
use ccem_update::{ChannelPolicy, SettingsStore, UpdateChannel, UpdateService};
use tracing::info;

use crate::update_commands::execute_check;

/// Channel baked into the running package, when installed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct PackagedChannel(pub(crate) Option<UpdateChannel>);

pub(crate) fn build_startup_pipeline<S: SettingsStore + 'static>(
    splash: Arc<dyn SplashHost>,
    services: ServiceRegistry,
) -> Result<StartupPipeline, StartupError> {
    let pipeline = StartupPipeline::builder()
        .critical_step(
            "resolve-update-channel",
            Some("Resolving update channel"),
            |context, _| async move {
                let policy = context.required::<ChannelPolicy<S>>()?;
                let service = context.required::<UpdateService>()?;
                let packaged = context
                    .optional::<PackagedChannel>()
                    .and_then(|packaged| packaged.0);
                let resolution = policy.resolve(packaged)?;
                service.set_channel(resolution.channel);
                Ok::<(), anyhow::Error>(())
            },
        )?
        .critical_step(
            "probe-installation",
            Some("Checking installation"),
            |context, _| async move {
                let service = context.required::<UpdateService>()?;
                let version = service.currently_installed_version()?;
                info!(
                    installed = version.is_some(),
                    version = version.as_deref().unwrap_or("unknown"),
                    "probed installation"
                );
                Ok::<(), anyhow::Error>(())
            },
        )?
        .background_step("check-for-updates", |context, cancellation| async move {
            let service = context.required::<UpdateService>()?;
            if !service.is_running_installed_version()? {
                info!("not a managed installation; skipping update check");
                return Ok(());
            }
            let policy = context.required::<ChannelPolicy<S>>()?;
            let report = execute_check(&service, &policy, &cancellation).await?;
            info!(report = %report, "background update check finished");
            Ok::<(), anyhow::Error>(())
        })?
        .build(
            splash,
            services,
            StartupPipelineOptions {
                initial_status_message: Some("Starting CCEM".to_string()),
                completion_status_message: Some("Opening workspace".to_string()),
            },
        );
    Ok(pipeline)
}

/// Headless startup. Background steps are joined so the process outlives them.
pub(crate) async fn run_startup<S: SettingsStore + 'static>(
    splash: Arc<dyn SplashHost>,
    service: Arc<UpdateService>,
    policy: Arc<ChannelPolicy<S>>,
    packaged: Option<UpdateChannel>,
    cancellation: CooperativeCancellationToken,
) -> Result<Vec<BackgroundOutcome>> {
    let services = ServiceRegistry::new()
        .with(service)
        .with(policy)
        .with(Arc::new(PackagedChannel(packaged)));
    let tasks = build_startup_pipeline::<S>(splash, services)?
        .run(cancellation)
        .await?;
    Ok(tasks.join().await)
}
