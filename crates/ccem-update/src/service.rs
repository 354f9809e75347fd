use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use ccem_core::{CooperativeCancellationToken, OperationCancelled};
use tracing::{debug, error, info, warn};

use crate::{
    PendingUpdate, ReleaseAsset, UpdateChannel, UpdateCheckResult, UpdateConfiguration,
    UpdateError, UpdateManager, UpdateManagerFactory, UpdateOutcome,
};

/// Single point of truth for "is there a newer release, and how do I get it".
///
/// Every operation builds a fresh manager bound to the channel current at call
/// time. The channel itself is an atomic field, so `set_channel` may race with
/// in-flight operations without tearing; each operation sees one channel.
pub struct UpdateService {
    configuration: UpdateConfiguration,
    factory: Arc<dyn UpdateManagerFactory>,
    channel: AtomicU8,
}

impl UpdateService {
    pub fn new(configuration: UpdateConfiguration, factory: Arc<dyn UpdateManagerFactory>) -> Self {
        let channel = UpdateChannel::default();
        debug!(
            repository = configuration.repository_url(),
            %channel,
            "initialized update service"
        );
        Self {
            configuration,
            factory,
            channel: AtomicU8::new(channel.to_u8()),
        }
    }

    pub fn with_channel(self, channel: UpdateChannel) -> Self {
        self.channel.store(channel.to_u8(), Ordering::SeqCst);
        self
    }

    pub fn configuration(&self) -> &UpdateConfiguration {
        &self.configuration
    }

    pub fn current_channel(&self) -> UpdateChannel {
        UpdateChannel::from_u8(self.channel.load(Ordering::SeqCst))
    }

    /// Switches the channel used by subsequent operations. Pure in-memory.
    pub fn set_channel(&self, channel: UpdateChannel) {
        let previous = UpdateChannel::from_u8(self.channel.swap(channel.to_u8(), Ordering::SeqCst));
        if previous == channel {
            debug!(%channel, "update channel already selected");
            return;
        }
        info!(%previous, %channel, "update channel changed");
    }

    /// Queries the release feed for the current channel.
    ///
    /// A token cancelled before the call fails without touching the feed; a
    /// cancellation while the query is in flight abandons it.
    pub async fn check_for_updates(
        &self,
        cancellation: &CooperativeCancellationToken,
    ) -> Result<UpdateCheckResult, UpdateError> {
        let channel = self.current_channel();
        info!(
            repository = self.configuration.repository_url(),
            %channel,
            "checking for updates"
        );

        let outcome = self.check_on_channel(channel, cancellation).await;
        match &outcome {
            Ok(result) => info!(
                update_available = result.is_update_available(),
                current_version = result.current_version().unwrap_or("unknown"),
                available_version = result.available_version().unwrap_or("unknown"),
                is_downgrade = result.is_downgrade(),
                "update check completed"
            ),
            Err(error) if error.is_cancelled() => info!(%channel, "update check cancelled by caller"),
            Err(error) => error!(%channel, "failed to check for updates: {error:#}"),
        }
        outcome
    }

    async fn check_on_channel(
        &self,
        channel: UpdateChannel,
        cancellation: &CooperativeCancellationToken,
    ) -> Result<UpdateCheckResult, UpdateError> {
        cancellation.check()?;
        let manager = self.create_manager(channel)?;
        cancellation.check()?;

        let update_info = tokio::select! {
            biased;
            _ = cancellation.cancelled() => return Err(OperationCancelled.into()),
            response = manager.check_for_updates() => response.map_err(UpdateError::from_manager)?,
        };
        cancellation.check()?;

        Ok(UpdateCheckResult::new(
            channel,
            manager.current_version(),
            update_info,
        ))
    }

    /// Downloads the payload described by `update`.
    ///
    /// `None` (no check was ever completed) is an invalid argument; a result
    /// without update metadata is an invalid state. Progress ends with `100`.
    pub async fn download_updates(
        &self,
        update: Option<&UpdateCheckResult>,
        progress: &(dyn Fn(u8) + Send + Sync),
        cancellation: &CooperativeCancellationToken,
    ) -> Result<(), UpdateError> {
        let Some(update) = update else {
            error!("download requested without an update check result");
            return Err(UpdateError::InvalidArgument(
                "an update check result is required".to_string(),
            ));
        };
        match update.outcome() {
            UpdateOutcome::NoUpdateAvailable => {
                error!("download requested without update metadata");
                Err(UpdateError::InvalidState(
                    "there is no update information available to download".to_string(),
                ))
            }
            UpdateOutcome::UpdateAvailable(pending) => {
                self.download_pending(pending, progress, cancellation).await
            }
        }
    }

    /// Downloads an update that is statically known to carry metadata.
    pub async fn download_pending(
        &self,
        pending: PendingUpdate<'_>,
        progress: &(dyn Fn(u8) + Send + Sync),
        cancellation: &CooperativeCancellationToken,
    ) -> Result<(), UpdateError> {
        let result = pending.result();
        let channel = self.current_channel();
        let version = result.version_label();
        if result.channel() != channel {
            warn!(
                checked_on = %result.channel(),
                %channel,
                version,
                "downloading an update checked on another channel; re-check to refresh it"
            );
        }
        info!(version, %channel, "starting update download");

        let last_reported = AtomicU8::new(0);
        let tracking = |value: u8| {
            let value = value.min(100);
            last_reported.store(value, Ordering::SeqCst);
            progress(value);
        };

        let outcome = async {
            cancellation.check()?;
            let manager = self.create_manager(channel)?;
            cancellation.check()?;
            manager
                .download_updates(pending.info(), &tracking, cancellation)
                .await
                .map_err(UpdateError::from_manager)?;
            if last_reported.load(Ordering::SeqCst) != 100 {
                progress(100);
            }
            Ok::<(), UpdateError>(())
        }
        .await;

        match &outcome {
            Ok(()) => info!(version, "completed update download"),
            Err(error) if error.is_cancelled() => info!(version, "update download cancelled"),
            Err(error) => error!(version, "failed to download update: {error:#}"),
        }
        outcome
    }

    /// Applies the downloaded update and restarts the application.
    ///
    /// On success the process is replaced and this call does not return.
    pub fn apply_updates_and_restart(
        &self,
        update: Option<&UpdateCheckResult>,
        restart_args: &[String],
    ) -> Result<(), UpdateError> {
        let (update, release) = require_target_release(update, "apply")?;
        let version = update.version_label();
        info!(version, "applying update and restarting application");

        let manager = self.create_manager(self.current_channel())?;
        manager
            .apply_updates_and_restart(release, restart_args)
            .map_err(|error| {
                error!(version, "failed to apply update: {error:#}");
                UpdateError::from_manager(error)
            })
    }

    /// Hands the update to the updater, which swaps it in once this process
    /// has exited; optionally relaunches the application afterwards.
    pub async fn wait_exit_then_apply_updates(
        &self,
        update: Option<&UpdateCheckResult>,
        silent: bool,
        restart: bool,
        restart_args: &[String],
        cancellation: &CooperativeCancellationToken,
    ) -> Result<(), UpdateError> {
        let (update, release) = require_target_release(update, "deferred apply")?;
        let version = update.version_label();
        info!(version, silent, restart, "waiting for exit before applying update");

        let outcome = async {
            cancellation.check()?;
            let manager = self.create_manager(self.current_channel())?;
            cancellation.check()?;
            manager
                .wait_exit_then_apply_updates(release, silent, restart, restart_args)
                .await
                .map_err(UpdateError::from_manager)
        }
        .await;

        match &outcome {
            Ok(()) => info!(version, "scheduled update apply after process exit"),
            Err(error) if error.is_cancelled() => info!(version, "deferred apply cancelled"),
            Err(error) => error!(version, "failed during deferred apply: {error:#}"),
        }
        outcome
    }

    /// True when running from a managed installation. No network access.
    pub fn is_running_installed_version(&self) -> Result<bool, UpdateError> {
        let manager = self.create_manager(self.current_channel())?;
        let installed = manager.is_installed();
        debug!(installed, "probed installation state");
        Ok(installed)
    }

    /// Locally installed version, when running from a managed installation.
    pub fn currently_installed_version(&self) -> Result<Option<String>, UpdateError> {
        let manager = self.create_manager(self.current_channel())?;
        let version = manager.current_version();
        debug!(
            version = version.as_deref().unwrap_or("unknown"),
            "detected installed version"
        );
        Ok(version)
    }

    fn create_manager(&self, channel: UpdateChannel) -> Result<Arc<dyn UpdateManager>, UpdateError> {
        debug!(%channel, "creating update manager");
        self.factory
            .create(&self.configuration, channel)
            .map_err(|error| {
                error!(%channel, "failed to create update manager: {error:#}");
                UpdateError::Manager(error)
            })
    }
}

fn require_target_release<'a>(
    update: Option<&'a UpdateCheckResult>,
    operation: &str,
) -> Result<(&'a UpdateCheckResult, &'a ReleaseAsset), UpdateError> {
    let Some(update) = update else {
        error!(operation, "update operation invoked without an update check result");
        return Err(UpdateError::InvalidArgument(
            "an update check result is required".to_string(),
        ));
    };
    let Some(release) = update.target_release() else {
        error!(operation, "update operation invoked without a target release");
        return Err(UpdateError::InvalidState(
            "the update information does not contain a target release".to_string(),
        ));
    };
    Ok((update, release))
}
