use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use ccem_core::CooperativeCancellationToken;
use serde::{Deserialize, Serialize};

use crate::{UpdateChannel, UpdateConfiguration};

/// One package listed by a channel feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseAsset {
    pub package_id: String,
    pub version: String,
    pub file_name: String,
    pub sha256: String,
    pub size: u64,
    #[serde(default)]
    pub notes_markdown: Option<String>,
    #[serde(default)]
    pub notes_html: Option<String>,
    #[serde(default)]
    pub download_url: Option<String>,
}

/// Feed metadata describing an available update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateInfo {
    /// Full package the installation would move to. `None` when the feed
    /// listed the release but the package could not be resolved.
    pub target_full_release: Option<ReleaseAsset>,
    pub is_downgrade: bool,
}

/// Channel-bound handle over the release feed and the local installation.
#[async_trait]
pub trait UpdateManager: Send + Sync {
    /// True when running from a managed installation.
    fn is_installed(&self) -> bool;

    /// Version of the local installation, when known.
    fn current_version(&self) -> Option<String>;

    /// Queries the feed; `None` means no applicable release.
    async fn check_for_updates(&self) -> Result<Option<UpdateInfo>>;

    /// Downloads and verifies the target package, reporting 0-100 progress.
    async fn download_updates(
        &self,
        update: &UpdateInfo,
        progress: &(dyn Fn(u8) + Send + Sync),
        cancellation: &CooperativeCancellationToken,
    ) -> Result<()>;

    /// Swaps in `release` and restarts; does not return on success.
    fn apply_updates_and_restart(&self, release: &ReleaseAsset, restart_args: &[String])
        -> Result<()>;

    /// Hands `release` to the updater, which applies it once this process exits.
    async fn wait_exit_then_apply_updates(
        &self,
        release: &ReleaseAsset,
        silent: bool,
        restart: bool,
        restart_args: &[String],
    ) -> Result<()>;
}

/// Builds managers bound to a configuration and channel.
pub trait UpdateManagerFactory: Send + Sync {
    fn create(
        &self,
        configuration: &UpdateConfiguration,
        channel: UpdateChannel,
    ) -> Result<Arc<dyn UpdateManager>>;
}
