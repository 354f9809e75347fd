use std::sync::{Arc, Mutex};

use anyhow::Result;
use async_trait::async_trait;
use ccem_core::CooperativeCancellationToken;
use ccem_update::{
    ReleaseAsset, UpdateChannel, UpdateConfiguration, UpdateInfo, UpdateManager,
    UpdateManagerFactory, UpdateService,
};

#[derive(Default)]
pub(crate) struct Recorded {
    pub(crate) checks: Mutex<Vec<UpdateChannel>>,
    pub(crate) downloads: Mutex<usize>,
    pub(crate) deferred: Mutex<Vec<(String, bool, bool, Vec<String>)>>,
}

/// Manager answering every check with the same metadata.
struct StaticManager {
    channel: UpdateChannel,
    installed: bool,
    info: Option<UpdateInfo>,
    recorded: Arc<Recorded>,
}

#[async_trait]
impl UpdateManager for StaticManager {
    fn is_installed(&self) -> bool {
        self.installed
    }

    fn current_version(&self) -> Option<String> {
        self.installed.then(|| "1.0.0".to_string())
    }

    async fn check_for_updates(&self) -> Result<Option<UpdateInfo>> {
        self.recorded.checks.lock().unwrap().push(self.channel);
        Ok(self.info.clone())
    }

    async fn download_updates(
        &self,
        _update: &UpdateInfo,
        progress: &(dyn Fn(u8) + Send + Sync),
        _cancellation: &CooperativeCancellationToken,
    ) -> Result<()> {
        *self.recorded.downloads.lock().unwrap() += 1;
        progress(55);
        Ok(())
    }

    fn apply_updates_and_restart(&self, _release: &ReleaseAsset, _args: &[String]) -> Result<()> {
        Ok(())
    }

    async fn wait_exit_then_apply_updates(
        &self,
        release: &ReleaseAsset,
        silent: bool,
        restart: bool,
        restart_args: &[String],
    ) -> Result<()> {
        self.recorded.deferred.lock().unwrap().push((
            release.version.clone(),
            silent,
            restart,
            restart_args.to_vec(),
        ));
        Ok(())
    }
}

struct StaticFactory {
    installed: bool,
    info: Option<UpdateInfo>,
    recorded: Arc<Recorded>,
}

impl UpdateManagerFactory for StaticFactory {
    fn create(
        &self,
        _configuration: &UpdateConfiguration,
        channel: UpdateChannel,
    ) -> Result<Arc<dyn UpdateManager>> {
        Ok(Arc::new(StaticManager {
            channel,
            installed: self.installed,
            info: self.info.clone(),
            recorded: Arc::clone(&self.recorded),
        }))
    }
}

pub(crate) fn release(version: &str) -> ReleaseAsset {
    ReleaseAsset {
        package_id: "CCEM".to_string(),
        version: version.to_string(),
        file_name: format!("CCEM-{version}-full.nupkg"),
        sha256: "00".repeat(32),
        size: 1,
        notes_markdown: None,
        notes_html: None,
        download_url: None,
    }
}

pub(crate) fn static_service(
    installed: bool,
    info: Option<UpdateInfo>,
) -> (UpdateService, Arc<Recorded>) {
    let recorded = Arc::new(Recorded::default());
    let service = UpdateService::new(
        UpdateConfiguration::new("https://github.com/mchave3/CCEM").expect("configuration"),
        Arc::new(StaticFactory {
            installed,
            info,
            recorded: Arc::clone(&recorded),
        }),
    );
    (service, recorded)
}
