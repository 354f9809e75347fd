use crate::{ReleaseAsset, UpdateChannel, UpdateInfo};

/// Outcome of one update check.
///
/// Produced on a specific channel; switching channels afterwards does not
/// invalidate it, callers re-check when they need fresh metadata. Fields are
/// read-only so the availability flag always agrees with [`Self::outcome`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateCheckResult {
    current_version: Option<String>,
    available_version: Option<String>,
    release_notes_markdown: Option<String>,
    release_notes_html: Option<String>,
    is_downgrade: bool,
    channel: UpdateChannel,
    update_info: Option<UpdateInfo>,
}

impl UpdateCheckResult {
    /// Builds a result from raw feed metadata and the locally installed version.
    pub fn new(
        channel: UpdateChannel,
        current_version: Option<String>,
        update_info: Option<UpdateInfo>,
    ) -> Self {
        let target = update_info
            .as_ref()
            .and_then(|info| info.target_full_release.as_ref());
        Self {
            current_version,
            available_version: target.map(|asset| asset.version.clone()),
            release_notes_markdown: target.and_then(|asset| asset.notes_markdown.clone()),
            release_notes_html: target.and_then(|asset| asset.notes_html.clone()),
            is_downgrade: update_info
                .as_ref()
                .map(|info| info.is_downgrade)
                .unwrap_or(false),
            channel,
            update_info,
        }
    }

    pub fn is_update_available(&self) -> bool {
        self.update_info.is_some()
    }

    pub fn current_version(&self) -> Option<&str> {
        self.current_version.as_deref()
    }

    pub fn available_version(&self) -> Option<&str> {
        self.available_version.as_deref()
    }

    pub fn release_notes_markdown(&self) -> Option<&str> {
        self.release_notes_markdown.as_deref()
    }

    pub fn release_notes_html(&self) -> Option<&str> {
        self.release_notes_html.as_deref()
    }

    pub fn is_downgrade(&self) -> bool {
        self.is_downgrade
    }

    /// Channel the check ran against.
    pub fn channel(&self) -> UpdateChannel {
        self.channel
    }

    pub fn update_info(&self) -> Option<&UpdateInfo> {
        self.update_info.as_ref()
    }

    /// Package apply/restart operations act on.
    pub fn target_release(&self) -> Option<&ReleaseAsset> {
        self.update_info
            .as_ref()
            .and_then(|info| info.target_full_release.as_ref())
    }

    /// Tagged view separating "nothing to do" from "metadata in hand".
    pub fn outcome(&self) -> UpdateOutcome<'_> {
        match self.update_info.as_ref() {
            Some(info) => UpdateOutcome::UpdateAvailable(PendingUpdate { result: self, info }),
            None => UpdateOutcome::NoUpdateAvailable,
        }
    }

    /// Best label for log lines about the target version.
    pub(crate) fn version_label(&self) -> &str {
        self.target_release()
            .map(|asset| asset.version.as_str())
            .or(self.available_version.as_deref())
            .unwrap_or("unknown")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome<'a> {
    NoUpdateAvailable,
    UpdateAvailable(PendingUpdate<'a>),
}

/// A check result that is known to carry update metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingUpdate<'a> {
    result: &'a UpdateCheckResult,
    info: &'a UpdateInfo,
}

impl<'a> PendingUpdate<'a> {
    pub fn result(&self) -> &'a UpdateCheckResult {
        self.result
    }

    pub fn info(&self) -> &'a UpdateInfo {
        self.info
    }

    pub fn target_release(&self) -> Option<&'a ReleaseAsset> {
        self.info.target_full_release.as_ref()
    }
}
