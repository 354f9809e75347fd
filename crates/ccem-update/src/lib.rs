//! Update-channel resolution and self-update orchestration for CCEM.
//!
//! Defines the channel model, the update-manager seam with its GitHub release
//! implementation, the update service driving check/download/apply, and the
//! persisted channel resolution policy consulted at process start.

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};

pub mod channel_policy;
pub mod config;
pub mod error;
pub mod github;
pub mod locator;
pub mod manager;
pub mod result;
pub mod service;
pub mod settings;

pub use channel_policy::{resolve_channel, ChannelPolicy, ChannelResolution, ChannelResolutionSource};
pub use config::{derive_manager_options, DowngradePolicy, ManagerOptions, UpdateConfiguration};
pub use error::UpdateError;
pub use github::{GithubUpdateManager, GithubUpdateManagerFactory};
pub use locator::InstallLocator;
pub use manager::{ReleaseAsset, UpdateInfo, UpdateManager, UpdateManagerFactory};
pub use result::{PendingUpdate, UpdateCheckResult, UpdateOutcome};
pub use service::UpdateService;
pub use settings::{
    AppSettings, ChannelResolutionState, JsonSettingsStore, MemorySettingsStore, SettingsStore,
};

pub const DEFAULT_REPOSITORY_URL: &str = "https://github.com/mchave3/CCEM";
pub const GITHUB_API_BASE_URL: &str = "https://api.github.com";
pub const UPDATE_USER_AGENT: &str = "ccem/update-service";
pub const UPDATE_LOOKUP_TIMEOUT_MS: u64 = 15_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
/// Release stream the application follows.
pub enum UpdateChannel {
    #[default]
    Stable,
    /// Pre-release tier. Older installers called this stream `nightly`.
    #[serde(alias = "nightly")]
    Beta,
}

impl UpdateChannel {
    pub fn as_str(self) -> &'static str {
        match self {
            UpdateChannel::Stable => "stable",
            UpdateChannel::Beta => "beta",
        }
    }

    /// True for channels whose feed includes pre-release builds.
    pub fn is_prerelease(self) -> bool {
        matches!(self, UpdateChannel::Beta)
    }

    pub(crate) fn to_u8(self) -> u8 {
        match self {
            UpdateChannel::Stable => 0,
            UpdateChannel::Beta => 1,
        }
    }

    pub(crate) fn from_u8(value: u8) -> Self {
        match value {
            1 => UpdateChannel::Beta,
            _ => UpdateChannel::Stable,
        }
    }
}

impl std::fmt::Display for UpdateChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for UpdateChannel {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "stable" => Ok(Self::Stable),
            "beta" | "nightly" => Ok(Self::Beta),
            _ => bail!("invalid update channel '{}'; expected stable|beta", value),
        }
    }
}

/// Parses a release tag or version string, tolerating a `v` prefix and
/// missing minor/patch components (`v2.1` reads as `2.1.0`).
pub fn parse_release_version(raw: &str) -> Option<semver::Version> {
    let trimmed = raw.trim().trim_start_matches(['v', 'V']);
    if trimmed.is_empty() {
        return None;
    }
    if let Ok(version) = semver::Version::parse(trimmed) {
        return Some(version);
    }

    let (core, suffix) = match trimmed.split_once(['-', '+']) {
        Some((core, _)) => (core, &trimmed[core.len()..]),
        None => (trimmed, ""),
    };
    let mut segments = core.split('.').collect::<Vec<_>>();
    if segments.is_empty() || segments.len() > 3 {
        return None;
    }
    while segments.len() < 3 {
        segments.push("0");
    }
    semver::Version::parse(&format!("{}{}", segments.join("."), suffix)).ok()
}

/// Orders two release versions; `None` when either side is unparsable.
pub fn compare_versions(current: &str, latest: &str) -> Option<std::cmp::Ordering> {
    let current = parse_release_version(current)?;
    let latest = parse_release_version(latest)?;
    Some(current.cmp(&latest))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cmp::Ordering;

    #[test]
    fn unit_update_channel_parses_names_and_legacy_alias() {
        assert_eq!("stable".parse::<UpdateChannel>().unwrap(), UpdateChannel::Stable);
        assert_eq!("Beta".parse::<UpdateChannel>().unwrap(), UpdateChannel::Beta);
        assert_eq!("nightly".parse::<UpdateChannel>().unwrap(), UpdateChannel::Beta);
        let error = "dev".parse::<UpdateChannel>().expect_err("unknown channel");
        assert!(error.to_string().contains("expected stable|beta"));
        assert!(UpdateChannel::Beta.is_prerelease());
        assert!(!UpdateChannel::Stable.is_prerelease());
    }

    #[test]
    fn unit_update_channel_serde_accepts_legacy_alias() {
        let parsed: UpdateChannel = serde_json::from_str("\"nightly\"").expect("parse");
        assert_eq!(parsed, UpdateChannel::Beta);
        assert_eq!(
            serde_json::to_string(&UpdateChannel::Beta).expect("encode"),
            "\"beta\""
        );
    }

    #[test]
    fn unit_compare_versions_handles_prefix_prerelease_and_invalid_input() {
        assert_eq!(compare_versions("1.0.0", "1.0.1"), Some(Ordering::Less));
        assert_eq!(compare_versions("v1.2", "1.2.0"), Some(Ordering::Equal));
        assert_eq!(
            compare_versions("1.3.0-beta.1", "1.3.0-beta.2"),
            Some(Ordering::Less)
        );
        assert_eq!(compare_versions("1.3.0-beta.2", "1.3.0"), Some(Ordering::Less));
        assert_eq!(compare_versions("2.0.0", "1.9.9"), Some(Ordering::Greater));
        assert_eq!(compare_versions("abc", "1.0.0"), None);
    }
}
