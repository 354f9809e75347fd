//! Start-of-process reconciliation of the packaged, last-installed and
//! user-selected update channels.

use anyhow::Result;
use tracing::{debug, info};

use crate::{AppSettings, ChannelResolutionState, SettingsStore, UpdateChannel};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelResolutionSource {
    /// Nothing usable was persisted; packaged channel or the default applies.
    FirstRun,
    /// The installer delivered a different channel and the user had not
    /// overridden theirs.
    PackagedChannelAdopted,
    /// The persisted channel stands.
    Persisted,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelResolution {
    pub channel: UpdateChannel,
    /// State to persist for the next run.
    pub state: ChannelResolutionState,
    pub source: ChannelResolutionSource,
    /// True when `state` differs from what was persisted.
    pub changed: bool,
}

/// Decides the active channel from persisted state and the packaged channel.
///
/// An unparsable persisted channel counts as no persisted state.
pub fn resolve_channel(
    persisted: Option<&ChannelResolutionState>,
    packaged: Option<UpdateChannel>,
) -> ChannelResolution {
    let Some((state, persisted_channel)) =
        persisted.and_then(|state| state.update_channel().map(|channel| (state, channel)))
    else {
        let channel = packaged.unwrap_or_default();
        return ChannelResolution {
            channel,
            state: ChannelResolutionState::new(channel, channel, false),
            source: ChannelResolutionSource::FirstRun,
            changed: true,
        };
    };

    let mut next = state.clone();
    let mut channel = persisted_channel;
    let mut source = ChannelResolutionSource::Persisted;
    if let Some(packaged) = packaged {
        if state.last_installed_channel() != Some(packaged) {
            if !state.is_update_channel_overridden {
                channel = packaged;
                source = ChannelResolutionSource::PackagedChannelAdopted;
            }
            next.last_installed_channel = packaged.as_str().to_string();
        }
    }
    // Also normalizes legacy spellings such as `nightly`.
    next.update_channel = channel.as_str().to_string();

    let changed = &next != state;
    ChannelResolution {
        channel,
        state: next,
        source,
        changed,
    }
}

/// [`resolve_channel`] bound to a settings store.
pub struct ChannelPolicy<S> {
    store: S,
}

impl<S: SettingsStore> ChannelPolicy<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Current settings, or defaults when nothing is persisted.
    pub fn settings(&self) -> Result<AppSettings> {
        Ok(self.store.load()?.unwrap_or_default())
    }

    /// Resolves the channel for this run and persists the outcome when it changed.
    pub fn resolve(&self, packaged: Option<UpdateChannel>) -> Result<ChannelResolution> {
        let existing = self.store.load()?;
        let resolution = resolve_channel(existing.as_ref().map(|settings| &settings.channel), packaged);
        if resolution.changed {
            let mut settings = existing.unwrap_or_default();
            settings.channel = resolution.state.clone();
            self.store.save(&settings)?;
        }
        info!(
            channel = %resolution.channel,
            source = ?resolution.source,
            packaged = ?packaged,
            persisted = resolution.changed,
            "resolved update channel"
        );
        Ok(resolution)
    }

    /// Records an explicit user choice. It counts as an override only when it
    /// departs from the channel the installer delivered.
    pub fn select_channel(&self, channel: UpdateChannel) -> Result<ChannelResolutionState> {
        let mut settings = self.settings()?;
        let last_installed = settings.channel.last_installed_channel();
        settings.channel.update_channel = channel.as_str().to_string();
        settings.channel.is_update_channel_overridden = last_installed != Some(channel);
        self.store.save(&settings)?;
        info!(
            %channel,
            overridden = settings.channel.is_update_channel_overridden,
            "selected update channel"
        );
        Ok(settings.channel)
    }

    pub fn record_update_check(&self, unix_ms: u64) -> Result<()> {
        let mut settings = self.settings()?;
        settings.last_update_check_unix_ms = Some(unix_ms);
        self.store.save(&settings)?;
        debug!(unix_ms, "recorded update check");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{JsonSettingsStore, MemorySettingsStore};

    fn state(channel: &str, last_installed: &str, overridden: bool) -> ChannelResolutionState {
        ChannelResolutionState {
            update_channel: channel.to_string(),
            last_installed_channel: last_installed.to_string(),
            is_update_channel_overridden: overridden,
        }
    }

    #[test]
    fn unit_first_run_adopts_packaged_channel() {
        let resolution = resolve_channel(None, Some(UpdateChannel::Beta));
        assert_eq!(resolution.channel, UpdateChannel::Beta);
        assert_eq!(resolution.source, ChannelResolutionSource::FirstRun);
        assert_eq!(resolution.state, state("beta", "beta", false));
        assert!(resolution.changed);
    }

    #[test]
    fn unit_first_run_without_packaged_channel_defaults_to_stable() {
        let resolution = resolve_channel(None, None);
        assert_eq!(resolution.channel, UpdateChannel::Stable);
        assert_eq!(resolution.state, state("stable", "stable", false));
    }

    #[test]
    fn unit_override_wins_over_new_packaged_channel() {
        let persisted = state("stable", "stable", true);
        let resolution = resolve_channel(Some(&persisted), Some(UpdateChannel::Beta));
        assert_eq!(resolution.channel, UpdateChannel::Stable);
        assert_eq!(resolution.source, ChannelResolutionSource::Persisted);
        assert_eq!(resolution.state, state("stable", "beta", true));
        assert!(resolution.changed);
    }

    #[test]
    fn unit_packaged_channel_drift_is_adopted_without_override() {
        let persisted = state("stable", "stable", false);
        let resolution = resolve_channel(Some(&persisted), Some(UpdateChannel::Beta));
        assert_eq!(resolution.channel, UpdateChannel::Beta);
        assert_eq!(resolution.source, ChannelResolutionSource::PackagedChannelAdopted);
        assert_eq!(resolution.state, state("beta", "beta", false));
    }

    #[test]
    fn unit_missing_packaged_channel_keeps_persisted_choice() {
        let persisted = state("beta", "stable", false);
        let resolution = resolve_channel(Some(&persisted), None);
        assert_eq!(resolution.channel, UpdateChannel::Beta);
        assert_eq!(resolution.source, ChannelResolutionSource::Persisted);
        assert!(!resolution.changed);
    }

    #[test]
    fn unit_unchanged_packaged_channel_keeps_user_choice() {
        let persisted = state("beta", "stable", false);
        let resolution = resolve_channel(Some(&persisted), Some(UpdateChannel::Stable));
        assert_eq!(resolution.channel, UpdateChannel::Beta);
        assert!(!resolution.changed);
    }

    #[test]
    fn regression_invalid_persisted_channel_is_treated_as_first_run() {
        let persisted = state("dev", "stable", true);
        let resolution = resolve_channel(Some(&persisted), Some(UpdateChannel::Beta));
        assert_eq!(resolution.source, ChannelResolutionSource::FirstRun);
        assert_eq!(resolution.state, state("beta", "beta", false));
    }

    #[test]
    fn regression_legacy_channel_name_is_normalized() {
        let persisted = state("nightly", "beta", false);
        let resolution = resolve_channel(Some(&persisted), Some(UpdateChannel::Beta));
        assert_eq!(resolution.channel, UpdateChannel::Beta);
        assert_eq!(resolution.state.update_channel, "beta");
        assert!(resolution.changed);
    }

    #[test]
    fn functional_policy_persists_only_when_resolution_changes() {
        let policy = ChannelPolicy::new(MemorySettingsStore::new());
        policy.resolve(Some(UpdateChannel::Beta)).expect("first run");
        assert_eq!(policy.store().save_count(), 1);

        let again = policy.resolve(Some(UpdateChannel::Beta)).expect("second run");
        assert_eq!(again.channel, UpdateChannel::Beta);
        assert!(!again.changed);
        assert_eq!(policy.store().save_count(), 1);
    }

    #[test]
    fn functional_select_channel_sets_override_against_installed_channel() {
        let policy = ChannelPolicy::new(MemorySettingsStore::new());
        policy.resolve(Some(UpdateChannel::Stable)).expect("first run");

        let chosen = policy.select_channel(UpdateChannel::Beta).expect("select beta");
        assert!(chosen.is_update_channel_overridden);
        let next = policy.resolve(Some(UpdateChannel::Stable)).expect("next run");
        assert_eq!(next.channel, UpdateChannel::Beta);

        let back = policy.select_channel(UpdateChannel::Stable).expect("select stable");
        assert!(!back.is_update_channel_overridden);
    }

    #[test]
    fn integration_policy_preserves_other_settings_on_json_store() {
        let temp = tempfile::tempdir().expect("tempdir");
        let policy = ChannelPolicy::new(JsonSettingsStore::new(temp.path().join("AppConfig.json")));
        policy.resolve(None).expect("first run");
        policy.record_update_check(42).expect("record check");

        let resolution = policy.resolve(Some(UpdateChannel::Beta)).expect("drift");
        assert_eq!(resolution.channel, UpdateChannel::Beta);
        let settings = policy.settings().expect("settings");
        assert_eq!(settings.last_update_check_unix_ms, Some(42));
        assert_eq!(settings.channel, state("beta", "beta", false));
    }

    #[test]
    fn regression_settings_without_last_installed_keep_persisted_beta() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("AppConfig.json");
        std::fs::write(&path, r#"{"schema_version":1,"update_channel":"beta"}"#).expect("write");
        let policy = ChannelPolicy::new(JsonSettingsStore::new(&path));

        let resolution = policy.resolve(Some(UpdateChannel::Stable)).expect("resolve");
        assert_eq!(resolution.channel, UpdateChannel::Beta);
        assert_eq!(resolution.source, ChannelResolutionSource::Persisted);

        let chosen = policy.select_channel(UpdateChannel::Stable).expect("select stable");
        assert!(!chosen.is_update_channel_overridden);
    }
}
