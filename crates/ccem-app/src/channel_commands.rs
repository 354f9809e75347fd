use anyhow::Result;
use ccem_update::{AppSettings, ChannelPolicy, SettingsStore};

use crate::cli::ChannelCommand;

fn render_channel_settings(prefix: &str, settings: &AppSettings) -> String {
    format!(
        "{}: channel={} last_installed={} overridden={} last_check_unix_ms={}",
        prefix,
        settings.channel.update_channel,
        settings.channel.last_installed_channel,
        settings.channel.is_update_channel_overridden,
        settings
            .last_update_check_unix_ms
            .map(|value| value.to_string())
            .unwrap_or_else(|| "never".to_string())
    )
}

pub(crate) fn execute_channel_command<S: SettingsStore>(
    policy: &ChannelPolicy<S>,
    command: &ChannelCommand,
) -> Result<String> {
    match command {
        ChannelCommand::Show => Ok(render_channel_settings(
            "update channel",
            &policy.settings()?,
        )),
        ChannelCommand::Set { channel } => {
            policy.select_channel(*channel)?;
            Ok(render_channel_settings(
                "update channel set",
                &policy.settings()?,
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use ccem_update::{MemorySettingsStore, UpdateChannel};

    use super::*;

    #[test]
    fn functional_show_reports_defaults_before_first_run() {
        let policy = ChannelPolicy::new(MemorySettingsStore::new());
        assert_eq!(
            execute_channel_command(&policy, &ChannelCommand::Show).expect("show"),
            "update channel: channel=stable last_installed=stable overridden=false last_check_unix_ms=never"
        );
        assert_eq!(policy.store().save_count(), 0);
    }

    #[test]
    fn functional_set_marks_override_against_installed_channel() {
        let policy = ChannelPolicy::new(MemorySettingsStore::new());
        policy.resolve(Some(UpdateChannel::Stable)).expect("resolve");
        let output = execute_channel_command(
            &policy,
            &ChannelCommand::Set {
                channel: UpdateChannel::Beta,
            },
        )
        .expect("set");
        assert_eq!(
            output,
            "update channel set: channel=beta last_installed=stable overridden=true last_check_unix_ms=never"
        );
    }
}
