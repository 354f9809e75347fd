use std::path::PathBuf;

use ccem_update::{DowngradePolicy, UpdateChannel, DEFAULT_REPOSITORY_URL};
use clap::{Args, Parser, Subcommand};

#[derive(Debug, Clone, Parser)]
#[command(
    name = "ccem",
    about = "CCEM startup and self-update host",
    version
)]
pub(crate) struct Cli {
    #[arg(
        long,
        env = "CCEM_UPDATE_REPOSITORY",
        default_value = DEFAULT_REPOSITORY_URL,
        help = "GitHub repository publishing CCEM releases"
    )]
    pub(crate) repository: String,

    #[arg(
        long = "update-token",
        env = "CCEM_UPDATE_TOKEN",
        hide_env_values = true,
        help = "Optional GitHub token for release lookups"
    )]
    pub(crate) update_token: Option<String>,

    #[arg(
        long = "update-api-base",
        env = "CCEM_UPDATE_API_BASE",
        help = "Override for the GitHub API base URL (enterprise mirrors)"
    )]
    pub(crate) update_api_base: Option<String>,

    #[arg(
        long = "downgrade-policy",
        env = "CCEM_DOWNGRADE_POLICY",
        default_value_t = DowngradePolicy::StableOnly,
        help = "Which channels may move to an older release: always|stable-only|never"
    )]
    pub(crate) downgrade_policy: DowngradePolicy,

    #[arg(
        long = "settings-path",
        env = "CCEM_SETTINGS_PATH",
        help = "Settings file (defaults to <data dir>/CCEM/AppConfig.json)"
    )]
    pub(crate) settings_path: Option<PathBuf>,

    #[arg(
        long = "install-dir",
        env = "CCEM_INSTALL_DIR",
        help = "Installation root containing ccem-install.json"
    )]
    pub(crate) install_dir: Option<PathBuf>,

    #[arg(
        long = "log-file",
        env = "CCEM_LOG_FILE",
        help = "Also append logs to this file with size-based rotation"
    )]
    pub(crate) log_file: Option<PathBuf>,

    #[arg(long, short, global = true, help = "Enable debug logging")]
    pub(crate) verbose: bool,

    #[command(subcommand)]
    pub(crate) command: Option<CliCommand>,
}

#[derive(Debug, Clone, PartialEq, Eq, Subcommand)]
pub(crate) enum CliCommand {
    /// Full headless startup: resolve channel, enter shell, check for updates.
    Run,
    /// Check the active channel for an update and print a report.
    Check,
    /// Download the available update and apply it.
    Update(UpdateArgs),
    /// Inspect or change the update channel.
    Channel {
        #[command(subcommand)]
        command: ChannelCommand,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Args)]
pub(crate) struct UpdateArgs {
    #[arg(long, help = "Apply after this process exits instead of restarting now")]
    pub(crate) defer: bool,
    #[arg(long, help = "Ask the updater to run without UI")]
    pub(crate) silent: bool,
    #[arg(long = "no-restart", help = "Do not relaunch CCEM after applying")]
    pub(crate) no_restart: bool,
    #[arg(last = true, help = "Arguments passed to the relaunched application")]
    pub(crate) restart_args: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Subcommand)]
pub(crate) enum ChannelCommand {
    Show,
    Set { channel: UpdateChannel },
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::*;

    #[test]
    fn unit_cli_defaults_to_run_with_stable_only_policy() {
        let cli = Cli::try_parse_from(["ccem"]).expect("parse");
        assert_eq!(cli.command, None);
        assert_eq!(cli.downgrade_policy, DowngradePolicy::StableOnly);
        assert!(!cli.verbose);
    }

    #[test]
    fn unit_cli_parses_update_flags_and_trailing_args() {
        let cli = Cli::try_parse_from([
            "ccem", "update", "--defer", "--silent", "--", "--open", "collections",
        ])
        .expect("parse");
        assert_eq!(
            cli.command,
            Some(CliCommand::Update(UpdateArgs {
                defer: true,
                silent: true,
                no_restart: false,
                restart_args: vec!["--open".to_string(), "collections".to_string()],
            }))
        );
    }

    #[test]
    fn unit_cli_parses_channel_names_including_legacy_alias() {
        let cli = Cli::try_parse_from(["ccem", "channel", "set", "nightly"]).expect("parse");
        assert_eq!(
            cli.command,
            Some(CliCommand::Channel {
                command: ChannelCommand::Set {
                    channel: UpdateChannel::Beta
                }
            })
        );
        assert!(Cli::try_parse_from(["ccem", "channel", "set", "dev"]).is_err());
        assert!(Cli::try_parse_from(["ccem", "--downgrade-policy", "sometimes"]).is_err());
    }
}
