use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use ccem_core::{CooperativeCancellationToken, LogRotationPolicy, LoggingOptions};
use ccem_update::{
    settings::default_settings_path, GithubUpdateManagerFactory, InstallLocator,
    UpdateConfiguration, UpdateService,
};

use crate::cli::Cli;

pub(crate) fn logging_options(cli: &Cli) -> LoggingOptions {
    LoggingOptions {
        verbose: cli.verbose,
        log_file: cli.log_file.clone(),
        rotation: LogRotationPolicy::from_env(),
    }
}

pub(crate) fn resolve_settings_path(cli: &Cli) -> Result<PathBuf> {
    match cli.settings_path.as_ref() {
        Some(path) => Ok(path.clone()),
        None => default_settings_path(),
    }
}

/// Explicit install dir wins; otherwise the running executable is probed.
pub(crate) fn load_install_locator(cli: &Cli) -> Result<Option<InstallLocator>> {
    let locator = match cli.install_dir.as_deref() {
        Some(dir) => InstallLocator::load(dir)
            .with_context(|| format!("failed to load installation from {}", dir.display()))?,
        None => InstallLocator::detect()?,
    };
    match locator.as_ref() {
        Some(locator) => tracing::debug!(
            root = %locator.root_dir().display(),
            version = locator.current_version(),
            "detected managed installation"
        ),
        None => tracing::debug!("not running from a managed installation"),
    }
    Ok(locator)
}

pub(crate) fn update_configuration(cli: &Cli) -> Result<UpdateConfiguration> {
    let mut configuration = UpdateConfiguration::new(cli.repository.as_str())?
        .with_downgrade_policy(cli.downgrade_policy);
    if let Some(token) = cli.update_token.as_deref() {
        configuration = configuration.with_access_token(token);
    }
    if let Some(api_base) = cli.update_api_base.as_deref() {
        configuration = configuration.with_api_base_url(api_base);
    }
    Ok(configuration)
}

pub(crate) fn build_update_service(
    configuration: UpdateConfiguration,
    locator: Option<InstallLocator>,
) -> UpdateService {
    UpdateService::new(configuration, Arc::new(GithubUpdateManagerFactory::new(locator)))
}

/// Cancels `cancellation` on the first Ctrl-C.
pub(crate) fn spawn_ctrl_c_handler(cancellation: CooperativeCancellationToken) {
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                tracing::warn!("interrupt received; cancelling");
                cancellation.cancel();
            }
            Err(error) => tracing::debug!(error = %error, "ctrl-c handler unavailable"),
        }
    });
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::*;

    #[test]
    fn unit_update_configuration_carries_cli_overrides() {
        let cli = Cli::try_parse_from([
            "ccem",
            "--repository",
            "https://github.com/example/ccem-fork",
            "--update-token",
            "ghp_test",
            "--update-api-base",
            "http://127.0.0.1:9000",
            "--downgrade-policy",
            "never",
        ])
        .expect("parse");
        let configuration = update_configuration(&cli).expect("configuration");
        assert_eq!(configuration.repository_url(), "https://github.com/example/ccem-fork");
        assert_eq!(configuration.access_token(), Some("ghp_test"));
        assert_eq!(configuration.api_base_url(), Some("http://127.0.0.1:9000"));
        assert_eq!(
            configuration.downgrade_policy(),
            ccem_update::DowngradePolicy::Never
        );
    }

    #[test]
    fn regression_blank_repository_is_rejected() {
        let cli = Cli::try_parse_from(["ccem", "--repository", " "]).expect("parse");
        assert!(update_configuration(&cli).is_err());
    }

    #[test]
    fn functional_explicit_install_dir_without_manifest_is_not_installed() {
        let temp = tempfile::tempdir().expect("tempdir");
        let dir = temp.path().to_string_lossy().to_string();
        let cli = Cli::try_parse_from(["ccem", "--install-dir", dir.as_str()]).expect("parse");
        assert_eq!(load_install_locator(&cli).expect("locator"), None);
    }

    #[test]
    fn unit_logging_options_follow_cli_flags() {
        let cli = Cli::try_parse_from(["ccem", "--verbose", "--log-file", "/tmp/ccem.log"])
            .expect("parse");
        let options = logging_options(&cli);
        assert!(options.verbose);
        assert_eq!(options.log_file, Some(PathBuf::from("/tmp/ccem.log")));
    }
}
