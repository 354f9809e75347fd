mod bootstrap_helpers;
mod channel_commands;
mod cli;
mod console_splash;
mod startup_wiring;
#[cfg(test)]
mod test_support;
mod update_commands;

use std::sync::Arc;

use anyhow::Result;
use ccem_core::{init_tracing, is_cancellation, CooperativeCancellationToken};
use ccem_startup::BackgroundStatus;
use ccem_update::{ChannelPolicy, JsonSettingsStore};
use clap::Parser;

use crate::bootstrap_helpers::{
    build_update_service, load_install_locator, logging_options, resolve_settings_path,
    spawn_ctrl_c_handler, update_configuration,
};
use crate::channel_commands::execute_channel_command;
use crate::cli::{Cli, CliCommand};
use crate::console_splash::ConsoleSplashHost;
use crate::startup_wiring::run_startup;
use crate::update_commands::{execute_check, execute_update};

const CANCELLED_EXIT_CODE: i32 = 130;

async fn run_cli(cli: Cli, cancellation: CooperativeCancellationToken) -> Result<()> {
    let settings_path = resolve_settings_path(&cli)?;
    let policy = Arc::new(ChannelPolicy::new(JsonSettingsStore::new(settings_path)));
    let command = cli.command.clone().unwrap_or(CliCommand::Run);
    let locator = load_install_locator(&cli)?;
    let packaged = locator.as_ref().and_then(|locator| locator.packaged_channel());
    let service = Arc::new(build_update_service(update_configuration(&cli)?, locator));

    match command {
        CliCommand::Run => {
            let outcomes = run_startup(
                Arc::new(ConsoleSplashHost::stderr()),
                service,
                policy,
                packaged,
                cancellation,
            )
            .await?;
            for outcome in outcomes {
                if let BackgroundStatus::Failed(error) = &outcome.status {
                    tracing::warn!(step = %outcome.name, error = %error, "background step did not complete");
                }
            }
        }
        CliCommand::Check => {
            service.set_channel(policy.resolve(packaged)?.channel);
            println!("{}", execute_check(&service, &policy, &cancellation).await?);
        }
        CliCommand::Update(args) => {
            service.set_channel(policy.resolve(packaged)?.channel);
            println!(
                "{}",
                execute_update(&service, &policy, &args, &cancellation).await?
            );
        }
        CliCommand::Channel { command } => {
            println!("{}", execute_channel_command(&policy, &command)?);
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(&logging_options(&cli))?;
    let cancellation = CooperativeCancellationToken::new();
    spawn_ctrl_c_handler(cancellation.clone());

    match run_cli(cli, cancellation).await {
        Err(error) if is_cancellation(&error) => {
            tracing::warn!("cancelled");
            std::process::exit(CANCELLED_EXIT_CODE);
        }
        outcome => outcome,
    }
}
