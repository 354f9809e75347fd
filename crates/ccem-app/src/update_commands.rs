use std::sync::atomic::{AtomicU8, Ordering};

use anyhow::{bail, Result};
use ccem_core::{current_unix_timestamp_ms, CooperativeCancellationToken};
use ccem_update::{
    ChannelPolicy, SettingsStore, UpdateCheckResult, UpdateOutcome, UpdateService,
};

use crate::cli::UpdateArgs;

/// `update check: channel=.. current=.. available=.. status=..` line.
pub(crate) fn render_check_report(result: &UpdateCheckResult) -> String {
    let status = match result.outcome() {
        UpdateOutcome::NoUpdateAvailable => "up_to_date",
        UpdateOutcome::UpdateAvailable(_) if result.is_downgrade() => "downgrade_available",
        UpdateOutcome::UpdateAvailable(_) => "update_available",
    };
    format!(
        "update check: channel={} current={} available={} status={}",
        result.channel(),
        result.current_version().unwrap_or("unknown"),
        result.available_version().unwrap_or("none"),
        status
    )
}

/// Forwards download progress to `report` once per ten-percent step.
pub(crate) fn throttled_progress<R>(report: R) -> impl Fn(u8) + Send + Sync
where
    R: Fn(u8) + Send + Sync,
{
    let last_reported = AtomicU8::new(0);
    move |percent: u8| {
        let bucket = percent.min(100) / 10 * 10;
        if bucket > 0 && last_reported.fetch_max(bucket, Ordering::SeqCst) < bucket {
            report(percent);
        }
    }
}

pub(crate) async fn execute_check<S: SettingsStore>(
    service: &UpdateService,
    policy: &ChannelPolicy<S>,
    cancellation: &CooperativeCancellationToken,
) -> Result<String> {
    let result = service.check_for_updates(cancellation).await?;
    policy.record_update_check(current_unix_timestamp_ms())?;
    Ok(render_check_report(&result))
}

/// Checks, downloads, then either restarts into the update or defers it to
/// process exit.
pub(crate) async fn execute_update<S: SettingsStore>(
    service: &UpdateService,
    policy: &ChannelPolicy<S>,
    args: &UpdateArgs,
    cancellation: &CooperativeCancellationToken,
) -> Result<String> {
    let result = service.check_for_updates(cancellation).await?;
    policy.record_update_check(current_unix_timestamp_ms())?;
    let UpdateOutcome::UpdateAvailable(pending) = result.outcome() else {
        return Ok(format!("update: channel={} status=up_to_date", result.channel()));
    };
    let Some(target) = pending.target_release() else {
        bail!(
            "update on channel {} has no downloadable package",
            result.channel()
        );
    };
    let version = target.version.clone();

    let progress = throttled_progress(|percent| tracing::info!(percent, "downloading update"));
    service
        .download_pending(pending, &progress, cancellation)
        .await?;

    if args.defer || args.no_restart {
        service
            .wait_exit_then_apply_updates(
                Some(&result),
                args.silent,
                !args.no_restart,
                &args.restart_args,
                cancellation,
            )
            .await?;
        return Ok(format!(
            "update: channel={} version={} status=deferred restart={}",
            result.channel(), version, !args.no_restart
        ));
    }

    service.apply_updates_and_restart(Some(&result), &args.restart_args)?;
    Ok(format!(
        "update: channel={} version={} status=applying",
        result.channel(), version
    ))
}
