//! GitHub-releases backed update manager.
//!
//! Each GitHub release may carry a `releases.<channel>.json` feed asset listing
//! the packages built for that channel. The newest release carrying the feed of
//! the requested channel wins; its highest version is the update target.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use ccem_core::{CooperativeCancellationToken, OperationCancelled};
use futures_util::StreamExt;
use reqwest::header::{ACCEPT, AUTHORIZATION, USER_AGENT};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::{
    compare_versions, derive_manager_options, parse_release_version, InstallLocator,
    ManagerOptions, ReleaseAsset, UpdateChannel, UpdateConfiguration, UpdateInfo, UpdateManager,
    UpdateManagerFactory, GITHUB_API_BASE_URL, UPDATE_LOOKUP_TIMEOUT_MS, UPDATE_USER_AGENT,
};

const GITHUB_API_ACCEPT: &str = "application/vnd.github+json";
const RELEASES_PER_PAGE: u32 = 30;
const FULL_PACKAGE_KIND: &str = "Full";
const HASH_CHUNK_BYTES: usize = 64 * 1024;

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
struct GitHubReleaseRecord {
    tag_name: String,
    #[serde(default)]
    prerelease: bool,
    #[serde(default)]
    draft: bool,
    #[serde(default)]
    assets: Vec<GitHubReleaseAssetRecord>,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
struct GitHubReleaseAssetRecord {
    name: String,
    browser_download_url: String,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
struct ChannelFeedFile {
    #[serde(default)]
    assets: Vec<ChannelFeedAsset>,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
struct ChannelFeedAsset {
    package_id: String,
    version: String,
    #[serde(rename = "Type", default)]
    kind: String,
    file_name: String,
    #[serde(rename = "SHA256")]
    sha256: String,
    #[serde(default)]
    size: u64,
    #[serde(default)]
    notes_markdown: Option<String>,
    #[serde(rename = "NotesHTML", default)]
    notes_html: Option<String>,
}

/// Builds [`GithubUpdateManager`]s sharing one installation locator.
#[derive(Debug, Clone, Default)]
pub struct GithubUpdateManagerFactory {
    locator: Option<InstallLocator>,
}

impl GithubUpdateManagerFactory {
    pub fn new(locator: Option<InstallLocator>) -> Self {
        Self { locator }
    }
}

impl UpdateManagerFactory for GithubUpdateManagerFactory {
    fn create(
        &self,
        configuration: &UpdateConfiguration,
        channel: UpdateChannel,
    ) -> Result<Arc<dyn UpdateManager>> {
        let options = derive_manager_options(configuration, channel);
        Ok(Arc::new(GithubUpdateManager::new(
            configuration,
            options,
            self.locator.clone(),
        )?))
    }
}

pub struct GithubUpdateManager {
    options: ManagerOptions,
    releases_url: String,
    access_token: Option<String>,
    locator: Option<InstallLocator>,
    client: reqwest::Client,
}

impl GithubUpdateManager {
    pub fn new(
        configuration: &UpdateConfiguration,
        options: ManagerOptions,
        locator: Option<InstallLocator>,
    ) -> Result<Self> {
        let releases_url = releases_api_url(
            configuration.repository_url(),
            configuration.api_base_url().unwrap_or(GITHUB_API_BASE_URL),
        )?;
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_millis(UPDATE_LOOKUP_TIMEOUT_MS))
            .build()
            .context("failed to construct HTTP client for update feed")?;
        Ok(Self {
            options,
            releases_url,
            access_token: configuration.access_token().map(str::to_string),
            locator,
            client,
        })
    }

    pub fn options(&self) -> &ManagerOptions {
        &self.options
    }

    fn require_locator(&self) -> Result<&InstallLocator> {
        self.locator
            .as_ref()
            .ok_or_else(|| anyhow!("the application is not installed; updates are unavailable"))
    }

    fn request(&self, url: &str) -> reqwest::RequestBuilder {
        let builder = self
            .client
            .get(url)
            .header(USER_AGENT, UPDATE_USER_AGENT);
        match self.access_token.as_deref() {
            Some(token) => builder.header(AUTHORIZATION, format!("Bearer {token}")),
            None => builder,
        }
    }

    async fn fetch_release_records(&self) -> Result<Vec<GitHubReleaseRecord>> {
        let response = self
            .request(&self.releases_url)
            .header(ACCEPT, GITHUB_API_ACCEPT)
            .timeout(Duration::from_millis(UPDATE_LOOKUP_TIMEOUT_MS))
            .send()
            .await
            .with_context(|| format!("failed to fetch releases from '{}'", self.releases_url))?;
        if !response.status().is_success() {
            bail!(
                "release lookup request to '{}' returned status {}",
                self.releases_url,
                response.status()
            );
        }
        response
            .json::<Vec<GitHubReleaseRecord>>()
            .await
            .with_context(|| {
                format!(
                    "failed to parse release lookup response from '{}'",
                    self.releases_url
                )
            })
    }

    async fn fetch_channel_feed(&self, url: &str) -> Result<ChannelFeedFile> {
        let response = self
            .request(url)
            .header(ACCEPT, "application/octet-stream")
            .timeout(Duration::from_millis(UPDATE_LOOKUP_TIMEOUT_MS))
            .send()
            .await
            .with_context(|| format!("failed to fetch channel feed from '{url}'"))?;
        if !response.status().is_success() {
            bail!(
                "channel feed request to '{}' returned status {}",
                url,
                response.status()
            );
        }
        let raw = response
            .bytes()
            .await
            .with_context(|| format!("failed to read channel feed from '{url}'"))?;
        serde_json::from_slice::<ChannelFeedFile>(&raw)
            .with_context(|| format!("failed to parse channel feed from '{url}'"))
    }

    async fn stream_package(
        &self,
        url: &str,
        partial_path: &Path,
        target: &ReleaseAsset,
        progress: &(dyn Fn(u8) + Send + Sync),
        cancellation: &CooperativeCancellationToken,
    ) -> Result<()> {
        cancellation.check()?;
        let response = self
            .request(url)
            .header(ACCEPT, "application/octet-stream")
            .send()
            .await
            .with_context(|| format!("failed to download package from '{url}'"))?;
        if !response.status().is_success() {
            bail!(
                "package download from '{}' returned status {}",
                url,
                response.status()
            );
        }

        let total = response
            .content_length()
            .filter(|length| *length > 0)
            .unwrap_or(target.size);
        let mut file = tokio::fs::File::create(partial_path)
            .await
            .with_context(|| format!("failed to create {}", partial_path.display()))?;
        let mut hasher = Sha256::new();
        let mut downloaded = 0u64;
        let mut last_percent = 0u8;
        let mut stream = response.bytes_stream();

        loop {
            let next = tokio::select! {
                biased;
                _ = cancellation.cancelled() => return Err(OperationCancelled.into()),
                next = stream.next() => next,
            };
            let Some(chunk) = next else {
                break;
            };
            let chunk = chunk.with_context(|| format!("failed to read package from '{url}'"))?;
            hasher.update(&chunk);
            file.write_all(&chunk)
                .await
                .with_context(|| format!("failed to write {}", partial_path.display()))?;
            downloaded = downloaded.saturating_add(chunk.len() as u64);
            if total > 0 {
                // 100 is reserved for the moment the verified package is in place.
                let percent = (downloaded.saturating_mul(100) / total).min(99) as u8;
                if percent > last_percent {
                    last_percent = percent;
                    progress(percent);
                }
            }
        }
        file.flush()
            .await
            .with_context(|| format!("failed to flush {}", partial_path.display()))?;
        drop(file);

        let actual = format!("{:x}", hasher.finalize());
        let expected = normalize_sha256(&target.sha256);
        if actual != expected {
            bail!(
                "checksum mismatch for {}: expected '{}', got '{}'",
                target.file_name,
                expected,
                actual
            );
        }
        Ok(())
    }

    fn updater_command(&self, release: &ReleaseAsset) -> Result<std::process::Command> {
        let locator = self.require_locator()?;
        let package_path = locator.packages_dir().join(&release.file_name);
        if !package_path.is_file() {
            bail!(
                "package {} has not been downloaded to {}",
                release.file_name,
                locator.packages_dir().display()
            );
        }
        let mut command = std::process::Command::new(locator.updater_path());
        command
            .arg("apply")
            .arg("--package")
            .arg(&package_path)
            .current_dir(locator.root_dir());
        Ok(command)
    }
}

#[async_trait]
impl UpdateManager for GithubUpdateManager {
    fn is_installed(&self) -> bool {
        self.locator.is_some()
    }

    fn current_version(&self) -> Option<String> {
        self.locator
            .as_ref()
            .map(|locator| locator.current_version().to_string())
    }

    async fn check_for_updates(&self) -> Result<Option<UpdateInfo>> {
        let locator = self.require_locator()?;
        let releases = self.fetch_release_records().await?;
        let feed_name = channel_feed_asset_name(&self.options.explicit_channel);

        let Some((release, feed_asset)) = releases
            .iter()
            .filter(|release| !release.draft)
            .filter(|release| self.options.include_prerelease || !release.prerelease)
            .find_map(|release| {
                release
                    .assets
                    .iter()
                    .find(|asset| asset.name == feed_name)
                    .map(|asset| (release, asset))
            })
        else {
            tracing::debug!(feed = %feed_name, "no release carries the channel feed");
            return Ok(None);
        };
        tracing::debug!(tag = %release.tag_name, feed = %feed_name, "resolved channel feed");

        let feed = self.fetch_channel_feed(&feed_asset.browser_download_url).await?;
        let Some((latest_version, full_asset)) = select_latest_release(&feed.assets) else {
            return Ok(None);
        };
        let target = full_asset.map(|asset| ReleaseAsset {
            package_id: asset.package_id.clone(),
            version: asset.version.clone(),
            file_name: asset.file_name.clone(),
            sha256: asset.sha256.clone(),
            size: asset.size,
            notes_markdown: asset.notes_markdown.clone(),
            notes_html: asset.notes_html.clone(),
            download_url: release
                .assets
                .iter()
                .find(|candidate| candidate.name == asset.file_name)
                .map(|candidate| candidate.browser_download_url.clone()),
        });

        decide_update(
            locator.current_version(),
            &latest_version,
            target,
            self.options.allow_downgrade,
        )
    }

    async fn download_updates(
        &self,
        update: &UpdateInfo,
        progress: &(dyn Fn(u8) + Send + Sync),
        cancellation: &CooperativeCancellationToken,
    ) -> Result<()> {
        let locator = self.require_locator()?;
        let target = update
            .target_full_release
            .as_ref()
            .ok_or_else(|| anyhow!("update metadata does not contain a full release package"))?;
        let url = target
            .download_url
            .as_deref()
            .ok_or_else(|| anyhow!("package {} has no download url", target.file_name))?;

        let packages_dir = locator.packages_dir();
        tokio::fs::create_dir_all(packages_dir)
            .await
            .with_context(|| format!("failed to create {}", packages_dir.display()))?;
        let final_path = packages_dir.join(&target.file_name);
        if final_path.is_file() && file_sha256(&final_path).await? == normalize_sha256(&target.sha256)
        {
            tracing::debug!(package = %final_path.display(), "reusing verified package");
            progress(100);
            return Ok(());
        }

        let partial_path = partial_package_path(&final_path);
        let streamed = self
            .stream_package(url, &partial_path, target, progress, cancellation)
            .await;
        if streamed.is_err() {
            let _ = tokio::fs::remove_file(&partial_path).await;
        }
        streamed?;

        tokio::fs::rename(&partial_path, &final_path)
            .await
            .with_context(|| {
                format!(
                    "failed to move {} to {}",
                    partial_path.display(),
                    final_path.display()
                )
            })?;
        progress(100);
        Ok(())
    }

    fn apply_updates_and_restart(
        &self,
        release: &ReleaseAsset,
        restart_args: &[String],
    ) -> Result<()> {
        let mut command = self.updater_command(release)?;
        command.arg("--restart");
        if !restart_args.is_empty() {
            command.arg("--").args(restart_args);
        }
        command
            .spawn()
            .with_context(|| format!("failed to launch updater for {}", release.file_name))?;
        tracing::info!(version = %release.version, "updater launched; exiting for restart");
        std::process::exit(0);
    }

    async fn wait_exit_then_apply_updates(
        &self,
        release: &ReleaseAsset,
        silent: bool,
        restart: bool,
        restart_args: &[String],
    ) -> Result<()> {
        let mut command = self.updater_command(release)?;
        command
            .arg("--wait-pid")
            .arg(std::process::id().to_string());
        if silent {
            command.arg("--silent");
        }
        if restart {
            command.arg("--restart");
            if !restart_args.is_empty() {
                command.arg("--").args(restart_args);
            }
        }
        command
            .spawn()
            .with_context(|| format!("failed to launch updater for {}", release.file_name))?;
        Ok(())
    }
}

/// `https://github.com/<owner>/<repo>` -> `<api>/repos/<owner>/<repo>/releases?per_page=30`.
pub(crate) fn releases_api_url(repository_url: &str, api_base_url: &str) -> Result<String> {
    let parsed = reqwest::Url::parse(repository_url)
        .with_context(|| format!("invalid repository url '{repository_url}'"))?;
    let segments = parsed
        .path_segments()
        .map(|segments| segments.filter(|segment| !segment.is_empty()).collect::<Vec<_>>())
        .unwrap_or_default();
    let [owner, repo, ..] = segments.as_slice() else {
        bail!("repository url '{repository_url}' must name an owner and a repository");
    };
    let repo = repo.trim_end_matches(".git");
    Ok(format!(
        "{}/repos/{}/{}/releases?per_page={}",
        api_base_url.trim_end_matches('/'),
        owner,
        repo,
        RELEASES_PER_PAGE
    ))
}

pub(crate) fn channel_feed_asset_name(channel: &str) -> String {
    format!("releases.{channel}.json")
}

/// Highest version listed by the feed and its full package, if one exists.
fn select_latest_release(assets: &[ChannelFeedAsset]) -> Option<(String, Option<&ChannelFeedAsset>)> {
    let latest = assets
        .iter()
        .filter_map(|asset| parse_release_version(&asset.version).map(|version| (version, asset)))
        .max_by(|left, right| left.0.cmp(&right.0))?;
    let full = assets.iter().find(|asset| {
        asset.kind.eq_ignore_ascii_case(FULL_PACKAGE_KIND)
            && parse_release_version(&asset.version).as_ref() == Some(&latest.0)
    });
    Some((latest.1.version.clone(), full))
}

/// Newer target -> update; older target -> downgrade when allowed; else none.
pub(crate) fn decide_update(
    current_version: &str,
    latest_version: &str,
    target: Option<ReleaseAsset>,
    allow_downgrade: bool,
) -> Result<Option<UpdateInfo>> {
    let ordering = compare_versions(current_version, latest_version).ok_or_else(|| {
        anyhow!(
            "cannot compare installed version '{}' with feed version '{}'",
            current_version,
            latest_version
        )
    })?;
    let info = match ordering {
        std::cmp::Ordering::Less => Some(UpdateInfo {
            target_full_release: target,
            is_downgrade: false,
        }),
        std::cmp::Ordering::Greater if allow_downgrade => Some(UpdateInfo {
            target_full_release: target,
            is_downgrade: true,
        }),
        _ => None,
    };
    Ok(info)
}

fn normalize_sha256(value: &str) -> String {
    let trimmed = value.trim();
    let without_prefix = match trimmed.get(..7) {
        Some(prefix) if prefix.eq_ignore_ascii_case("sha256:") => &trimmed[7..],
        _ => trimmed,
    };
    without_prefix.to_ascii_lowercase()
}

fn partial_package_path(final_path: &Path) -> PathBuf {
    let mut name = final_path.as_os_str().to_os_string();
    name.push(".partial");
    PathBuf::from(name)
}

async fn file_sha256(path: &Path) -> Result<String> {
    let mut file = tokio::fs::File::open(path)
        .await
        .with_context(|| format!("failed to open {}", path.display()))?;
    let mut hasher = Sha256::new();
    let mut buffer = vec![0_u8; HASH_CHUNK_BYTES];
    loop {
        let read = file
            .read(&mut buffer)
            .await
            .with_context(|| format!("failed to read {}", path.display()))?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}
