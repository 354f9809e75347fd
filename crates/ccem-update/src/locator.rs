use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

use crate::UpdateChannel;

pub const INSTALL_MANIFEST_FILE_NAME: &str = "ccem-install.json";
pub const INSTALL_MANIFEST_SCHEMA_VERSION: u32 = 1;
pub const INSTALL_DIR_ENV: &str = "CCEM_INSTALL_DIR";

#[cfg(windows)]
const DEFAULT_UPDATER_FILE_NAME: &str = "Update.exe";
#[cfg(not(windows))]
const DEFAULT_UPDATER_FILE_NAME: &str = "update";

/// Manifest the installer drops in the install root.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
struct InstallManifestFile {
    schema_version: u32,
    version: String,
    #[serde(default)]
    channel: Option<String>,
    #[serde(default)]
    updater: Option<String>,
    #[serde(default)]
    packages_dir: Option<String>,
}

/// Describes the managed installation this process runs from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallLocator {
    root_dir: PathBuf,
    current_version: String,
    packaged_channel: Option<UpdateChannel>,
    updater_path: PathBuf,
    packages_dir: PathBuf,
}

impl InstallLocator {
    /// Reads the install manifest under `root_dir`; `Ok(None)` when absent.
    pub fn load(root_dir: &Path) -> Result<Option<Self>> {
        let manifest_path = root_dir.join(INSTALL_MANIFEST_FILE_NAME);
        if !manifest_path.is_file() {
            return Ok(None);
        }
        let raw = std::fs::read_to_string(&manifest_path).with_context(|| {
            format!("failed to read install manifest {}", manifest_path.display())
        })?;
        let manifest = serde_json::from_str::<InstallManifestFile>(&raw).with_context(|| {
            format!(
                "failed to parse install manifest {}",
                manifest_path.display()
            )
        })?;
        if manifest.schema_version != INSTALL_MANIFEST_SCHEMA_VERSION {
            bail!(
                "unsupported install manifest schema_version {} in {} (expected {})",
                manifest.schema_version,
                manifest_path.display(),
                INSTALL_MANIFEST_SCHEMA_VERSION
            );
        }
        if manifest.version.trim().is_empty() {
            bail!(
                "install manifest {} does not declare a version",
                manifest_path.display()
            );
        }

        let packaged_channel = match manifest.channel.as_deref() {
            Some(raw) => match raw.parse::<UpdateChannel>() {
                Ok(channel) => Some(channel),
                Err(error) => {
                    tracing::warn!(
                        manifest = %manifest_path.display(),
                        "ignoring packaged channel: {error}"
                    );
                    None
                }
            },
            None => None,
        };
        let updater_path = root_dir.join(
            manifest
                .updater
                .as_deref()
                .unwrap_or(DEFAULT_UPDATER_FILE_NAME),
        );
        let packages_dir = root_dir.join(manifest.packages_dir.as_deref().unwrap_or("packages"));

        Ok(Some(Self {
            root_dir: root_dir.to_path_buf(),
            current_version: manifest.version.trim().to_string(),
            packaged_channel,
            updater_path,
            packages_dir,
        }))
    }

    /// Finds the installation from `CCEM_INSTALL_DIR` or the executable path.
    ///
    /// The executable may live in the install root or one level below it
    /// (`<root>/current/ccem`). `Ok(None)` means portable or dev execution.
    pub fn detect() -> Result<Option<Self>> {
        if let Some(dir) = std::env::var_os(INSTALL_DIR_ENV).filter(|value| !value.is_empty()) {
            return Self::load(Path::new(&dir));
        }
        let exe = std::env::current_exe().context("failed to resolve current executable")?;
        let mut candidate = exe.parent();
        for _ in 0..2 {
            let Some(dir) = candidate else {
                break;
            };
            if let Some(locator) = Self::load(dir)? {
                return Ok(Some(locator));
            }
            candidate = dir.parent();
        }
        Ok(None)
    }

    pub fn root_dir(&self) -> &Path {
        &self.root_dir
    }

    pub fn current_version(&self) -> &str {
        &self.current_version
    }

    /// Channel the installer was built for, when it recorded one.
    pub fn packaged_channel(&self) -> Option<UpdateChannel> {
        self.packaged_channel
    }

    pub fn updater_path(&self) -> &Path {
        &self.updater_path
    }

    pub fn packages_dir(&self) -> &Path {
        &self.packages_dir
    }
}
