//! Persisted application settings consulted by the channel resolution policy.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};

use anyhow::{anyhow, Context, Result};
use ccem_core::{current_unix_timestamp_ms, write_text_atomic};
use serde::{Deserialize, Serialize};

use crate::UpdateChannel;

pub const APP_SETTINGS_SCHEMA_VERSION: u32 = 1;
pub const APP_SETTINGS_FILE_NAME: &str = "AppConfig.json";
pub const SETTINGS_PATH_ENV: &str = "CCEM_SETTINGS_PATH";

/// Channel bookkeeping carried across runs.
///
/// Channels are kept as raw strings so a hand-edited or legacy value can be
/// told apart from a missing one.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChannelResolutionState {
    pub update_channel: String,
    #[serde(default = "default_last_installed_channel")]
    pub last_installed_channel: String,
    #[serde(default)]
    pub is_update_channel_overridden: bool,
}

impl ChannelResolutionState {
    pub fn new(channel: UpdateChannel, last_installed: UpdateChannel, overridden: bool) -> Self {
        Self {
            update_channel: channel.as_str().to_string(),
            last_installed_channel: last_installed.as_str().to_string(),
            is_update_channel_overridden: overridden,
        }
    }

    /// Persisted channel, `None` when the stored value is not a known channel.
    pub fn update_channel(&self) -> Option<UpdateChannel> {
        self.update_channel.parse().ok()
    }

    pub fn last_installed_channel(&self) -> Option<UpdateChannel> {
        self.last_installed_channel.parse().ok()
    }
}

fn default_last_installed_channel() -> String {
    UpdateChannel::default().as_str().to_string()
}

impl Default for ChannelResolutionState {
    fn default() -> Self {
        Self::new(UpdateChannel::default(), UpdateChannel::default(), false)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AppSettings {
    pub schema_version: u32,
    #[serde(flatten)]
    pub channel: ChannelResolutionState,
    #[serde(default)]
    pub last_update_check_unix_ms: Option<u64>,
    #[serde(default)]
    pub use_developer_mode: bool,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            schema_version: APP_SETTINGS_SCHEMA_VERSION,
            channel: ChannelResolutionState::default(),
            last_update_check_unix_ms: None,
            use_developer_mode: false,
        }
    }
}

/// Single-writer settings persistence.
pub trait SettingsStore: Send + Sync {
    /// `None` when nothing has been persisted yet.
    fn load(&self) -> Result<Option<AppSettings>>;

    fn save(&self, settings: &AppSettings) -> Result<()>;
}

/// `<data dir>/CCEM/AppConfig.json`, honoring `CCEM_SETTINGS_PATH`.
pub fn default_settings_path() -> Result<PathBuf> {
    if let Some(path) = std::env::var_os(SETTINGS_PATH_ENV).filter(|value| !value.is_empty()) {
        return Ok(PathBuf::from(path));
    }
    let data_dir = ["LOCALAPPDATA", "XDG_DATA_HOME"]
        .iter()
        .find_map(|key| std::env::var_os(key).filter(|value| !value.is_empty()))
        .map(PathBuf::from)
        .or_else(|| {
            std::env::var_os("HOME")
                .filter(|value| !value.is_empty())
                .map(|home| PathBuf::from(home).join(".local").join("share"))
        });
    let base = match data_dir {
        Some(dir) => dir,
        None => std::env::current_dir().context("failed to resolve current working directory")?,
    };
    Ok(base.join("CCEM").join(APP_SETTINGS_FILE_NAME))
}

/// JSON file store. Unreadable content is moved aside and treated as absent.
#[derive(Debug, Clone)]
pub struct JsonSettingsStore {
    path: PathBuf,
}

impl JsonSettingsStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn quarantine(&self, reason: &str) -> Result<()> {
        let mut target = self.path.as_os_str().to_os_string();
        target.push(format!(".corrupt-{}", current_unix_timestamp_ms()));
        let target = PathBuf::from(target);
        std::fs::rename(&self.path, &target).with_context(|| {
            format!(
                "failed to move unreadable settings {} to {}",
                self.path.display(),
                target.display()
            )
        })?;
        tracing::warn!(
            path = %self.path.display(),
            quarantined = %target.display(),
            reason,
            "settings file unreadable; using defaults"
        );
        Ok(())
    }
}

impl SettingsStore for JsonSettingsStore {
    fn load(&self) -> Result<Option<AppSettings>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let raw = std::fs::read_to_string(&self.path)
            .with_context(|| format!("failed to read settings {}", self.path.display()))?;
        let value = match serde_json::from_str::<serde_json::Value>(&raw) {
            Ok(value) => value,
            Err(error) => {
                self.quarantine(&error.to_string())?;
                return Ok(None);
            }
        };
        match value.get("schema_version").and_then(serde_json::Value::as_u64) {
            Some(version) if version == APP_SETTINGS_SCHEMA_VERSION as u64 => {}
            Some(version) => {
                self.quarantine(&format!(
                    "unsupported schema_version {} (expected {})",
                    version, APP_SETTINGS_SCHEMA_VERSION
                ))?;
                return Ok(None);
            }
            None => {
                self.quarantine("missing schema_version")?;
                return Ok(None);
            }
        }
        match serde_json::from_value::<AppSettings>(value) {
            Ok(settings) => Ok(Some(settings)),
            Err(error) => {
                self.quarantine(&error.to_string())?;
                Ok(None)
            }
        }
    }

    fn save(&self, settings: &AppSettings) -> Result<()> {
        let mut encoded =
            serde_json::to_string_pretty(settings).context("failed to encode settings")?;
        encoded.push('\n');
        let parent = self.path.parent().ok_or_else(|| {
            anyhow!(
                "settings path {} does not have a parent directory",
                self.path.display()
            )
        })?;
        std::fs::create_dir_all(parent).with_context(|| {
            format!("failed to create settings directory {}", parent.display())
        })?;
        write_text_atomic(&self.path, &encoded)
    }
}

/// In-process store that counts writes.
#[derive(Debug, Default)]
pub struct MemorySettingsStore {
    settings: Mutex<Option<AppSettings>>,
    saves: AtomicUsize,
}

impl MemorySettingsStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_settings(settings: AppSettings) -> Self {
        Self {
            settings: Mutex::new(Some(settings)),
            saves: AtomicUsize::new(0),
        }
    }

    pub fn snapshot(&self) -> Option<AppSettings> {
        self.settings
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }
}

impl SettingsStore for MemorySettingsStore {
    fn load(&self) -> Result<Option<AppSettings>> {
        Ok(self.snapshot())
    }

    fn save(&self, settings: &AppSettings) -> Result<()> {
        *self.settings.lock().unwrap_or_else(PoisonError::into_inner) = Some(settings.clone());
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
