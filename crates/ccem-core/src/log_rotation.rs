use std::io::Write;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::{Context, Result};

pub const LOG_ROTATION_MAX_BYTES_ENV: &str = "CCEM_LOG_ROTATION_MAX_BYTES";
pub const LOG_ROTATION_MAX_FILES_ENV: &str = "CCEM_LOG_ROTATION_MAX_FILES";

/// Size cap and retention for the host log file.
///
/// `max_files` counts the live file plus its numbered backups
/// (`CCEM.log`, `CCEM.log.1`, ...). A zero in either field disables rotation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogRotationPolicy {
    pub max_bytes: u64,
    pub max_files: usize,
}

impl Default for LogRotationPolicy {
    fn default() -> Self {
        Self {
            max_bytes: 10 * 1024 * 1024,
            max_files: 5,
        }
    }
}

impl LogRotationPolicy {
    /// Reads overrides from the environment; missing, zero or unparsable
    /// values keep the default.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            max_bytes: positive_env(LOG_ROTATION_MAX_BYTES_ENV).unwrap_or(defaults.max_bytes),
            max_files: positive_env(LOG_ROTATION_MAX_FILES_ENV).unwrap_or(defaults.max_files),
        }
    }

    pub fn is_enabled(self) -> bool {
        self.max_bytes > 0 && self.max_files > 0
    }

    fn overflows(self, current_len: u64, record_len: usize) -> bool {
        let incoming = u64::try_from(record_len)
            .unwrap_or(u64::MAX)
            .saturating_add(1);
        self.is_enabled() && current_len.saturating_add(incoming) > self.max_bytes
    }
}

fn positive_env<T>(key: &str) -> Option<T>
where
    T: FromStr + PartialOrd + Default,
{
    std::env::var(key)
        .ok()
        .and_then(|raw| raw.trim().parse::<T>().ok())
        .filter(|value| *value > T::default())
}

/// Appends `record` as one line, first rotating the file when the record
/// would push it past `policy.max_bytes`.
pub fn append_log_record(path: &Path, record: &str, policy: LogRotationPolicy) -> Result<()> {
    if let Some(parent) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create log directory {}", parent.display()))?;
    }

    let current_len = match std::fs::metadata(path) {
        Ok(metadata) => metadata.len(),
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => 0,
        Err(error) => {
            return Err(error).with_context(|| format!("failed to stat {}", path.display()))
        }
    };
    if current_len > 0 && policy.overflows(current_len, record.len()) {
        shift_backups(path, policy.max_files)?;
    }

    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("failed to open log file {}", path.display()))?;
    writeln!(file, "{record}")
        .and_then(|()| file.flush())
        .with_context(|| format!("failed to append to {}", path.display()))
}

pub(crate) fn backup_path(path: &Path, index: usize) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(format!(".{index}"));
    PathBuf::from(name)
}

/// `log.(n-1)` -> `log.n`, ..., `log` -> `log.1`; the oldest backup is dropped.
fn shift_backups(path: &Path, max_files: usize) -> Result<()> {
    let oldest = max_files.saturating_sub(1);
    if oldest == 0 {
        return std::fs::remove_file(path)
            .with_context(|| format!("failed to truncate {}", path.display()));
    }

    let discarded = backup_path(path, oldest);
    if discarded.exists() {
        std::fs::remove_file(&discarded)
            .with_context(|| format!("failed to drop old log {}", discarded.display()))?;
    }
    for index in (1..oldest).rev() {
        let source = backup_path(path, index);
        if source.exists() {
            let destination = backup_path(path, index + 1);
            std::fs::rename(&source, &destination).with_context(|| {
                format!("failed to rotate {} to {}", source.display(), destination.display())
            })?;
        }
    }
    let first = backup_path(path, 1);
    std::fs::rename(path, &first)
        .with_context(|| format!("failed to rotate {} to {}", path.display(), first.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn read(path: &Path) -> String {
        std::fs::read_to_string(path).unwrap_or_default()
    }

    #[test]
    fn functional_overflowing_record_moves_log_to_first_backup() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("Logs/CCEM.log");
        let policy = LogRotationPolicy {
            max_bytes: 40,
            max_files: 3,
        };

        append_log_record(&path, "INFO checking for updates on stable", policy)
            .expect("append first");
        append_log_record(&path, "INFO update check completed", policy).expect("append second");

        let first_backup = backup_path(&path, 1);
        assert!(read(&first_backup).contains("checking for updates"));
        assert_eq!(read(&path), "INFO update check completed\n");
    }

    #[test]
    fn functional_rotation_keeps_only_configured_backups() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("CCEM.log");
        let policy = LogRotationPolicy {
            max_bytes: 12,
            max_files: 3,
        };

        for seq in 1..=6 {
            append_log_record(&path, &format!("line-{seq}"), policy).expect("append");
        }

        assert_eq!(read(&path), "line-6\n");
        assert_eq!(read(&backup_path(&path, 1)), "line-5\n");
        assert_eq!(read(&backup_path(&path, 2)), "line-4\n");
        assert!(!backup_path(&path, 3).exists());
    }

    #[test]
    fn unit_single_file_policy_truncates_instead_of_keeping_backups() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("CCEM.log");
        let policy = LogRotationPolicy {
            max_bytes: 8,
            max_files: 1,
        };
        append_log_record(&path, "first", policy).expect("append");
        append_log_record(&path, "second", policy).expect("append");
        assert_eq!(read(&path), "second\n");
        assert!(!backup_path(&path, 1).exists());
    }

    #[test]
    fn regression_rotation_policy_from_env_ignores_invalid_values() {
        std::env::set_var(LOG_ROTATION_MAX_BYTES_ENV, "4096");
        std::env::set_var(LOG_ROTATION_MAX_FILES_ENV, "7");
        let parsed = LogRotationPolicy::from_env();
        assert_eq!(parsed.max_bytes, 4096);
        assert_eq!(parsed.max_files, 7);

        std::env::set_var(LOG_ROTATION_MAX_BYTES_ENV, "not-a-number");
        std::env::set_var(LOG_ROTATION_MAX_FILES_ENV, "0");
        assert_eq!(LogRotationPolicy::from_env(), LogRotationPolicy::default());

        std::env::remove_var(LOG_ROTATION_MAX_BYTES_ENV);
        std::env::remove_var(LOG_ROTATION_MAX_FILES_ENV);
    }
}
