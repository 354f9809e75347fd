//! Foundational utilities shared across CCEM crates.
//!
//! Provides atomic settings writes, time helpers, the cooperative cancellation
//! token threaded through update and startup work, and the tracing bootstrap
//! with its size-rotated file sink.

pub mod atomic_io;
pub mod cancellation;
pub mod log_rotation;
pub mod logging;
pub mod time_utils;

pub use atomic_io::write_text_atomic;
pub use cancellation::{is_cancellation, CooperativeCancellationToken, OperationCancelled};
pub use log_rotation::{append_log_record, LogRotationPolicy};
pub use logging::{init_tracing, LoggingOptions, RotatingFileWriter};
pub use time_utils::current_unix_timestamp_ms;

#[cfg(test)]
mod tests {
    use std::fs::read_to_string;

    use super::*;

    #[test]
    fn functional_write_text_atomic_replaces_existing_settings() {
        let tempdir = tempfile::tempdir().expect("tempdir");
        let path = tempdir.path().join("nested/AppConfig.json");
        write_text_atomic(&path, "{\"a\":1}\n").expect("first write");
        write_text_atomic(&path, "{\"a\":2}\n").expect("second write");
        let contents = read_to_string(&path).expect("read");
        assert_eq!(contents, "{\"a\":2}\n");
        let leftovers = std::fs::read_dir(path.parent().expect("parent"))
            .expect("read dir")
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_name().to_string_lossy().contains(".tmp-"))
            .count();
        assert_eq!(leftovers, 0);
    }

    #[test]
    fn regression_write_text_atomic_rejects_directory_destination() {
        let tempdir = tempfile::tempdir().expect("tempdir");
        let error = write_text_atomic(tempdir.path(), "x").expect_err("directory must fail");
        assert!(error.to_string().contains("is a directory"));
    }
}
