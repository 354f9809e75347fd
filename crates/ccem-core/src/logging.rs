//! Tracing bootstrap for CCEM hosts.
//!
//! Components never hold a logger of their own; they emit through `tracing`
//! and the host decides where events go by installing a subscriber here.

use std::io::Write;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Result};
use tracing::level_filters::LevelFilter;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

use crate::log_rotation::{append_log_record, LogRotationPolicy};

/// Host-selected logging sinks.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoggingOptions {
    pub verbose: bool,
    pub log_file: Option<PathBuf>,
    pub rotation: LogRotationPolicy,
}

/// Installs the global tracing subscriber.
///
/// Console output goes to stderr, compact and filtered by `RUST_LOG` (default
/// `info`, or `debug` when verbose). When `log_file` is set, the same events
/// are appended to that file through size-based rotation.
pub fn init_tracing(options: &LoggingOptions) -> Result<()> {
    let default_level = if options.verbose {
        LevelFilter::DEBUG
    } else {
        LevelFilter::INFO
    };
    let env_filter = EnvFilter::builder()
        .with_default_directive(default_level.into())
        .from_env_lossy();

    let console_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact();
    let file_layer = options.log_file.as_ref().map(|path| {
        tracing_subscriber::fmt::layer()
            .with_ansi(false)
            .with_writer(RotatingFileWriter::new(path.clone(), options.rotation))
    });

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .map_err(|error| anyhow!("failed to install tracing subscriber: {error}"))
}

/// `MakeWriter` that appends each formatted event to a size-rotated file.
#[derive(Debug, Clone)]
pub struct RotatingFileWriter {
    path: PathBuf,
    policy: LogRotationPolicy,
    lock: Arc<Mutex<()>>,
}

impl RotatingFileWriter {
    pub fn new(path: PathBuf, policy: LogRotationPolicy) -> Self {
        Self {
            path,
            policy,
            lock: Arc::new(Mutex::new(())),
        }
    }

    fn append(&self, record: &str) {
        let _guard = self
            .lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Err(error) = append_log_record(&self.path, record, self.policy) {
            eprintln!("ccem: failed to write log file: {error:#}");
        }
    }
}

impl<'a> MakeWriter<'a> for RotatingFileWriter {
    type Writer = RotatingRecordWriter<'a>;

    fn make_writer(&'a self) -> Self::Writer {
        RotatingRecordWriter {
            owner: self,
            buffer: Vec::new(),
        }
    }
}

/// Buffers one formatted event and appends it when dropped.
pub struct RotatingRecordWriter<'a> {
    owner: &'a RotatingFileWriter,
    buffer: Vec<u8>,
}

impl Write for RotatingRecordWriter<'_> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.buffer.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl Drop for RotatingRecordWriter<'_> {
    fn drop(&mut self) {
        let record = String::from_utf8_lossy(&self.buffer);
        let record = record.trim_end_matches(['\r', '\n']);
        if !record.is_empty() {
            self.owner.append(record);
        }
    }
}
