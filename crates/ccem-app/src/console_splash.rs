use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use ccem_core::CooperativeCancellationToken;
use ccem_startup::{ShellHandoff, SplashHost};

/// Terminal stand-in for the splash window of the desktop host.
pub(crate) struct ConsoleSplashHost {
    out: Mutex<Box<dyn Write + Send>>,
    shown: AtomicBool,
    handoff: ShellHandoff,
}

impl ConsoleSplashHost {
    pub(crate) fn stderr() -> Self {
        Self::new(Box::new(std::io::stderr()))
    }

    pub(crate) fn new(out: Box<dyn Write + Send>) -> Self {
        Self {
            out: Mutex::new(out),
            shown: AtomicBool::new(false),
            handoff: ShellHandoff::new(),
        }
    }

    fn write_line(&self, line: &str) -> Result<()> {
        let mut out = self
            .out
            .lock()
            .map_err(|_| anyhow!("splash output lock poisoned"))?;
        writeln!(out, "{line}").context("failed to write splash output")?;
        out.flush().context("failed to flush splash output")
    }
}

#[async_trait]
impl SplashHost for ConsoleSplashHost {
    fn show_splash(&self) {
        if self.shown.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Err(error) = self.write_line("ccem: starting") {
            tracing::debug!(error = %error, "splash output unavailable");
        }
    }

    fn update_status(&self, message: &str) -> Result<()> {
        self.write_line(&format!("ccem: {message}"))
    }

    async fn enter_shell(&self, cancellation: &CooperativeCancellationToken) -> Result<()> {
        let entered = self
            .handoff
            .enter(cancellation, || async { self.write_line("ccem: ready") })
            .await?;
        if !entered {
            tracing::debug!("shell already entered");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[derive(Clone, Default)]
    struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

    impl SharedBuffer {
        fn contents(&self) -> String {
            String::from_utf8(self.0.lock().unwrap().clone()).expect("utf8")
        }
    }

    impl Write for SharedBuffer {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn functional_console_splash_shows_once_and_enters_shell_once() {
        let buffer = SharedBuffer::default();
        let host = ConsoleSplashHost::new(Box::new(buffer.clone()));
        let token = CooperativeCancellationToken::new();

        host.show_splash();
        host.show_splash();
        host.update_status("Resolving update channel").expect("status");
        host.enter_shell(&token).await.expect("enter");
        host.enter_shell(&token).await.expect("enter again");

        assert_eq!(
            buffer.contents(),
            "ccem: starting\nccem: Resolving update channel\nccem: ready\n"
        );
    }

    #[tokio::test]
    async fn regression_cancelled_shell_entry_writes_nothing() {
        let buffer = SharedBuffer::default();
        let host = ConsoleSplashHost::new(Box::new(buffer.clone()));
        let token = CooperativeCancellationToken::new();
        token.cancel();

        let error = host.enter_shell(&token).await.expect_err("cancelled");
        assert!(ccem_core::is_cancellation(&error));
        assert_eq!(buffer.contents(), "");
    }
}
