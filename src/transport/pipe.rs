//! Named-pipe transport.
//!
//! The session front-end holds the FIFO open for reading and forwards each
//! line to the interactive program. Writers open the FIFO non-blocking: with
//! no reader attached the open fails with `ENXIO`, which is retried until the
//! injection bound expires instead of stalling forever on a dead session.

use std::fs;
use std::future::Future;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::time::Duration;

use nix::errno::Errno;
use nix::sys::stat::Mode;
use tokio::io::AsyncWriteExt;
use tokio::net::unix::pipe;
use tokio::time::Instant;
use tracing::debug;

use super::CommandInjector;
use crate::{AppError, Result};

/// Pause between attempts to open a FIFO that has no reader yet.
pub const RETRY_INTERVAL: Duration = Duration::from_millis(50);

/// Create a FIFO at `path` readable and writable only by this user,
/// replacing any leftover file.
///
/// # Errors
///
/// Returns `AppError::Io` if the old file cannot be removed or `mkfifo` fails.
pub fn create_fifo(path: &Path) -> Result<()> {
    remove_fifo(path)?;
    nix::unistd::mkfifo(path, Mode::S_IRUSR | Mode::S_IWUSR).map_err(|err| {
        AppError::Io(format!("failed to create fifo {}: {err}", path.display()))
    })?;
    debug!(path = %path.display(), "fifo created");
    Ok(())
}

/// Remove the FIFO at `path`. Returns `Ok(false)` if it did not exist.
///
/// # Errors
///
/// Returns `AppError::Io` if the file exists but cannot be removed.
pub fn remove_fifo(path: &Path) -> Result<bool> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(false),
        Err(err) => Err(AppError::Io(format!(
            "failed to remove fifo {}: {err}",
            path.display()
        ))),
    }
}

/// Writes injected commands into a session's FIFO.
#[derive(Debug, Clone)]
pub struct PipeInjector {
    path: PathBuf,
    timeout: Duration,
    retry_interval: Duration,
}

impl PipeInjector {
    /// Target the FIFO at `path`, giving up after `timeout`.
    #[must_use]
    pub fn new(path: PathBuf, timeout: Duration) -> Self {
        Self {
            path,
            timeout,
            retry_interval: RETRY_INTERVAL,
        }
    }

    async fn open(&self, deadline: Instant) -> Result<pipe::Sender> {
        loop {
            match pipe::OpenOptions::new().open_sender(&self.path) {
                Ok(sender) => return Ok(sender),
                Err(err) if err.raw_os_error() == Some(Errno::ENXIO as i32) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Err(AppError::InjectionTimeout(format!(
                            "no reader attached to {} within {:?}",
                            self.path.display(),
                            self.timeout
                        )));
                    }
                    tokio::time::sleep(self.retry_interval.min(deadline - now)).await;
                }
                Err(err) if err.kind() == ErrorKind::NotFound => {
                    return Err(AppError::InjectionTargetMissing(format!(
                        "fifo {} does not exist",
                        self.path.display()
                    )));
                }
                Err(err) => {
                    return Err(AppError::Io(format!(
                        "failed to open fifo {}: {err}",
                        self.path.display()
                    )));
                }
            }
        }
    }

    async fn deliver(&self, text: &str) -> Result<()> {
        let deadline = Instant::now() + self.timeout;
        let mut sender = self.open(deadline).await?;

        let mut line = text.trim_end_matches(['\r', '\n']).to_owned();
        line.push('\n');

        match tokio::time::timeout_at(deadline, sender.write_all(line.as_bytes())).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) if err.kind() == ErrorKind::BrokenPipe => {
                Err(AppError::InjectionTargetMissing(format!(
                    "reader of {} went away",
                    self.path.display()
                )))
            }
            Ok(Err(err)) => Err(AppError::Io(format!(
                "failed to write to fifo {}: {err}",
                self.path.display()
            ))),
            Err(_elapsed) => Err(AppError::InjectionTimeout(format!(
                "write to {} did not complete within {:?}",
                self.path.display(),
                self.timeout
            ))),
        }
    }
}

impl CommandInjector for PipeInjector {
    fn inject<'a>(
        &'a self,
        text: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(self.deliver(text))
    }
}
