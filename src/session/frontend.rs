//! Front-end for pipe-transport sessions.
//!
//! Merges two input sources into the interactive program's stdin: lines a
//! human types, and lines injected through the session FIFO. Injected lines
//! can be echoed to the terminal so they read as if they had been typed.

use std::path::Path;
use std::process::ExitStatus;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader, Lines};
use tokio::net::unix::pipe;
use tokio::process::{Child, ChildStdin};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::transport::pipe::RETRY_INTERVAL;
use crate::{AppError, Result};

/// Why the front-end loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrontendExit {
    /// The interactive program exited on its own.
    ProgramExited(ExitStatus),
    /// The manager was asked to shut down.
    Cancelled,
}

/// Open `fifo` for reading.
///
/// On Linux the FIFO is opened read-write so the front-end itself counts as a
/// writer and reads never hit end-of-file between injections.
fn open_reader(fifo: &Path) -> Result<pipe::Receiver> {
    let mut options = pipe::OpenOptions::new();
    #[cfg(target_os = "linux")]
    options.read_write(true);
    options.open_receiver(fifo).map_err(|err| {
        AppError::Io(format!(
            "failed to open fifo {} for reading: {err}",
            fifo.display()
        ))
    })
}

async fn next_typed<R: AsyncRead + Unpin>(typed: &mut Option<Lines<BufReader<R>>>) -> Option<String> {
    match typed {
        Some(lines) => match lines.next_line().await {
            Ok(line) => line,
            Err(err) => {
                warn!(%err, "failed to read terminal input");
                None
            }
        },
        None => std::future::pending().await,
    }
}

async fn forward(stdin: &mut ChildStdin, line: &str) {
    let mut buf = Vec::with_capacity(line.len() + 1);
    buf.extend_from_slice(line.as_bytes());
    buf.push(b'\n');
    if let Err(err) = stdin.write_all(&buf).await {
        warn!(%err, "failed to forward line to session program");
    } else if let Err(err) = stdin.flush().await {
        warn!(%err, "failed to flush session program stdin");
    }
}

/// Run the front-end until the program exits or `cancel` fires.
///
/// `human` is the typed-input source (the manager's stdin in production);
/// `None` serves the FIFO only. End of human input stops reading it but keeps
/// the session alive for injected commands.
///
/// # Errors
///
/// Returns `AppError::Launch` if the program was not started with a piped
/// stdin, or `AppError::Io` if the FIFO cannot be read.
pub async fn run_frontend<R>(
    child: &mut Child,
    fifo: &Path,
    human: Option<R>,
    echo_injected: bool,
    cancel: &CancellationToken,
) -> Result<FrontendExit>
where
    R: AsyncRead + Unpin,
{
    let mut stdin = child
        .stdin
        .take()
        .ok_or_else(|| AppError::Launch("session program has no piped stdin".into()))?;
    let mut injected = BufReader::new(open_reader(fifo)?).lines();
    let mut typed = human.map(|reader| BufReader::new(reader).lines());

    info!(fifo = %fifo.display(), "session front-end ready");

    loop {
        tokio::select! {
            () = cancel.cancelled() => {
                info!("session front-end cancelled");
                return Ok(FrontendExit::Cancelled);
            }
            status = child.wait() => {
                let status = status
                    .map_err(|err| AppError::Io(format!("failed to wait for session program: {err}")))?;
                info!(%status, "session program exited");
                return Ok(FrontendExit::ProgramExited(status));
            }
            line = injected.next_line() => match line {
                Ok(Some(line)) => {
                    debug!(chars = line.chars().count(), "injected line received");
                    if echo_injected {
                        println!("{line}");
                    }
                    forward(&mut stdin, &line).await;
                }
                Ok(None) => {
                    // Every writer closed; only reachable where the FIFO
                    // cannot be held open read-write.
                    tokio::time::sleep(RETRY_INTERVAL).await;
                    injected = BufReader::new(open_reader(fifo)?).lines();
                }
                Err(err) => {
                    return Err(AppError::Io(format!("failed to read fifo {}: {err}", fifo.display())));
                }
            },
            line = next_typed(&mut typed) => match line {
                Some(line) => forward(&mut stdin, &line).await,
                None => {
                    debug!("terminal input closed; serving injected commands only");
                    typed = None;
                }
            },
        }
    }
}

/// Close the program's input and give it `grace` to exit before killing it.
pub async fn terminate_program(child: &mut Child, grace: Duration) {
    drop(child.stdin.take());

    match tokio::time::timeout(grace, child.wait()).await {
        Ok(Ok(status)) => info!(%status, "session program exited gracefully"),
        Ok(Err(err)) => warn!(%err, "error waiting for session program"),
        Err(_) => {
            warn!("session program did not exit within grace period, forcing kill");
            if let Err(err) = child.kill().await {
                warn!(%err, "failed to force-kill session program");
            }
        }
    }
}
