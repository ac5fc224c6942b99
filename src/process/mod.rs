//! OS process helpers: liveness probes, signal delivery, process-table scans.

pub mod table;

use nix::errno::Errno;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;

use crate::models::process::Liveness;
use crate::{AppError, Result};

fn to_pid(pid: u32) -> Option<Pid> {
    i32::try_from(pid).ok().filter(|raw| *raw > 0).map(Pid::from_raw)
}

/// Probe `pid` with signal 0.
///
/// `EPERM` means the process exists under another user and counts as alive.
/// On Linux a zombie (exited, not yet reaped by its parent) counts as exited.
#[must_use]
pub fn probe_pid(pid: u32) -> Liveness {
    let Some(target) = to_pid(pid) else {
        return Liveness::Exited;
    };

    match kill(target, None) {
        Ok(()) | Err(Errno::EPERM) => {
            if is_zombie(pid) {
                Liveness::Exited
            } else {
                Liveness::Alive
            }
        }
        Err(Errno::ESRCH) => Liveness::Exited,
        Err(err) => {
            tracing::warn!(pid, %err, "liveness probe failed");
            Liveness::Unknown
        }
    }
}

/// Whether `pid` currently exists.
#[must_use]
pub fn is_alive(pid: u32) -> bool {
    probe_pid(pid) == Liveness::Alive
}

/// Deliver `signal` to `pid`.
///
/// Returns `Ok(false)` if the process no longer exists.
///
/// # Errors
///
/// Returns `AppError::Signal` for any other delivery failure.
pub fn send_signal(pid: u32, signal: Signal) -> Result<bool> {
    let Some(target) = to_pid(pid) else {
        return Err(AppError::Signal(format!("invalid pid {pid}")));
    };

    match kill(target, signal) {
        Ok(()) => Ok(true),
        Err(Errno::ESRCH) => Ok(false),
        Err(err) => Err(AppError::Signal(format!(
            "failed to send {signal} to {pid}: {err}"
        ))),
    }
}

#[cfg(target_os = "linux")]
fn is_zombie(pid: u32) -> bool {
    // Field 3 of /proc/<pid>/stat, after the parenthesised command name.
    std::fs::read_to_string(format!("/proc/{pid}/stat"))
        .ok()
        .and_then(|stat| {
            stat.rsplit_once(')')
                .and_then(|(_, rest)| rest.split_whitespace().next().map(|s| s == "Z"))
        })
        .unwrap_or(false)
}

#[cfg(not(target_os = "linux"))]
fn is_zombie(_pid: u32) -> bool {
    false
}
