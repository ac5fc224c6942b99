//! Lifecycle controller: graceful-then-forced shutdown of tracked daemons.
//!
//! A daemon is located through its PID file when one exists, otherwise by
//! scanning the process table for its command-line pattern. Each located
//! process receives `SIGTERM`, is polled until the grace window expires, and
//! is then sent `SIGKILL`. Stopping a daemon that is already gone is a
//! successful no-op.

pub mod pid_file;

use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

use nix::sys::signal::Signal;
use regex::Regex;
use tokio::time::Instant;
use tracing::{info, info_span, warn, Instrument};

use crate::process::{is_alive, send_signal, table};
use crate::{AppError, Result};

/// Bound on waiting for a process to vanish after `SIGKILL`.
const KILL_SETTLE: Duration = Duration::from_secs(2);

/// Poll interval while waiting for a killed process to vanish.
const KILL_POLL: Duration = Duration::from_millis(20);

/// Grace window and poll interval for a stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StopPolicy {
    /// Time allowed for a graceful exit before `SIGKILL`.
    pub grace: Duration,
    /// Liveness poll interval during the grace window.
    pub poll: Duration,
}

impl Default for StopPolicy {
    fn default() -> Self {
        Self {
            grace: Duration::from_secs(10),
            poll: Duration::from_secs(1),
        }
    }
}

/// How a daemon can be found.
#[derive(Debug, Clone)]
pub struct DaemonTarget {
    /// Name used in reports.
    pub name: String,
    /// PID file written when the daemon was started.
    pub pid_file: Option<PathBuf>,
    /// Command-line pattern used when there is no PID file.
    pub pattern: Option<Regex>,
    /// Client processes tied to the daemon, swept on the fallback path.
    pub auxiliary: Vec<Regex>,
}

impl DaemonTarget {
    /// Target with no PID file or patterns.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            pid_file: None,
            pattern: None,
            auxiliary: Vec::new(),
        }
    }

    /// Locate the daemon through `path`.
    #[must_use]
    pub fn with_pid_file(mut self, path: PathBuf) -> Self {
        self.pid_file = Some(path);
        self
    }

    /// Fall back to matching `pattern` against the process table.
    #[must_use]
    pub fn with_pattern(mut self, pattern: Regex) -> Self {
        self.pattern = Some(pattern);
        self
    }

    /// Also sweep processes matching `pattern` on the fallback path.
    #[must_use]
    pub fn with_auxiliary(mut self, pattern: Regex) -> Self {
        self.auxiliary.push(pattern);
        self
    }
}

/// What happened to one process during a stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopAction {
    /// The process was already gone; no signal was sent.
    AlreadyGone,
    /// The process exited within the grace window.
    Terminated,
    /// The grace window expired and the process was killed.
    Killed,
}

/// One process handled by a stop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoppedProcess {
    /// Process identifier.
    pub pid: u32,
    /// Outcome.
    pub action: StopAction,
}

/// Result of stopping a daemon.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StopReport {
    /// Daemon name.
    pub name: String,
    /// Every process that was located, in handling order.
    pub processes: Vec<StoppedProcess>,
    /// Whether a PID file was removed.
    pub pid_file_removed: bool,
}

impl StopReport {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_owned(),
            processes: Vec::new(),
            pid_file_removed: false,
        }
    }

    /// Whether any signal was sent.
    #[must_use]
    pub fn signalled(&self) -> bool {
        self.processes
            .iter()
            .any(|p| p.action != StopAction::AlreadyGone)
    }
}

/// Knowledge about a daemon's main process during a stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DaemonState {
    /// No usable PID file.
    Unknown,
    /// PID read, not yet probed.
    Probed(u32),
    /// Probe found the process.
    Alive(u32),
    /// Probe found nothing.
    Dead(u32),
}

impl DaemonState {
    fn from_pid_file(target: &DaemonTarget) -> Self {
        let Some(path) = target.pid_file.as_deref() else {
            return Self::Unknown;
        };
        match pid_file::read_pid_file(path) {
            Ok(Some(pid)) => Self::Probed(pid),
            Ok(None) => Self::Unknown,
            Err(err) => {
                warn!(daemon = %target.name, %err, "ignoring unusable pid file");
                Self::Unknown
            }
        }
    }

    fn probe(self) -> Self {
        match self {
            Self::Probed(pid) if is_alive(pid) => Self::Alive(pid),
            Self::Probed(pid) => Self::Dead(pid),
            other => other,
        }
    }
}

/// Stops daemons according to a [`StopPolicy`].
#[derive(Debug, Clone, Copy, Default)]
pub struct LifecycleController {
    policy: StopPolicy,
}

impl LifecycleController {
    /// Controller using `policy`.
    #[must_use]
    pub fn new(policy: StopPolicy) -> Self {
        Self { policy }
    }

    /// Stop `target` and reconcile its PID file.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Signal` if a process could not be signalled or
    /// survived `SIGKILL`, or `AppError::Io` if the process table or PID file
    /// could not be handled. Every located process is still attempted.
    pub async fn stop(&self, target: &DaemonTarget) -> Result<StopReport> {
        async {
            let mut report = StopReport::new(&target.name);
            let mut first_err = None;

            match DaemonState::from_pid_file(target).probe() {
                DaemonState::Alive(pid) => match self.terminate_pid(pid).await {
                    Ok(action) => report.processes.push(StoppedProcess { pid, action }),
                    Err(err) => first_err = Some(err),
                },
                DaemonState::Dead(pid) => {
                    info!(pid, "daemon already gone");
                    report.processes.push(StoppedProcess {
                        pid,
                        action: StopAction::AlreadyGone,
                    });
                }
                DaemonState::Unknown | DaemonState::Probed(_) => {
                    if let Err(err) = self.sweep(target, &mut report).await {
                        first_err = Some(err);
                    }
                }
            }

            if let Some(path) = target.pid_file.as_deref() {
                match pid_file::remove_pid_file(path) {
                    Ok(removed) => report.pid_file_removed = removed,
                    Err(err) => {
                        first_err.get_or_insert(err);
                    }
                }
            }

            match first_err {
                Some(err) => Err(err),
                None => {
                    info!(
                        processes = report.processes.len(),
                        signalled = report.signalled(),
                        "daemon stopped"
                    );
                    Ok(report)
                }
            }
        }
        .instrument(info_span!("stop_daemon", daemon = %target.name))
        .await
    }

    /// Send `SIGTERM` to `pid`, wait out the grace window, then `SIGKILL`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Signal` if a signal cannot be delivered or the
    /// process survives `SIGKILL`.
    pub async fn terminate_pid(&self, pid: u32) -> Result<StopAction> {
        if !send_signal(pid, Signal::SIGTERM)? {
            return Ok(StopAction::AlreadyGone);
        }
        info!(pid, "sent SIGTERM");

        let deadline = Instant::now() + self.policy.grace;
        loop {
            if !is_alive(pid) {
                info!(pid, "process exited gracefully");
                return Ok(StopAction::Terminated);
            }
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            tokio::time::sleep(self.policy.poll.min(deadline - now)).await;
        }

        warn!(
            pid,
            grace = ?self.policy.grace,
            "process did not exit within grace window, forcing kill"
        );
        if !send_signal(pid, Signal::SIGKILL)? {
            return Ok(StopAction::Terminated);
        }

        let kill_deadline = Instant::now() + KILL_SETTLE;
        while is_alive(pid) {
            if Instant::now() >= kill_deadline {
                return Err(AppError::Signal(format!("process {pid} survived SIGKILL")));
            }
            tokio::time::sleep(KILL_POLL).await;
        }
        Ok(StopAction::Killed)
    }

    async fn sweep(&self, target: &DaemonTarget, report: &mut StopReport) -> Result<()> {
        let Some(pattern) = target.pattern.as_ref() else {
            info!("no pid file and no process pattern; nothing to stop");
            return Ok(());
        };

        let mut first_err = None;
        let mut handled = HashSet::new();
        for pattern in std::iter::once(pattern).chain(target.auxiliary.iter()) {
            let matches = match table::find_matching(pattern) {
                Ok(matches) => matches,
                Err(err) => {
                    first_err.get_or_insert(err);
                    continue;
                }
            };
            for entry in matches.into_iter().filter(|e| handled.insert(e.pid)) {
                info!(pid = entry.pid, command = %entry.command, pattern = %pattern, "stopping matched process");
                match self.terminate_pid(entry.pid).await {
                    Ok(action) => report.processes.push(StoppedProcess {
                        pid: entry.pid,
                        action,
                    }),
                    Err(err) => {
                        warn!(pid = entry.pid, %err, "failed to stop matched process");
                        first_err.get_or_insert(err);
                    }
                }
            }
        }

        first_err.map_or(Ok(()), Err)
    }
}
