//! Managed process model: static launch specs and runtime handles.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tokio::process::Child;
use tracing::warn;

use crate::process::probe_pid;

/// Last observed liveness of a managed process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Liveness {
    /// Not checked since launch.
    Unknown,
    /// Process exists.
    Alive,
    /// Process is gone (or only a zombie remains).
    Exited,
}

/// TCP readiness check run after a process's settle delay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadyProbe {
    /// Address that accepts connections once the process is ready.
    pub tcp: SocketAddr,
    /// Upper bound on the readiness wait.
    pub timeout: Duration,
}

/// Static description of one managed process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagedProcessSpec {
    /// Human-readable name used in reports.
    pub name: String,
    /// Program followed by its arguments.
    pub command: Vec<String>,
    /// Mandatory wait after launching before the next spec is launched.
    pub settle: Duration,
    /// Session kind when this process is a session manager instance.
    pub session_kind: Option<String>,
    /// Where to record the launched PID for later `stop`.
    pub pid_file: Option<PathBuf>,
    /// File receiving stdout and stderr; inherits the terminal when unset.
    pub log_file: Option<PathBuf>,
    /// Optional readiness check after the settle delay.
    pub ready: Option<ReadyProbe>,
}

impl ManagedProcessSpec {
    /// Construct a plain spec with no session flag, PID file, log file, or
    /// readiness probe.
    #[must_use]
    pub fn new(name: impl Into<String>, command: Vec<String>, settle: Duration) -> Self {
        Self {
            name: name.into(),
            command,
            settle,
            session_kind: None,
            pid_file: None,
            log_file: None,
            ready: None,
        }
    }

    /// Record the launched PID in `path`.
    #[must_use]
    pub fn with_pid_file(mut self, path: PathBuf) -> Self {
        self.pid_file = Some(path);
        self
    }

    /// Redirect stdout and stderr to `path`.
    #[must_use]
    pub fn with_log_file(mut self, path: PathBuf) -> Self {
        self.log_file = Some(path);
        self
    }

    /// Wait for `probe` after the settle delay.
    #[must_use]
    pub fn with_ready_probe(mut self, probe: ReadyProbe) -> Self {
        self.ready = Some(probe);
        self
    }

    /// Mark this spec as a session manager of `kind`.
    #[must_use]
    pub fn with_session_kind(mut self, kind: impl Into<String>) -> Self {
        self.session_kind = Some(kind.into());
        self
    }
}

/// Runtime record for a launched process, owned by the orchestrator.
///
/// Dropping a handle never signals the process: managed processes are
/// independent tools that outlive the orchestrator.
#[derive(Debug)]
pub struct ManagedProcessHandle {
    /// Process identifier.
    pub pid: u32,
    /// Spec the process was launched from.
    pub spec: ManagedProcessSpec,
    /// Wall-clock launch time.
    pub launched_at: DateTime<Utc>,
    /// Monotonic launch time.
    pub launch_instant: Instant,
    /// Last observed liveness.
    pub liveness: Liveness,
    child: Option<Child>,
}

impl ManagedProcessHandle {
    /// Wrap a child this process spawned. The child is reaped on exit so that
    /// its PID does not linger as a zombie.
    #[must_use]
    pub fn from_child(pid: u32, spec: ManagedProcessSpec, child: Child) -> Self {
        Self {
            pid,
            spec,
            launched_at: Utc::now(),
            launch_instant: Instant::now(),
            liveness: Liveness::Unknown,
            child: Some(child),
        }
    }

    /// Time elapsed since launch.
    #[must_use]
    pub fn uptime(&self) -> Duration {
        self.launch_instant.elapsed()
    }

    /// Reap the child if it has exited, then probe the PID with signal 0.
    pub fn check_liveness(&mut self) -> Liveness {
        if let Some(child) = self.child.as_mut() {
            match child.try_wait() {
                Ok(Some(status)) => {
                    self.child = None;
                    self.liveness = Liveness::Exited;
                    tracing::debug!(pid = self.pid, %status, "managed child reaped");
                    return self.liveness;
                }
                Ok(None) => {}
                Err(err) => {
                    warn!(pid = self.pid, %err, "failed to poll child status, falling back to pid probe");
                }
            }
        }

        self.liveness = probe_pid(self.pid);
        self.liveness
    }
}
