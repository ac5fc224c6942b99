//! Global configuration parsing and validation.

use std::collections::{HashMap, HashSet};
use std::env;
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use regex::Regex;
use serde::Deserialize;

use crate::lifecycle::{DaemonTarget, StopPolicy};
use crate::models::is_valid_kind;
use crate::models::process::{ManagedProcessSpec, ReadyProbe};
use crate::models::session::TransportType;
use crate::session::{SessionOptions, DEFAULT_SESSION_POLL};
use crate::transport::multiplexer::DEFAULT_TMUX_BINARY;
use crate::transport::TransportOptions;
use crate::{AppError, Result};

/// How to run one kind of interactive session.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct SessionConfig {
    /// Transport the session is reachable through.
    #[serde(default = "default_transport")]
    pub transport: TransportType,
    /// Interactive program followed by its arguments.
    pub command: Vec<String>,
    /// Echo injected lines to the terminal (pipe sessions).
    #[serde(default = "default_true")]
    pub echo_injected: bool,
    /// Grace given to a superseded session owner before `SIGKILL`.
    #[serde(default = "default_reclaim_grace")]
    pub reclaim_grace_seconds: u64,
}

/// TCP readiness check for a managed process.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct ReadyConfig {
    /// Address that accepts connections once the process is ready.
    pub tcp: SocketAddr,
    /// Upper bound on the wait.
    #[serde(default = "default_ready_timeout")]
    pub timeout_seconds: u64,
}

/// One managed process, launched in file order.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct ProcessConfig {
    /// Unique name used in reports and by `stop`.
    pub name: String,
    /// Program followed by its arguments; exclusive with `session`.
    #[serde(default)]
    pub command: Option<Vec<String>>,
    /// Session kind to run as a session manager; exclusive with `command`.
    #[serde(default)]
    pub session: Option<String>,
    /// Wait after launch before starting the next process.
    #[serde(default)]
    pub settle_seconds: u64,
    /// File the launched PID is written to.
    #[serde(default)]
    pub pid_file: Option<PathBuf>,
    /// File receiving stdout and stderr.
    #[serde(default)]
    pub log_file: Option<PathBuf>,
    /// Process-table pattern used by `stop` when there is no PID file.
    #[serde(default)]
    pub stop_pattern: Option<String>,
    /// Client processes swept together with the daemon.
    #[serde(default)]
    pub auxiliary_patterns: Vec<String>,
    /// Optional readiness check after the settle delay.
    #[serde(default)]
    pub ready: Option<ReadyConfig>,
}

fn default_transport() -> TransportType {
    TransportType::Multiplexer
}

fn default_true() -> bool {
    true
}

fn default_reclaim_grace() -> u64 {
    3
}

fn default_ready_timeout() -> u64 {
    30
}

fn default_poll_interval() -> u64 {
    10
}

fn default_stop_grace() -> u64 {
    10
}

fn default_stop_poll() -> u64 {
    1
}

fn default_inject_timeout_ms() -> u64 {
    2000
}

fn default_tmux_binary() -> String {
    DEFAULT_TMUX_BINARY.into()
}

/// Registry directory used when the configuration does not name one:
/// `$XDG_RUNTIME_DIR/voxherd`, else a per-user directory under the system
/// temporary directory.
#[must_use]
pub fn default_registry_dir() -> PathBuf {
    match env::var_os("XDG_RUNTIME_DIR") {
        Some(runtime) if !runtime.is_empty() => PathBuf::from(runtime).join("voxherd"),
        _ => env::temp_dir().join(format!("voxherd-{}", nix::unistd::getuid())),
    }
}

/// Global configuration parsed from `config.toml`.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct GlobalConfig {
    /// Session registry directory.
    #[serde(default)]
    pub registry_dir: Option<PathBuf>,
    /// Supervision poll interval.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_seconds: u64,
    /// Grace window before `stop` escalates to `SIGKILL`.
    #[serde(default = "default_stop_grace")]
    pub stop_grace_seconds: u64,
    /// Liveness poll interval during `stop`.
    #[serde(default = "default_stop_poll")]
    pub stop_poll_seconds: u64,
    /// Bound on one pipe injection.
    #[serde(default = "default_inject_timeout_ms")]
    pub inject_timeout_ms: u64,
    /// Terminal multiplexer client binary.
    #[serde(default = "default_tmux_binary")]
    pub tmux_binary: String,
    /// Session kinds keyed by kind name.
    #[serde(default)]
    pub sessions: HashMap<String, SessionConfig>,
    /// Managed processes in launch order.
    #[serde(default)]
    pub processes: Vec<ProcessConfig>,
}

impl GlobalConfig {
    /// Load and validate configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read or contains
    /// invalid TOML, or if validation fails.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path).map_err(|err| {
            AppError::Config(format!("failed to read config {}: {err}", path.display()))
        })?;
        Self::from_toml_str(&raw)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Effective registry directory.
    #[must_use]
    pub fn registry_dir(&self) -> PathBuf {
        self.registry_dir.clone().unwrap_or_else(default_registry_dir)
    }

    /// Supervision poll interval.
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_seconds)
    }

    /// Stop policy for the lifecycle controller.
    #[must_use]
    pub fn stop_policy(&self) -> StopPolicy {
        StopPolicy {
            grace: Duration::from_secs(self.stop_grace_seconds),
            poll: Duration::from_secs(self.stop_poll_seconds),
        }
    }

    /// Settings used by injectors.
    #[must_use]
    pub fn transport_options(&self) -> TransportOptions {
        TransportOptions {
            tmux_binary: self.tmux_binary.clone(),
            inject_timeout: Duration::from_millis(self.inject_timeout_ms),
        }
    }

    /// Creation options for session `kind`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` if no `[sessions.<kind>]` entry exists.
    pub fn session_options(&self, kind: &str) -> Result<SessionOptions> {
        let session = self
            .sessions
            .get(kind)
            .ok_or_else(|| AppError::NotFound(format!("session kind '{kind}' is not configured")))?;
        Ok(SessionOptions {
            kind: kind.to_owned(),
            transport: session.transport,
            command: session.command.clone(),
            reclaim_grace: Duration::from_secs(session.reclaim_grace_seconds),
            poll_interval: DEFAULT_SESSION_POLL,
            echo_injected: session.echo_injected,
        })
    }

    /// Launch specs in file order. Session entries re-invoke `self_exe` as a
    /// session manager reading `config_path`.
    #[must_use]
    pub fn process_specs(&self, self_exe: &Path, config_path: &Path) -> Vec<ManagedProcessSpec> {
        self.processes
            .iter()
            .map(|process| {
                let settle = Duration::from_secs(process.settle_seconds);
                let mut spec = match (&process.command, &process.session) {
                    (_, Some(kind)) => ManagedProcessSpec::new(
                        process.name.clone(),
                        vec![
                            self_exe.display().to_string(),
                            "--config".into(),
                            config_path.display().to_string(),
                            "session".into(),
                            kind.clone(),
                        ],
                        settle,
                    )
                    .with_session_kind(kind.clone()),
                    (Some(command), None) => {
                        ManagedProcessSpec::new(process.name.clone(), command.clone(), settle)
                    }
                    (None, None) => ManagedProcessSpec::new(process.name.clone(), Vec::new(), settle),
                };
                if let Some(path) = &process.pid_file {
                    spec = spec.with_pid_file(path.clone());
                }
                if let Some(path) = &process.log_file {
                    spec = spec.with_log_file(path.clone());
                }
                if let Some(ready) = &process.ready {
                    spec = spec.with_ready_probe(ReadyProbe {
                        tcp: ready.tcp,
                        timeout: Duration::from_secs(ready.timeout_seconds),
                    });
                }
                spec
            })
            .collect()
    }

    /// How to find and stop the process named `name`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` for an unknown name, or `AppError::Config`
    /// if a pattern does not compile.
    pub fn daemon_target(&self, name: &str) -> Result<DaemonTarget> {
        let process = self
            .processes
            .iter()
            .find(|p| p.name == name)
            .ok_or_else(|| AppError::NotFound(format!("no managed process named '{name}'")))?;

        let mut target = DaemonTarget::new(name);
        if let Some(path) = &process.pid_file {
            target = target.with_pid_file(path.clone());
        }
        if let Some(pattern) = &process.stop_pattern {
            target = target.with_pattern(compile(pattern)?);
        }
        for pattern in &process.auxiliary_patterns {
            target = target.with_auxiliary(compile(pattern)?);
        }
        Ok(target)
    }

    fn validate(&self) -> Result<()> {
        if self.poll_interval_seconds == 0 {
            return Err(AppError::Config(
                "poll_interval_seconds must be greater than zero".into(),
            ));
        }
        if self.stop_poll_seconds == 0 {
            return Err(AppError::Config(
                "stop_poll_seconds must be greater than zero".into(),
            ));
        }
        if self.inject_timeout_ms == 0 {
            return Err(AppError::Config(
                "inject_timeout_ms must be greater than zero".into(),
            ));
        }

        for (kind, session) in &self.sessions {
            if !is_valid_kind(kind) {
                return Err(AppError::Config(format!(
                    "session kind '{kind}' must match [A-Za-z0-9_-]+"
                )));
            }
            if session.command.is_empty() {
                return Err(AppError::Config(format!(
                    "session '{kind}' command must not be empty"
                )));
            }
        }

        if self.processes.is_empty() {
            return Err(AppError::Config("at least one process is required".into()));
        }

        let mut names = HashSet::new();
        for process in &self.processes {
            if process.name.trim().is_empty() {
                return Err(AppError::Config("process name must not be empty".into()));
            }
            if !names.insert(process.name.as_str()) {
                return Err(AppError::Config(format!(
                    "duplicate process name '{}'",
                    process.name
                )));
            }
            match (&process.command, &process.session) {
                (Some(command), None) if command.is_empty() => {
                    return Err(AppError::Config(format!(
                        "process '{}' command must not be empty",
                        process.name
                    )));
                }
                (Some(_), None) => {}
                (None, Some(kind)) if !self.sessions.contains_key(kind) => {
                    return Err(AppError::Config(format!(
                        "process '{}' refers to unknown session '{kind}'",
                        process.name
                    )));
                }
                (None, Some(_)) => {}
                _ => {
                    return Err(AppError::Config(format!(
                        "process '{}' needs exactly one of command or session",
                        process.name
                    )));
                }
            }
            for pattern in process.stop_pattern.iter().chain(&process.auxiliary_patterns) {
                compile(pattern)?;
            }
        }

        Ok(())
    }
}

fn compile(pattern: &str) -> Result<Regex> {
    Regex::new(pattern).map_err(|err| AppError::Config(format!("invalid pattern '{pattern}': {err}")))
}
