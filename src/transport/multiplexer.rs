//! Terminal multiplexer transport.
//!
//! The [`Multiplexer`] trait abstracts the handful of `tmux` operations the
//! session manager and injector need. Calls are synchronous: each is a
//! short-lived `tmux` client invocation, and the session release path must be
//! able to run them from `Drop`.

use std::future::Future;
use std::pin::Pin;
use std::process::{Command, Output};

use tracing::debug;

use super::CommandInjector;
use crate::{AppError, Result};

/// Multiplexer binary used when the configuration does not name one.
pub const DEFAULT_TMUX_BINARY: &str = "tmux";

/// Operations on named multiplexer sessions.
pub trait Multiplexer: Send + Sync {
    /// Whether a session named exactly `name` exists.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Multiplexer` if the multiplexer cannot be queried.
    fn has_session(&self, name: &str) -> Result<bool>;

    /// Start `command` in a new detached session named `name`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Multiplexer` if the session cannot be created.
    fn new_session(&self, name: &str, command: &[String]) -> Result<()>;

    /// Destroy the session named `name`. Returns `Ok(false)` if it did not
    /// exist.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Multiplexer` if the session exists but survives.
    fn kill_session(&self, name: &str) -> Result<bool>;

    /// Type `text` literally into the session's active pane.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Multiplexer` if the keys cannot be delivered.
    fn send_text(&self, name: &str, text: &str) -> Result<()>;

    /// Press the confirm key in the session's active pane.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Multiplexer` if the key cannot be delivered.
    fn send_enter(&self, name: &str) -> Result<()>;
}

/// [`Multiplexer`] backed by the `tmux` command-line client.
#[derive(Debug, Clone)]
pub struct TmuxMultiplexer {
    binary: String,
}

impl Default for TmuxMultiplexer {
    fn default() -> Self {
        Self::new(DEFAULT_TMUX_BINARY)
    }
}

impl TmuxMultiplexer {
    /// Use `binary` as the tmux client.
    #[must_use]
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    fn run(&self, args: &[&str]) -> Result<Output> {
        debug!(binary = %self.binary, ?args, "running multiplexer command");
        Command::new(&self.binary)
            .args(args)
            .output()
            .map_err(|err| AppError::Multiplexer(format!("failed to run {}: {err}", self.binary)))
    }

    fn run_checked(&self, args: &[&str]) -> Result<()> {
        let output = self.run(args)?;
        if output.status.success() {
            Ok(())
        } else {
            Err(AppError::Multiplexer(format!(
                "{} {} failed: {}",
                self.binary,
                args.first().copied().unwrap_or_default(),
                String::from_utf8_lossy(&output.stderr).trim()
            )))
        }
    }
}

/// `=name` matches the session exactly instead of by prefix.
fn session_target(name: &str) -> String {
    format!("={name}")
}

/// Active pane of the exactly-named session.
fn pane_target(name: &str) -> String {
    format!("={name}:")
}

impl Multiplexer for TmuxMultiplexer {
    fn has_session(&self, name: &str) -> Result<bool> {
        Ok(self
            .run(&["has-session", "-t", &session_target(name)])?
            .status
            .success())
    }

    fn new_session(&self, name: &str, command: &[String]) -> Result<()> {
        let mut args = vec!["new-session", "-d", "-s", name, "--"];
        args.extend(command.iter().map(String::as_str));
        self.run_checked(&args)
    }

    fn kill_session(&self, name: &str) -> Result<bool> {
        let output = self.run(&["kill-session", "-t", &session_target(name)])?;
        if output.status.success() {
            return Ok(true);
        }
        if self.has_session(name)? {
            Err(AppError::Multiplexer(format!(
                "session {name} survived kill-session: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            )))
        } else {
            Ok(false)
        }
    }

    fn send_text(&self, name: &str, text: &str) -> Result<()> {
        self.run_checked(&["send-keys", "-t", &pane_target(name), "-l", "--", text])
    }

    fn send_enter(&self, name: &str) -> Result<()> {
        self.run_checked(&["send-keys", "-t", &pane_target(name), "Enter"])
    }
}

/// Injects commands into one multiplexer session.
#[derive(Debug, Clone)]
pub struct MultiplexerInjector<M> {
    mux: M,
    target: String,
}

impl<M: Multiplexer> MultiplexerInjector<M> {
    /// Target the session named `target`.
    #[must_use]
    pub fn new(mux: M, target: impl Into<String>) -> Self {
        Self {
            mux,
            target: target.into(),
        }
    }

    fn deliver(&self, text: &str) -> Result<()> {
        if !self.mux.has_session(&self.target)? {
            return Err(AppError::InjectionTargetMissing(format!(
                "multiplexer session {} does not exist",
                self.target
            )));
        }

        let line = text.trim_end_matches(['\r', '\n']);
        if !line.is_empty() {
            self.mux.send_text(&self.target, line)?;
        }
        self.mux.send_enter(&self.target)
    }
}

impl<M: Multiplexer> CommandInjector for MultiplexerInjector<M> {
    fn inject<'a>(
        &'a self,
        text: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(async move { self.deliver(text) })
    }
}
