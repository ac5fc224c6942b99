//! Error types shared across the application.

use std::fmt::{Display, Formatter};

/// Shared application result type.
pub type Result<T> = std::result::Result<T, AppError>;

/// Application error enumeration covering all domain failure modes.
#[derive(Debug)]
pub enum AppError {
    /// Configuration parsing or validation failure.
    Config(String),
    /// File-system or I/O operation failure.
    Io(String),
    /// A managed process could not be started or died during startup.
    Launch(String),
    /// Session registry read, write, or lock failure.
    Registry(String),
    /// A stale session of the same kind could not be destroyed.
    SessionReclaim(String),
    /// No live session (or its transport) exists to receive a command.
    InjectionTargetMissing(String),
    /// The injection transport did not accept the command in time.
    InjectionTimeout(String),
    /// Terminal multiplexer invocation failure.
    Multiplexer(String),
    /// Signal delivery failure other than a vanished process.
    Signal(String),
    /// Requested entity does not exist.
    NotFound(String),
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::Io(msg) => write!(f, "io: {msg}"),
            Self::Launch(msg) => write!(f, "launch failure: {msg}"),
            Self::Registry(msg) => write!(f, "registry: {msg}"),
            Self::SessionReclaim(msg) => write!(f, "session reclaim failure: {msg}"),
            Self::InjectionTargetMissing(msg) => write!(f, "injection target missing: {msg}"),
            Self::InjectionTimeout(msg) => write!(f, "injection timeout: {msg}"),
            Self::Multiplexer(msg) => write!(f, "multiplexer: {msg}"),
            Self::Signal(msg) => write!(f, "signal: {msg}"),
            Self::NotFound(msg) => write!(f, "not found: {msg}"),
        }
    }
}

impl std::error::Error for AppError {}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(format!("invalid config: {err}"))
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        Self::Registry(format!("malformed session record: {err}"))
    }
}
