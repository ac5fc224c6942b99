//! Session registry record and transport descriptor.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Mechanism used to deliver injected text into a session.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TransportType {
    /// Keystrokes sent into a named terminal multiplexer session.
    Multiplexer,
    /// Lines written to a FIFO read by the session front-end.
    Pipe,
}

/// Where a session's transport can be reached.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TransportDescriptor {
    /// Transport variant.
    #[serde(rename = "type")]
    pub kind: TransportType,
    /// Multiplexer session name or FIFO path.
    pub address: String,
}

impl TransportDescriptor {
    /// Descriptor for a multiplexer session named `name`.
    #[must_use]
    pub fn multiplexer(name: impl Into<String>) -> Self {
        Self {
            kind: TransportType::Multiplexer,
            address: name.into(),
        }
    }

    /// Descriptor for a FIFO at `path`.
    #[must_use]
    pub fn pipe(path: impl Into<String>) -> Self {
        Self {
            kind: TransportType::Pipe,
            address: path.into(),
        }
    }
}

/// Published metadata describing one live injectable session.
///
/// Serialized as `{owner_pid, kind, transport: {type, address}, created_at}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct SessionRecord {
    /// PID of the session manager that owns the session; unique key.
    pub owner_pid: u32,
    /// Session kind; at most one live record per kind.
    pub kind: String,
    /// Transport reaching the session.
    pub transport: TransportDescriptor,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}

impl SessionRecord {
    /// Construct a record stamped with the current time.
    #[must_use]
    pub fn new(owner_pid: u32, kind: impl Into<String>, transport: TransportDescriptor) -> Self {
        Self {
            owner_pid,
            kind: kind.into(),
            transport,
            created_at: Utc::now(),
        }
    }

    /// Multiplexer session name or FIFO file name for `kind` owned by `pid`.
    #[must_use]
    pub fn transport_key(kind: &str, owner_pid: u32) -> String {
        format!("{kind}-{owner_pid}")
    }
}
