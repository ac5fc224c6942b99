//! Command injection transports.
//!
//! A transport delivers a line of text into a running interactive session as
//! if a human had typed it. Two variants exist, selected by the session's
//! registry record:
//!
//! - [`multiplexer::MultiplexerInjector`] sends literal keystrokes followed by
//!   `Enter` into a named terminal multiplexer session.
//! - [`pipe::PipeInjector`] writes a newline-terminated line into the FIFO
//!   the session front-end reads from.
//!
//! Delivery is fire-and-forget. `Ok(())` means the text was handed to the
//! transport; there is no acknowledgement that the program acted on it, and
//! callers must make sure the program is ready for input.

pub mod multiplexer;
pub mod pipe;

use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{info, info_span, Instrument};

use crate::models::session::{SessionRecord, TransportType};
use crate::registry::SessionRegistry;
use crate::{AppError, Result};

use self::multiplexer::{MultiplexerInjector, TmuxMultiplexer};
use self::pipe::PipeInjector;

/// Default bound on a single pipe injection.
pub const DEFAULT_INJECT_TIMEOUT: Duration = Duration::from_secs(2);

/// Delivers text into one session.
pub trait CommandInjector: Send + Sync {
    /// Deliver `text` followed by the confirm key / newline.
    ///
    /// # Errors
    ///
    /// Returns `AppError::InjectionTargetMissing` if the session's transport
    /// no longer exists, or `AppError::InjectionTimeout` if it did not accept
    /// the text within the transport's bound.
    fn inject<'a>(&'a self, text: &'a str)
        -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;
}

/// Settings used to reach a session's transport.
#[derive(Debug, Clone)]
pub struct TransportOptions {
    /// Multiplexer binary.
    pub tmux_binary: String,
    /// Bound on a pipe injection, including waiting for a reader.
    pub inject_timeout: Duration,
}

impl Default for TransportOptions {
    fn default() -> Self {
        Self {
            tmux_binary: multiplexer::DEFAULT_TMUX_BINARY.to_owned(),
            inject_timeout: DEFAULT_INJECT_TIMEOUT,
        }
    }
}

/// Build the injector matching `record`'s transport.
#[must_use]
pub fn connect(record: &SessionRecord, options: &TransportOptions) -> Box<dyn CommandInjector> {
    match record.transport.kind {
        TransportType::Multiplexer => Box::new(MultiplexerInjector::new(
            TmuxMultiplexer::new(options.tmux_binary.clone()),
            record.transport.address.clone(),
        )),
        TransportType::Pipe => Box::new(PipeInjector::new(
            PathBuf::from(&record.transport.address),
            options.inject_timeout,
        )),
    }
}

/// Locate the live session of `kind` and inject `text` into it.
///
/// `options.inject_timeout` bounds the whole call: waiting for the kind's
/// registry lock and the pipe write share one deadline.
///
/// # Errors
///
/// Returns `AppError::InjectionTargetMissing` if no live session of `kind` is
/// registered, `AppError::InjectionTimeout` if the registry stayed locked
/// past the deadline, plus any error from the transport itself.
pub async fn inject_into_session(
    registry: &SessionRegistry,
    kind: &str,
    text: &str,
    options: &TransportOptions,
) -> Result<SessionRecord> {
    let deadline = Instant::now() + options.inject_timeout;
    let record = {
        let lock = registry
            .lock_kind_within(kind, options.inject_timeout)
            .await?
            .ok_or_else(|| {
                AppError::InjectionTimeout(format!(
                    "registry for kind '{kind}' stayed locked for {:?}",
                    options.inject_timeout
                ))
            })?;
        registry.find_live(&lock)?
    }
    .ok_or_else(|| AppError::InjectionTargetMissing(format!("no live session of kind '{kind}'")))?;

    let remaining = TransportOptions {
        inject_timeout: deadline.saturating_duration_since(Instant::now()),
        ..options.clone()
    };
    connect(&record, &remaining)
        .inject(text)
        .instrument(info_span!("inject", kind, owner_pid = record.owner_pid))
        .await?;

    info!(
        kind,
        owner_pid = record.owner_pid,
        address = %record.transport.address,
        chars = text.chars().count(),
        "command injected"
    );
    Ok(record)
}
