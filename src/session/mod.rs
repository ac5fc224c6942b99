//! Interactive session manager.
//!
//! A session manager owns one addressable interactive session of a given
//! kind. Creating a session reclaims any previous session of the same kind,
//! allocates a transport (a multiplexer session or a FIFO), publishes a
//! [`SessionRecord`] so injection tools can find it, and starts the
//! interactive program. The returned [`SessionHandle`] withdraws the record
//! and destroys the transport on every exit path it can observe.

pub mod frontend;

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use tokio::io::AsyncRead;
use tokio::process::{Child, Command};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::lifecycle::{LifecycleController, StopAction, StopPolicy};
use crate::models::is_valid_kind;
use crate::models::session::{SessionRecord, TransportDescriptor, TransportType};
use crate::process::is_alive;
use crate::registry::SessionRegistry;
use crate::transport::multiplexer::Multiplexer;
use crate::transport::pipe::{create_fifo, remove_fifo};
use crate::{AppError, Result};

use self::frontend::{run_frontend, terminate_program, FrontendExit};

/// Default interval between multiplexer session liveness checks.
pub const DEFAULT_SESSION_POLL: Duration = Duration::from_secs(1);

/// Default grace given to a previous owner before it is killed.
pub const DEFAULT_RECLAIM_GRACE: Duration = Duration::from_secs(3);

/// Grace given to a pipe session's program after its input is closed.
const PROGRAM_GRACE: Duration = Duration::from_secs(2);

/// Poll interval while waiting for a previous owner to exit.
const RECLAIM_POLL: Duration = Duration::from_millis(100);

/// How to create a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionOptions {
    /// Session kind; one live session per kind.
    pub kind: String,
    /// Transport the session is reachable through.
    pub transport: TransportType,
    /// Interactive program followed by its arguments.
    pub command: Vec<String>,
    /// Grace given to a previous owner between `SIGTERM` and `SIGKILL`.
    pub reclaim_grace: Duration,
    /// Interval between multiplexer session liveness checks.
    pub poll_interval: Duration,
    /// Echo injected lines to the terminal (pipe sessions only).
    pub echo_injected: bool,
}

impl SessionOptions {
    /// Options with default grace, poll interval, and echo enabled.
    #[must_use]
    pub fn new(kind: impl Into<String>, transport: TransportType, command: Vec<String>) -> Self {
        Self {
            kind: kind.into(),
            transport,
            command,
            reclaim_grace: DEFAULT_RECLAIM_GRACE,
            poll_interval: DEFAULT_SESSION_POLL,
            echo_injected: true,
        }
    }
}

/// Why [`SessionHandle::run`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// The pipe session's program exited with the given code.
    ProgramExited(Option<i32>),
    /// The multiplexer session was closed.
    Closed,
    /// Shutdown was requested.
    Cancelled,
}

/// Whether the transport described by `transport` still exists.
fn transport_exists<M: Multiplexer>(mux: &M, transport: &TransportDescriptor) -> Result<bool> {
    match transport.kind {
        TransportType::Multiplexer => mux.has_session(&transport.address),
        TransportType::Pipe => Ok(Path::new(&transport.address).symlink_metadata().is_ok()),
    }
}

/// Destroy the transport. Returns `Ok(false)` if it was already gone.
fn destroy_transport<M: Multiplexer>(mux: &M, transport: &TransportDescriptor) -> Result<bool> {
    match transport.kind {
        TransportType::Multiplexer => mux.kill_session(&transport.address),
        TransportType::Pipe => remove_fifo(Path::new(&transport.address)),
    }
}

/// Creates sessions and reclaims superseded ones.
#[derive(Debug, Clone)]
pub struct SessionManager<M> {
    registry: SessionRegistry,
    mux: M,
    owner_pid: u32,
}

impl<M: Multiplexer + Clone> SessionManager<M> {
    /// Manager publishing into `registry`, owned by the current process.
    #[must_use]
    pub fn new(registry: SessionRegistry, mux: M) -> Self {
        Self {
            registry,
            mux,
            owner_pid: std::process::id(),
        }
    }

    /// Publish records under `pid` instead of the current process id.
    #[must_use]
    pub fn with_owner_pid(mut self, pid: u32) -> Self {
        self.owner_pid = pid;
        self
    }

    /// Registry this manager publishes into.
    #[must_use]
    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    /// Create the single live session of `options.kind`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` for an invalid kind or empty command,
    /// `AppError::SessionReclaim` if a previous session cannot be destroyed,
    /// `AppError::Registry` if the record cannot be published, or
    /// `AppError::Launch` if the transport or program cannot be started.
    pub async fn create_session(&self, options: &SessionOptions) -> Result<SessionHandle<M>> {
        if !is_valid_kind(&options.kind) {
            return Err(AppError::Config(format!(
                "invalid session kind '{}'",
                options.kind
            )));
        }
        if options.command.is_empty() {
            return Err(AppError::Config(format!(
                "session kind '{}' has an empty command",
                options.kind
            )));
        }

        let span = info_span!("create_session", kind = %options.kind, owner_pid = self.owner_pid);
        self.create_locked(options).instrument(span).await
    }

    async fn create_locked(&self, options: &SessionOptions) -> Result<SessionHandle<M>> {
        let lock = self.registry.lock_kind(&options.kind).await?;

        for stale in self.registry.list_kind(&options.kind)? {
            self.reclaim(&stale, options.reclaim_grace)
                .await
                .map_err(|err| match err {
                    AppError::SessionReclaim(_) => err,
                    other => AppError::SessionReclaim(format!(
                        "{} session owned by {}: {other}",
                        stale.kind, stale.owner_pid
                    )),
                })?;
        }

        let handle = self.start(options)?;
        drop(lock);

        info!(
            transport = ?handle.record.transport.kind,
            address = %handle.record.transport.address,
            "session created"
        );
        Ok(handle)
    }

    async fn reclaim(&self, record: &SessionRecord, grace: Duration) -> Result<()> {
        let owner = record.owner_pid;
        let transport_live = transport_exists(&self.mux, &record.transport)?;

        if transport_live && owner != self.owner_pid && is_alive(owner) {
            info!(owner, "terminating previous session owner");
            let controller = LifecycleController::new(StopPolicy {
                grace,
                poll: RECLAIM_POLL,
            });
            let action = controller.terminate_pid(owner).await?;
            if action == StopAction::Killed {
                warn!(owner, "previous session owner had to be killed");
            }
        } else if !transport_live {
            debug!(owner, "previous session transport already gone");
        }

        match destroy_transport(&self.mux, &record.transport) {
            Ok(destroyed) => debug!(owner, destroyed, "previous session transport reclaimed"),
            Err(err) => warn!(owner, %err, "failed to destroy previous session transport"),
        }
        if transport_exists(&self.mux, &record.transport)? {
            return Err(AppError::SessionReclaim(format!(
                "transport {} of {} session owned by {owner} survived reclaim",
                record.transport.address, record.kind
            )));
        }

        self.registry.remove(record)?;
        info!(owner, "previous session reclaimed");
        Ok(())
    }

    fn start(&self, options: &SessionOptions) -> Result<SessionHandle<M>> {
        let key = SessionRecord::transport_key(&options.kind, self.owner_pid);
        let transport = match options.transport {
            TransportType::Multiplexer => TransportDescriptor::multiplexer(key),
            TransportType::Pipe => {
                let path = self.registry.dir().join(format!("{key}.fifo"));
                TransportDescriptor::pipe(path.to_string_lossy().into_owned())
            }
        };

        let mut handle = SessionHandle {
            record: SessionRecord::new(self.owner_pid, options.kind.clone(), transport),
            registry: self.registry.clone(),
            mux: self.mux.clone(),
            child: None,
            poll_interval: options.poll_interval,
            echo_injected: options.echo_injected,
            released: false,
        };

        match options.transport {
            TransportType::Multiplexer => {
                let name = handle.record.transport.address.clone();
                if self.mux.kill_session(&name)? {
                    warn!(session = %name, "removed leftover multiplexer session");
                }
                self.registry.write(&handle.record)?;
                self.mux
                    .new_session(&name, &options.command)
                    .map_err(|err| AppError::Launch(format!("{}: {err}", options.kind)))?;
            }
            TransportType::Pipe => {
                let fifo = PathBuf::from(&handle.record.transport.address);
                create_fifo(&fifo)?;
                self.registry.write(&handle.record)?;
                handle.child = Some(spawn_program(&options.command)?);
            }
        }

        Ok(handle)
    }
}

fn spawn_program(command: &[String]) -> Result<Child> {
    let (program, args) = command
        .split_first()
        .ok_or_else(|| AppError::Launch("empty session command".into()))?;
    let child = Command::new(program)
        .args(args)
        .stdin(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|err| AppError::Launch(format!("failed to start {program}: {err}")))?;
    debug!(program = %program, pid = ?child.id(), "session program started");
    Ok(child)
}

/// Live session owned by this process.
///
/// Dropping the handle withdraws the record, destroys the transport, and
/// kills a pipe session's program.
#[derive(Debug)]
pub struct SessionHandle<M: Multiplexer> {
    record: SessionRecord,
    registry: SessionRegistry,
    mux: M,
    child: Option<Child>,
    poll_interval: Duration,
    echo_injected: bool,
    released: bool,
}

impl<M: Multiplexer> SessionHandle<M> {
    /// Published record.
    #[must_use]
    pub fn record(&self) -> &SessionRecord {
        &self.record
    }

    /// Serve the session until it ends or `cancel` fires, then release it.
    /// Pipe sessions read typed input from this process's stdin.
    ///
    /// # Errors
    ///
    /// See [`SessionHandle::run_with_input`].
    pub async fn run(self, cancel: &CancellationToken) -> Result<SessionEnd> {
        self.run_with_input(Some(tokio::io::stdin()), cancel).await
    }

    /// Like [`SessionHandle::run`], with `human` as the typed-input source.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Multiplexer` if the session cannot be queried,
    /// `AppError::Io` if the FIFO cannot be served, or the first cleanup
    /// error.
    pub async fn run_with_input<R>(
        mut self,
        human: Option<R>,
        cancel: &CancellationToken,
    ) -> Result<SessionEnd>
    where
        R: AsyncRead + Unpin,
    {
        let outcome = match self.record.transport.kind {
            TransportType::Multiplexer => self.watch_multiplexer(cancel).await,
            TransportType::Pipe => self.serve_pipe(human, cancel).await,
        };
        let released = self.release_now();
        let end = outcome?;
        released?;
        info!(kind = %self.record.kind, ?end, "session ended");
        Ok(end)
    }

    /// Withdraw the record and destroy the transport now.
    ///
    /// # Errors
    ///
    /// Returns the first cleanup error; every step is still attempted.
    pub fn release(mut self) -> Result<()> {
        self.release_now()
    }

    async fn watch_multiplexer(&self, cancel: &CancellationToken) -> Result<SessionEnd> {
        let name = &self.record.transport.address;
        loop {
            tokio::select! {
                () = cancel.cancelled() => return Ok(SessionEnd::Cancelled),
                () = tokio::time::sleep(self.poll_interval) => {}
            }
            if !self.mux.has_session(name)? {
                info!(session = %name, "multiplexer session closed");
                return Ok(SessionEnd::Closed);
            }
        }
    }

    async fn serve_pipe<R>(&mut self, human: Option<R>, cancel: &CancellationToken) -> Result<SessionEnd>
    where
        R: AsyncRead + Unpin,
    {
        let fifo = PathBuf::from(&self.record.transport.address);
        let child = self
            .child
            .as_mut()
            .ok_or_else(|| AppError::Launch("pipe session has no program".into()))?;

        match run_frontend(child, &fifo, human, self.echo_injected, cancel).await? {
            FrontendExit::ProgramExited(status) => Ok(SessionEnd::ProgramExited(status.code())),
            FrontendExit::Cancelled => {
                terminate_program(child, PROGRAM_GRACE).await;
                Ok(SessionEnd::Cancelled)
            }
        }
    }

    fn release_now(&mut self) -> Result<()> {
        if self.released {
            return Ok(());
        }
        self.released = true;

        // A later session created by the same owner reuses this key; its
        // record and transport are not ours to remove.
        match self
            .registry
            .published(&self.record.kind, self.record.owner_pid)
        {
            Ok(Some(current)) if current != self.record => {
                debug!(
                    kind = %self.record.kind,
                    address = %current.transport.address,
                    "session superseded, leaving successor in place"
                );
                drop(self.child.take());
                return Ok(());
            }
            Ok(_) => {}
            Err(err) => warn!(kind = %self.record.kind, %err, "failed to read published record"),
        }

        let mut first_err = None;
        if let Err(err) = self.registry.remove(&self.record) {
            warn!(kind = %self.record.kind, %err, "failed to withdraw session record");
            first_err = Some(err);
        }
        if let Err(err) = destroy_transport(&self.mux, &self.record.transport) {
            warn!(address = %self.record.transport.address, %err, "failed to destroy session transport");
            first_err.get_or_insert(err);
        }
        drop(self.child.take());

        debug!(kind = %self.record.kind, owner_pid = self.record.owner_pid, "session released");
        first_err.map_or(Ok(()), Err)
    }
}

impl<M: Multiplexer> Drop for SessionHandle<M> {
    fn drop(&mut self) {
        if let Err(err) = self.release_now() {
            warn!(%err, "session cleanup on drop failed");
        }
    }
}
