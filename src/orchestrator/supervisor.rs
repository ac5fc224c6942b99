//! Supervision loop: reports the first managed process to exit.

use std::fmt::{Display, Formatter};
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::models::process::{Liveness, ManagedProcessHandle};

/// Names the managed process whose exit ended supervision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExitReport {
    /// Spec name.
    pub name: String,
    /// Process identifier.
    pub pid: u32,
    /// Time between launch and detection.
    pub uptime: Duration,
}

impl Display for ExitReport {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} exited", self.name)
    }
}

/// How supervision ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SupervisionOutcome {
    /// A managed process exited; the others were left running.
    Exited(ExitReport),
    /// Shutdown was requested; managed processes keep running.
    Cancelled,
    /// No process was launched successfully.
    NothingToSupervise,
}

impl Display for SupervisionOutcome {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Exited(report) => report.fmt(f),
            Self::Cancelled => f.write_str("supervision cancelled"),
            Self::NothingToSupervise => f.write_str("no managed process is running"),
        }
    }
}

/// Poll `handles` in launch order every `interval` until one has exited or
/// `cancel` fires.
pub async fn supervise(
    handles: &mut [ManagedProcessHandle],
    interval: Duration,
    cancel: &CancellationToken,
) -> SupervisionOutcome {
    if handles.is_empty() {
        return SupervisionOutcome::NothingToSupervise;
    }
    info!(processes = handles.len(), ?interval, "supervising managed processes");

    loop {
        tokio::select! {
            () = cancel.cancelled() => {
                info!("supervision cancelled, managed processes keep running");
                return SupervisionOutcome::Cancelled;
            }
            () = tokio::time::sleep(interval) => {}
        }

        if let Some(report) = first_exited(handles) {
            info!(name = %report.name, pid = report.pid, uptime = ?report.uptime, "managed process exited");
            return SupervisionOutcome::Exited(report);
        }
    }
}

fn first_exited(handles: &mut [ManagedProcessHandle]) -> Option<ExitReport> {
    for handle in handles.iter_mut() {
        let liveness = handle.check_liveness();
        debug!(name = %handle.spec.name, pid = handle.pid, ?liveness, "liveness checked");
        if liveness == Liveness::Exited {
            return Some(ExitReport {
                name: handle.spec.name.clone(),
                pid: handle.pid,
                uptime: handle.uptime(),
            });
        }
    }
    None
}
