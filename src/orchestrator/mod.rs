//! Process orchestrator.
//!
//! Launches managed processes in configuration order, honouring each spec's
//! settle delay (and optional readiness probe) before starting the next, then
//! supervises the survivors until one exits. Nothing is restarted, and
//! managed processes are never signalled by the orchestrator.

pub mod launcher;
pub mod readiness;
pub mod supervisor;

use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{info, info_span, warn, Instrument};

use crate::models::process::{Liveness, ManagedProcessHandle, ManagedProcessSpec};
use crate::AppError;

use self::launcher::LaunchFailure;
use self::supervisor::{supervise, SupervisionOutcome};

/// Default interval between supervision passes.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(10);

/// Result of the launch phase.
#[derive(Debug, Default)]
pub struct LaunchReport {
    /// Processes running after their settle delay, in launch order.
    pub handles: Vec<ManagedProcessHandle>,
    /// Specs that did not produce a running process.
    pub failures: Vec<LaunchFailure>,
}

/// Launches and supervises a fixed list of managed processes.
#[derive(Debug, Clone)]
pub struct Orchestrator {
    specs: Vec<ManagedProcessSpec>,
    poll_interval: Duration,
}

impl Orchestrator {
    /// Orchestrator over `specs`, supervising every `poll_interval`.
    #[must_use]
    pub fn new(specs: Vec<ManagedProcessSpec>, poll_interval: Duration) -> Self {
        Self {
            specs,
            poll_interval,
        }
    }

    /// Launch every spec in order. A failed spawn skips its settle delay; a
    /// process gone by the end of its delay is reported as a failure and not
    /// supervised. Cancellation stops further launches.
    pub async fn launch_all(&self, cancel: &CancellationToken) -> LaunchReport {
        let mut report = LaunchReport::default();

        for spec in &self.specs {
            if cancel.is_cancelled() {
                info!("launch phase cancelled");
                break;
            }

            let mut handle = match launcher::spawn(spec) {
                Ok(handle) => handle,
                Err(error) => {
                    warn!(name = %spec.name, %error, "launch failed");
                    report.failures.push(LaunchFailure {
                        name: spec.name.clone(),
                        error,
                    });
                    continue;
                }
            };

            self.settle(&handle, cancel)
                .instrument(info_span!("settle", name = %spec.name, pid = handle.pid))
                .await;

            if handle.check_liveness() == Liveness::Exited {
                warn!(name = %spec.name, pid = handle.pid, "process exited during startup");
                report.failures.push(LaunchFailure {
                    name: spec.name.clone(),
                    error: AppError::Launch(format!(
                        "{} exited within {:?} of launch",
                        spec.name,
                        handle.uptime()
                    )),
                });
                continue;
            }
            report.handles.push(handle);
        }

        info!(
            launched = report.handles.len(),
            failed = report.failures.len(),
            "launch phase complete"
        );
        report
    }

    async fn settle(&self, handle: &ManagedProcessHandle, cancel: &CancellationToken) {
        let spec = &handle.spec;
        if !spec.settle.is_zero() {
            tokio::select! {
                () = cancel.cancelled() => return,
                () = tokio::time::sleep(spec.settle) => {}
            }
        }
        if let Some(probe) = spec.ready.as_ref() {
            tokio::select! {
                () = cancel.cancelled() => {}
                _ = readiness::wait_ready(&spec.name, probe) => {}
            }
        }
    }

    /// Supervise already-launched `handles`.
    pub async fn supervise(
        &self,
        handles: &mut [ManagedProcessHandle],
        cancel: &CancellationToken,
    ) -> SupervisionOutcome {
        supervise(handles, self.poll_interval, cancel).await
    }

    /// Launch every spec, then supervise until a process exits or `cancel`
    /// fires. Launch failures are returned alongside the outcome.
    pub async fn run(&self, cancel: &CancellationToken) -> (SupervisionOutcome, Vec<LaunchFailure>) {
        let LaunchReport {
            mut handles,
            failures,
        } = self.launch_all(cancel).await;

        let outcome = if cancel.is_cancelled() {
            SupervisionOutcome::Cancelled
        } else {
            self.supervise(&mut handles, cancel).await
        };
        (outcome, failures)
    }
}
