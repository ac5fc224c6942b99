//! Managed process launcher.
//!
//! Each process is started in its own process group with stdin detached, so
//! an interrupt delivered to the orchestrator's terminal never reaches it and
//! it keeps running after the orchestrator exits.

use std::fmt::{Display, Formatter};
use std::fs::{self, OpenOptions};
use std::process::Stdio;

use tokio::process::Command;
use tracing::{info, info_span, warn};

use crate::lifecycle::pid_file::write_pid_file;
use crate::models::process::{ManagedProcessHandle, ManagedProcessSpec};
use crate::{AppError, Result};

/// A spec that did not produce a supervised process.
#[derive(Debug)]
pub struct LaunchFailure {
    /// Spec name.
    pub name: String,
    /// Underlying error, always `AppError::Launch`.
    pub error: AppError,
}

impl Display for LaunchFailure {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} failed to launch ({})", self.name, self.error)
    }
}

fn stdio_for(spec: &ManagedProcessSpec) -> Result<(Stdio, Stdio)> {
    let Some(path) = spec.log_file.as_deref() else {
        return Ok((Stdio::inherit(), Stdio::inherit()));
    };
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|err| {
            AppError::Launch(format!(
                "{}: failed to create log directory {}: {err}",
                spec.name,
                parent.display()
            ))
        })?;
    }
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|err| {
            AppError::Launch(format!(
                "{}: failed to open log file {}: {err}",
                spec.name,
                path.display()
            ))
        })?;
    let stderr = file.try_clone().map_err(|err| {
        AppError::Launch(format!("{}: failed to share log file: {err}", spec.name))
    })?;
    Ok((Stdio::from(file), Stdio::from(stderr)))
}

/// Start the process described by `spec`.
///
/// # Errors
///
/// Returns `AppError::Launch` if the command is empty, the log file cannot be
/// opened, or the program cannot be spawned.
pub fn spawn(spec: &ManagedProcessSpec) -> Result<ManagedProcessHandle> {
    let span = info_span!("launch", name = %spec.name);
    let _guard = span.enter();

    let (program, args) = spec
        .command
        .split_first()
        .ok_or_else(|| AppError::Launch(format!("{}: empty command", spec.name)))?;
    let (stdout, stderr) = stdio_for(spec)?;

    let child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(stdout)
        .stderr(stderr)
        .process_group(0)
        .kill_on_drop(false)
        .spawn()
        .map_err(|err| AppError::Launch(format!("{}: failed to spawn {program}: {err}", spec.name)))?;

    let pid = child
        .id()
        .ok_or_else(|| AppError::Launch(format!("{}: exited before reporting a pid", spec.name)))?;

    if let Some(path) = spec.pid_file.as_deref() {
        if let Err(err) = write_pid_file(path, pid) {
            warn!(pid, %err, "failed to record pid file");
        }
    }

    info!(pid, program = %program, "process launched");
    Ok(ManagedProcessHandle::from_child(pid, spec.clone(), child))
}
