//! Process-table lookup by command-line pattern.
//!
//! Used by the lifecycle controller when a daemon left no PID file behind.

use std::process::Command;

use regex::Regex;

use crate::{AppError, Result};

const PS_FORMAT: &str = "pid=,command=";

/// Command line of the scan's own `ps` process.
const PS_COMMAND: &str = "ps -axo pid=,command=";

/// One row of the process table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessEntry {
    /// Process identifier.
    pub pid: u32,
    /// Full command line.
    pub command: String,
}

/// Parse `ps -axo pid=,command=` output.
///
/// Lines that do not start with a PID are skipped.
#[must_use]
pub fn parse_ps_output(output: &str) -> Vec<ProcessEntry> {
    output
        .lines()
        .filter_map(|line| {
            let trimmed = line.trim_start();
            let (pid, command) = trimmed
                .split_once(char::is_whitespace)
                .unwrap_or((trimmed, ""));
            let pid = pid.parse::<u32>().ok()?;
            Some(ProcessEntry {
                pid,
                command: command.trim().to_owned(),
            })
        })
        .collect()
}

/// Snapshot the process table.
///
/// # Errors
///
/// Returns `AppError::Io` if `ps` cannot be run or fails.
pub fn snapshot() -> Result<Vec<ProcessEntry>> {
    let output = Command::new("ps")
        .args(["-axo", PS_FORMAT])
        .output()
        .map_err(|err| AppError::Io(format!("failed to run ps: {err}")))?;

    if !output.status.success() {
        return Err(AppError::Io(format!("ps exited with {}", output.status)));
    }

    Ok(parse_ps_output(&String::from_utf8_lossy(&output.stdout)))
}

/// Rows of `entries` whose command line matches `pattern`.
///
/// PIDs in `excluded` and the `ps` scan itself never match.
#[must_use]
pub fn select_matching(
    entries: Vec<ProcessEntry>,
    pattern: &Regex,
    excluded: &[u32],
) -> Vec<ProcessEntry> {
    entries
        .into_iter()
        .filter(|entry| {
            !excluded.contains(&entry.pid)
                && !entry.command.starts_with(PS_COMMAND)
                && pattern.is_match(&entry.command)
        })
        .collect()
}

/// Processes whose command line matches `pattern`, excluding this process
/// and the shell or supervisor that started it.
///
/// # Errors
///
/// Returns `AppError::Io` if the process table cannot be read.
pub fn find_matching(pattern: &Regex) -> Result<Vec<ProcessEntry>> {
    let own_pid = std::process::id();
    let mut excluded = vec![own_pid];
    if let Ok(parent) = u32::try_from(nix::unistd::getppid().as_raw()) {
        excluded.push(parent);
    }
    Ok(select_matching(snapshot()?, pattern, &excluded))
}
