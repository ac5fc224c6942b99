//! Plain-text PID files.

use std::fs;
use std::io::{ErrorKind, Write};
use std::path::Path;

use tempfile::NamedTempFile;

use crate::{AppError, Result};

/// Read the PID stored at `path`. Returns `Ok(None)` if there is no file.
///
/// # Errors
///
/// Returns `AppError::Io` if the file is unreadable or does not hold a
/// positive integer.
pub fn read_pid_file(path: &Path) -> Result<Option<u32>> {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
        Err(err) => {
            return Err(AppError::Io(format!(
                "failed to read pid file {}: {err}",
                path.display()
            )))
        }
    };

    match raw.trim().parse::<u32>() {
        Ok(pid) if pid > 0 => Ok(Some(pid)),
        _ => Err(AppError::Io(format!(
            "pid file {} does not contain a pid: {:?}",
            path.display(),
            raw.trim()
        ))),
    }
}

/// Atomically write `pid` to `path`, creating parent directories.
///
/// # Errors
///
/// Returns `AppError::Io` on any file-system failure.
pub fn write_pid_file(path: &Path, pid: u32) -> Result<()> {
    let parent = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent).map_err(|err| {
        AppError::Io(format!(
            "failed to create pid file directory {}: {err}",
            parent.display()
        ))
    })?;

    let mut tmp = NamedTempFile::new_in(parent)
        .map_err(|err| AppError::Io(format!("failed to create temporary pid file: {err}")))?;
    writeln!(tmp, "{pid}")
        .map_err(|err| AppError::Io(format!("failed to write temporary pid file: {err}")))?;
    tmp.persist(path).map_err(|err| {
        AppError::Io(format!("failed to persist pid file {}: {err}", path.display()))
    })?;
    Ok(())
}

/// Delete the PID file at `path`. Returns `Ok(false)` if it did not exist.
///
/// # Errors
///
/// Returns `AppError::Io` if the file exists but cannot be removed.
pub fn remove_pid_file(path: &Path) -> Result<bool> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(false),
        Err(err) => Err(AppError::Io(format!(
            "failed to remove pid file {}: {err}",
            path.display()
        ))),
    }
}
