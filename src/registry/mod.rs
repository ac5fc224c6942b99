//! Session registry: discoverable metadata for live injectable sessions.
//!
//! Each session manager publishes one JSON record at
//! `<dir>/<kind>-<owner_pid>.json`. Records are written to a temporary file
//! and atomically renamed into place, so readers never see a partial record.
//! Mutation of a kind's records (reclaim, create, prune) happens under an
//! exclusive lock on `<dir>/<kind>.lock`.

use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use fs2::FileExt;
use tempfile::NamedTempFile;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::models::is_valid_kind;
use crate::models::session::SessionRecord;
use crate::process::is_alive;
use crate::{AppError, Result};

/// Interval between attempts to take a contended kind lock.
pub const LOCK_RETRY: Duration = Duration::from_millis(50);

/// Exclusive lock over one session kind's registry entries.
///
/// Released when dropped.
#[derive(Debug)]
pub struct KindLock {
    file: File,
    kind: String,
}

impl KindLock {
    /// Kind this lock covers.
    #[must_use]
    pub fn kind(&self) -> &str {
        &self.kind
    }
}

impl Drop for KindLock {
    fn drop(&mut self) {
        if let Err(err) = FileExt::unlock(&self.file) {
            warn!(kind = %self.kind, %err, "failed to release registry lock");
        }
    }
}

/// Handle on the registry directory shared by all session managers.
#[derive(Debug, Clone)]
pub struct SessionRegistry {
    dir: PathBuf,
}

impl SessionRegistry {
    /// Open (creating if needed) the registry at `dir`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Registry` if the directory cannot be created.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|err| {
            AppError::Registry(format!(
                "failed to create registry directory {}: {err}",
                dir.display()
            ))
        })?;
        Ok(Self { dir })
    }

    /// Registry directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the record owned by `owner_pid` for `kind`.
    #[must_use]
    pub fn record_path(&self, kind: &str, owner_pid: u32) -> PathBuf {
        self.dir
            .join(format!("{}.json", SessionRecord::transport_key(kind, owner_pid)))
    }

    /// Take the exclusive lock for `kind` if nobody else holds it.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Registry` if the kind is invalid or the lock file
    /// cannot be opened or locked.
    pub fn try_lock_kind(&self, kind: &str) -> Result<Option<KindLock>> {
        ensure_kind(kind)?;
        let path = self.dir.join(format!("{kind}.lock"));
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)
            .map_err(|err| {
                AppError::Registry(format!("failed to open lock {}: {err}", path.display()))
            })?;
        match FileExt::try_lock_exclusive(&file) {
            Ok(()) => {}
            Err(err) if err.raw_os_error() == fs2::lock_contended_error().raw_os_error() => {
                return Ok(None);
            }
            Err(err) => {
                return Err(AppError::Registry(format!(
                    "failed to lock {}: {err}",
                    path.display()
                )));
            }
        }
        debug!(kind, "registry lock acquired");
        Ok(Some(KindLock {
            file,
            kind: kind.to_owned(),
        }))
    }

    /// Take the exclusive lock for `kind`, waiting as long as it takes.
    ///
    /// # Errors
    ///
    /// See [`SessionRegistry::try_lock_kind`].
    pub async fn lock_kind(&self, kind: &str) -> Result<KindLock> {
        loop {
            if let Some(lock) = self.try_lock_kind(kind)? {
                return Ok(lock);
            }
            tokio::time::sleep(LOCK_RETRY).await;
        }
    }

    /// Take the exclusive lock for `kind`, giving up after `timeout`.
    ///
    /// Returns `Ok(None)` if another holder kept the lock past `timeout`.
    ///
    /// # Errors
    ///
    /// See [`SessionRegistry::try_lock_kind`].
    pub async fn lock_kind_within(&self, kind: &str, timeout: Duration) -> Result<Option<KindLock>> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(lock) = self.try_lock_kind(kind)? {
                return Ok(Some(lock));
            }
            let now = Instant::now();
            if now >= deadline {
                debug!(kind, ?timeout, "registry lock still held, giving up");
                return Ok(None);
            }
            tokio::time::sleep(LOCK_RETRY.min(deadline - now)).await;
        }
    }

    /// Record currently published under `kind` and `owner_pid`, if any.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Registry` if the file exists but is unreadable or
    /// malformed.
    pub fn published(&self, kind: &str, owner_pid: u32) -> Result<Option<SessionRecord>> {
        let path = self.record_path(kind, owner_pid);
        if !path.exists() {
            return Ok(None);
        }
        Self::read(&path).map(Some)
    }

    /// Publish `record`, replacing any previous record with the same key.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Registry` on serialization or write failure.
    pub fn write(&self, record: &SessionRecord) -> Result<PathBuf> {
        ensure_kind(&record.kind)?;
        let path = self.record_path(&record.kind, record.owner_pid);
        let body = serde_json::to_vec_pretty(record)?;

        let mut tmp = NamedTempFile::new_in(&self.dir)
            .map_err(|err| AppError::Registry(format!("failed to create temporary record: {err}")))?;
        tmp.write_all(&body)
            .map_err(|err| AppError::Registry(format!("failed to write temporary record: {err}")))?;
        tmp.persist(&path).map_err(|err| {
            AppError::Registry(format!("failed to persist record {}: {err}", path.display()))
        })?;

        debug!(kind = %record.kind, owner_pid = record.owner_pid, path = %path.display(), "session record published");
        Ok(path)
    }

    /// Read the record at `path`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Registry` if the file is unreadable or malformed.
    pub fn read(path: &Path) -> Result<SessionRecord> {
        let raw = fs::read(path).map_err(|err| {
            AppError::Registry(format!("failed to read record {}: {err}", path.display()))
        })?;
        Ok(serde_json::from_slice(&raw)?)
    }

    /// All records of `kind`, oldest first. Malformed files are skipped.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Registry` if the directory cannot be scanned.
    pub fn list_kind(&self, kind: &str) -> Result<Vec<SessionRecord>> {
        ensure_kind(kind)?;
        let mut records: Vec<SessionRecord> = self
            .scan(&format!("{kind}-*.json"))?
            .into_iter()
            .filter(|record| record.kind == kind)
            .collect();
        records.sort_by_key(|record| record.created_at);
        Ok(records)
    }

    /// Every record in the registry, oldest first.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Registry` if the directory cannot be scanned.
    pub fn list_all(&self) -> Result<Vec<SessionRecord>> {
        let mut records = self.scan("*.json")?;
        records.sort_by_key(|record| record.created_at);
        Ok(records)
    }

    /// Delete `record`. Returns `Ok(false)` if it was already gone.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Registry` if the file exists but cannot be removed.
    pub fn remove(&self, record: &SessionRecord) -> Result<bool> {
        let path = self.record_path(&record.kind, record.owner_pid);
        match fs::remove_file(&path) {
            Ok(()) => {
                debug!(kind = %record.kind, owner_pid = record.owner_pid, "session record removed");
                Ok(true)
            }
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(false),
            Err(err) => Err(AppError::Registry(format!(
                "failed to remove record {}: {err}",
                path.display()
            ))),
        }
    }

    /// The live record of the kind `lock` covers, if any.
    ///
    /// Records whose owner is gone are stale and are pruned here. When
    /// several owners are alive (only possible if a manager bypassed the
    /// lock) the newest wins.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Registry` on scan or removal failure.
    pub fn find_live(&self, lock: &KindLock) -> Result<Option<SessionRecord>> {
        let kind = lock.kind();
        let mut live = None;
        for record in self.list_kind(kind)? {
            if is_alive(record.owner_pid) {
                live = Some(record);
            } else {
                warn!(kind, owner_pid = record.owner_pid, "pruning stale session record");
                self.remove(&record)?;
            }
        }
        Ok(live)
    }

    fn scan(&self, pattern: &str) -> Result<Vec<SessionRecord>> {
        let dir = self.dir.to_str().ok_or_else(|| {
            AppError::Registry(format!("registry path is not utf-8: {}", self.dir.display()))
        })?;
        let full = format!("{}/{pattern}", glob::Pattern::escape(dir));
        let paths = glob::glob(&full)
            .map_err(|err| AppError::Registry(format!("invalid registry pattern: {err}")))?;

        let mut records = Vec::new();
        for entry in paths {
            let path = match entry {
                Ok(path) => path,
                Err(err) => {
                    warn!(%err, "unreadable registry entry");
                    continue;
                }
            };
            match Self::read(&path) {
                Ok(record) => records.push(record),
                Err(err) => warn!(path = %path.display(), %err, "skipping malformed session record"),
            }
        }
        Ok(records)
    }
}

fn ensure_kind(kind: &str) -> Result<()> {
    if is_valid_kind(kind) {
        Ok(())
    } else {
        Err(AppError::Registry(format!("invalid session kind '{kind}'")))
    }
}
