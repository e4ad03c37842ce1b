use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use derive_more::{Display, Error};

use crate::backup::record::backup_of;

const SECS_PER_DAY: u64 = 24 * 60 * 60;

/// Configure retention of backup files.
#[derive(Copy, Clone, Debug, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
pub struct RetentionPolicy {
    /// Backups whose last modification is older than this many days are deleted.
    ///
    /// With `0` every backup of the database is deleted.
    pub max_age_days: u32,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self { max_age_days: 7 }
    }
}

impl RetentionPolicy {
    pub fn new(max_age_days: u32) -> Self {
        Self { max_age_days }
    }

    pub fn max_age(&self) -> Duration {
        Duration::from_secs(u64::from(self.max_age_days) * SECS_PER_DAY)
    }

    /// Files last modified before the returned time are expired at `now`.
    pub fn cutoff(&self, now: SystemTime) -> SystemTime {
        now.checked_sub(self.max_age())
            .unwrap_or(SystemTime::UNIX_EPOCH)
    }
}

#[derive(Debug, Display, Error)]
/// Errors on applying a [RetentionPolicy].
pub enum RetentionError {
    /// The backup folder can't be listed.
    #[display("Listing the backup folder {} failed: {source}", path.display())]
    Listing { path: PathBuf, source: io::Error },
}

/// A backup file removed (or, on a dry run, due for removal) by a [Sweep].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeletedBackup {
    pub path: PathBuf,
    pub modified: SystemTime,
}

/// Deletes expired backups of one database from the backup folder.
///
/// Files of other databases in the same folder are never touched, even when
/// their name shares a prefix with the database name.
#[derive(Debug, Clone)]
pub struct Sweeper {
    backup_dir: PathBuf,
    database_name: String,
    extension: String,
    policy: RetentionPolicy,
    dry_run: bool,
}

impl Sweeper {
    pub fn new(
        backup_dir: impl Into<PathBuf>,
        database_name: impl Into<String>,
        extension: impl Into<String>,
        policy: RetentionPolicy,
    ) -> Self {
        Self {
            backup_dir: backup_dir.into(),
            database_name: database_name.into(),
            extension: extension.into(),
            policy,
            dry_run: false,
        }
    }

    /// Only report expired files, keep them on disk.
    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn policy(&self) -> RetentionPolicy {
        self.policy
    }

    /// Starts a sweep relative to the current time.
    pub fn sweep(&self) -> Result<Sweep, RetentionError> {
        self.sweep_at(SystemTime::now())
    }

    /// Starts a sweep relative to `now`.
    ///
    /// The folder is listed immediately; files are deleted one at a time, in
    /// the order of their names, while the returned [Sweep] is iterated.
    pub fn sweep_at(&self, now: SystemTime) -> Result<Sweep, RetentionError> {
        let cutoff = self.policy.cutoff(now);
        let listing = fs::read_dir(&self.backup_dir).map_err(|source| RetentionError::Listing {
            path: self.backup_dir.clone(),
            source,
        })?;

        let mut expired = Vec::new();
        for entry in listing {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    log::warn!(target: "retention", "Skipping unreadable entry in {}: {e}", self.backup_dir.display());
                    continue;
                }
            };

            let file_name = entry.file_name();
            let Some(file_name) = file_name.to_str() else {
                continue;
            };
            if backup_of(file_name, &self.database_name, &self.extension).is_none() {
                continue;
            }

            let path = entry.path();
            let modified = match entry.metadata().and_then(|m| {
                if m.is_file() {
                    m.modified().map(Some)
                } else {
                    Ok(None)
                }
            }) {
                Ok(Some(modified)) => modified,
                Ok(None) => continue,
                Err(e) => {
                    log::warn!(target: "retention", "Skipping {}: {e}", path.display());
                    continue;
                }
            };

            if modified < cutoff {
                expired.push(DeletedBackup { path, modified });
            }
        }
        expired.sort_by(|a, b| a.path.cmp(&b.path));

        log::debug!(
            target: "retention",
            "{} backup(s) of {} older than {} day(s)",
            expired.len(),
            self.database_name,
            self.policy.max_age_days
        );

        Ok(Sweep {
            expired: expired.into_iter(),
            dry_run: self.dry_run,
        })
    }
}

/// Lazily deletes the expired backups found by [Sweeper::sweep].
///
/// Yields every successfully deleted file. A file that can't be deleted is
/// logged and skipped.
#[derive(Debug)]
pub struct Sweep {
    expired: std::vec::IntoIter<DeletedBackup>,
    dry_run: bool,
}

impl Iterator for Sweep {
    type Item = DeletedBackup;

    fn next(&mut self) -> Option<Self::Item> {
        for backup in self.expired.by_ref() {
            if self.dry_run {
                log::info!(target: "retention", "Would remove old backup: {}", backup.path.display());
                return Some(backup);
            }

            match fs::remove_file(&backup.path) {
                Ok(()) => {
                    log::info!(target: "retention", "Removed old backup: {}", backup.path.display());
                    return Some(backup);
                }
                // already gone, nothing left to do
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => {
                    log::error!(target: "retention", "Removing {} failed: {e}", backup.path.display());
                }
            }
        }
        None
    }
}
