//! Creation of database dumps and retention of old ones.
//!
//! [BackupExecutor] performs a single dump. [DatabaseBackup] ties an executor
//! to the connection settings and a retention sweep, and is what the
//! [Scheduler](crate::schedule::Scheduler) drives through the [Backup] trait.

pub mod record;

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use derive_more::{Display, Error, From};

pub use record::BackupRecord;

use crate::config::{CredentialsError, DatabaseSettings};
use crate::connection::ConnectionDescriptor;
use crate::engine::{DumpOptions, Engine, EngineError};
use crate::util::retention::{RetentionError, RetentionPolicy, Sweeper};
use crate::util::{Clock, SystemClock};

/// Generic backup task.
pub trait Backup {
    /// Error that may happen on backup or retention.
    type Error: std::fmt::Display;

    /// Creates a new backup.
    ///
    /// # Dry Run
    ///
    /// On a dry run (`dry_run=true`) no files are altered.
    /// This does include folders.
    ///
    /// Instead sanity checks are performed to determine if a "real" backup
    /// would succeed under the present conditions.
    fn backup(&self, dry_run: bool) -> Result<(), Self::Error>;

    /// Applies the [RetentionPolicy] to all backups created by the [Backup].
    fn retention(&self, policy: &RetentionPolicy, dry_run: bool) -> Result<(), Self::Error>;
}

#[derive(Debug, Display, Error, From)]
/// Errors of a backup cycle.
pub enum BackupError {
    /// Connection settings are missing or malformed.
    #[from]
    Credentials(CredentialsError),
    /// A backup with the same name exists already and is not overwritten.
    #[display("Backup file already exists: {}", _0.display())]
    DestinationExists(#[error(ignore)] PathBuf),
    /// The backup folder or file can't be accessed.
    #[display("Accessing {} failed: {source}", path.display())]
    Filesystem { path: PathBuf, source: io::Error },
    /// The dump engine is missing or failed.
    #[from]
    Engine(EngineError),
    /// Retention of old backups failed.
    #[from]
    Retention(RetentionError),
}

/// Dumps a database into a timestamped file of the backup folder.
#[derive(Debug, Clone)]
pub struct BackupExecutor<E, C = SystemClock> {
    engine: E,
    clock: C,
    backup_dir: PathBuf,
    extension: String,
    options: DumpOptions,
}

impl<E: Engine> BackupExecutor<E> {
    pub fn new(engine: E, backup_dir: impl Into<PathBuf>, extension: impl Into<String>) -> Self {
        Self {
            engine,
            clock: SystemClock,
            backup_dir: backup_dir.into(),
            extension: extension.into(),
            options: DumpOptions::default(),
        }
    }
}

impl<E: Engine, C: Clock> BackupExecutor<E, C> {
    /// Use `clock` for the timestamps of backup files.
    pub fn with_clock<C2: Clock>(self, clock: C2) -> BackupExecutor<E, C2> {
        BackupExecutor {
            engine: self.engine,
            clock,
            backup_dir: self.backup_dir,
            extension: self.extension,
            options: self.options,
        }
    }

    pub fn backup_dir(&self) -> &Path {
        &self.backup_dir
    }

    pub fn extension(&self) -> &str {
        &self.extension
    }

    fn destination(&self, database_name: &str) -> Result<PathBuf, BackupError> {
        if database_name.trim().is_empty() {
            return Err(CredentialsError::EmptyDatabaseName.into());
        }

        let timestamp = self.clock.now().naive_local();
        let path = self
            .backup_dir
            .join(record::file_name(database_name, &timestamp, &self.extension));

        match path.try_exists() {
            Ok(false) => Ok(path),
            Ok(true) => Err(BackupError::DestinationExists(path)),
            Err(source) => Err(BackupError::Filesystem { path, source }),
        }
    }

    /// Dumps `source` into a new file named after `database_name`.
    ///
    /// A file left behind by a failing engine is kept and reported.
    pub fn run_backup(
        &self,
        source: &ConnectionDescriptor,
        database_name: &str,
    ) -> Result<BackupRecord, BackupError> {
        fs::create_dir_all(&self.backup_dir).map_err(|source| BackupError::Filesystem {
            path: self.backup_dir.clone(),
            source,
        })?;

        let destination = self.destination(database_name)?;
        reserve(&destination)?;
        log::info!(target: "backup", "Create database dump of {source}");
        log::debug!(target: "backup", "Save database dump at: {}", destination.display());

        if let Err(e) = self.engine.dump(source, &destination, self.options) {
            match fs::metadata(&destination) {
                // nothing was written, drop the reservation
                Ok(metadata) if metadata.len() == 0 => {
                    if let Err(e) = fs::remove_file(&destination) {
                        log::warn!(target: "backup", "Removing {} failed: {e}", destination.display());
                    }
                }
                Ok(_) => log::warn!(
                    target: "backup",
                    "Incomplete dump left at {}",
                    destination.display()
                ),
                Err(_) => {}
            }
            return Err(e.into());
        }

        let metadata = fs::metadata(&destination).map_err(|source| BackupError::Filesystem {
            path: destination.clone(),
            source,
        })?;
        let record = BackupRecord::from_path(&destination, &self.extension, &metadata)
            .ok_or_else(|| BackupError::Filesystem {
                path: destination.clone(),
                source: io::Error::new(io::ErrorKind::InvalidData, "unexpected backup file name"),
            })?;

        log::info!(
            target: "backup",
            "Finished database dump: {} ({} bytes)",
            record.file_name(),
            record.size_bytes
        );

        Ok(record)
    }

    /// Checks what [run_backup](Self::run_backup) would do without doing it.
    ///
    /// Returns the file that would be written.
    pub fn plan_backup(&self, database_name: &str) -> Result<PathBuf, BackupError> {
        self.engine.available()?;
        let destination = self.destination(database_name)?;

        if !self.backup_dir.is_dir() {
            log::info!(target: "backup", "Would create backup folder {}", self.backup_dir.display());
        }
        log::info!(target: "backup", "Would save database dump at: {}", destination.display());

        Ok(destination)
    }
}

/// Creates `path` empty, failing if it exists already.
///
/// Two backups racing for the same name can't both get it.
fn reserve(path: &Path) -> Result<(), BackupError> {
    match fs::File::create_new(path) {
        Ok(_) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
            Err(BackupError::DestinationExists(path.to_path_buf()))
        }
        Err(source) => Err(BackupError::Filesystem {
            path: path.to_path_buf(),
            source,
        }),
    }
}

/// A [Backup] of the database described by the [DatabaseSettings].
///
/// The settings are resolved on every cycle, so missing credentials fail the
/// cycle instead of the whole process.
#[derive(Debug)]
pub struct DatabaseBackup<E, C = SystemClock> {
    executor: BackupExecutor<E, C>,
    settings: DatabaseSettings,
}

impl<E: Engine, C: Clock> DatabaseBackup<E, C> {
    pub fn new(executor: BackupExecutor<E, C>, settings: DatabaseSettings) -> Self {
        Self { executor, settings }
    }

    pub fn executor(&self) -> &BackupExecutor<E, C> {
        &self.executor
    }

    /// Creates one backup and returns its record.
    pub fn create(&self) -> Result<BackupRecord, BackupError> {
        let source = self.settings.resolve()?;
        self.executor.run_backup(&source, source.database())
    }
}

impl<E: Engine, C: Clock> Backup for DatabaseBackup<E, C> {
    type Error = BackupError;

    fn backup(&self, dry_run: bool) -> Result<(), Self::Error> {
        if dry_run {
            let source = self.settings.resolve()?;
            self.executor.plan_backup(source.database())?;
        } else {
            self.create()?;
        }
        Ok(())
    }

    fn retention(&self, policy: &RetentionPolicy, dry_run: bool) -> Result<(), Self::Error> {
        let database_name = self.settings.resolve()?.database().to_string();
        log::info!(
            target: "retention",
            "Removing backups of {database_name} older than {} day(s)",
            policy.max_age_days
        );

        let sweeper = Sweeper::new(
            self.executor.backup_dir(),
            database_name,
            self.executor.extension(),
            *policy,
        )
        .dry_run(dry_run);
        let removed = sweeper.sweep()?.count();

        log::info!(target: "retention", "Retention finished, {removed} backup(s) removed");
        Ok(())
    }
}
