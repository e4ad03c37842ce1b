//! Restoring the database from a backup file.
//!
//! Recovery is destructive: the target database is dropped, recreated empty
//! and then filled from the dump. Nothing is touched until the user picked a
//! backup *and* explicitly confirmed, which is what [DestructiveConsent]
//! stands for.

pub mod prompt;

use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use derive_more::{Display, Error};

pub use prompt::TerminalPrompt;

use crate::backup::BackupRecord;
use crate::connection::ConnectionDescriptor;
use crate::engine::{Engine, EngineError};

/// Answer of a [Selector] prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Answer<T> {
    Chosen(T),
    Cancelled,
}

/// Asks the user to pick between options.
pub trait Selector {
    /// Presents the labelled `options` and returns the index of the chosen one.
    fn choose(&mut self, message: &str, options: &[String]) -> io::Result<Answer<usize>>;

    /// Asks a yes/no question.
    fn confirm(&mut self, message: &str) -> io::Result<Answer<bool>>;
}

/// Proof that the user agreed to replace the database.
///
/// Only obtainable from an affirmative answer.
#[derive(Debug)]
pub struct DestructiveConsent(());

impl DestructiveConsent {
    /// Converts the answer to a confirmation question into consent.
    pub fn from_answer(answer: Answer<bool>) -> Option<Self> {
        match answer {
            Answer::Chosen(true) => Some(Self(())),
            Answer::Chosen(false) | Answer::Cancelled => None,
        }
    }
}

/// Step of the recovery protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Drop,
    Create,
    Restore,
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Step::Drop => f.write_str("drop"),
            Step::Create => f.write_str("create"),
            Step::Restore => f.write_str("restore"),
        }
    }
}

#[derive(Debug, Display, Error)]
/// Errors on recovery.
pub enum RecoveryError {
    /// There is nothing to recover from.
    #[display("No backup files found in {}", _0.display())]
    NoBackupsFound(#[error(ignore)] PathBuf),
    /// The backup folder can't be listed.
    #[display("Listing the backup folder {} failed: {source}", path.display())]
    Filesystem { path: PathBuf, source: io::Error },
    /// Asking the user failed.
    #[display("Reading the answer failed: {_0}")]
    Prompt(io::Error),
    /// A protocol step failed, the following steps were skipped.
    #[display("The {step} step failed, database left as after the previous step: {source}")]
    StepFailed { step: Step, source: EngineError },
}

impl RecoveryError {
    /// The protocol step that failed, if any.
    pub fn step(&self) -> Option<Step> {
        match self {
            RecoveryError::StepFailed { step, .. } => Some(*step),
            _ => None,
        }
    }
}

/// Backup files in `backup_dir`, most recent first.
///
/// Only files following the backup naming convention are listed; backups of
/// every database are included.
pub fn list_candidates(
    backup_dir: &Path,
    extension: &str,
) -> Result<Vec<BackupRecord>, RecoveryError> {
    let listing = match fs::read_dir(backup_dir) {
        Ok(listing) => listing,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            return Err(RecoveryError::NoBackupsFound(backup_dir.to_path_buf()))
        }
        Err(source) => {
            return Err(RecoveryError::Filesystem {
                path: backup_dir.to_path_buf(),
                source,
            })
        }
    };

    let mut candidates: Vec<_> = listing
        .filter_map(|entry| {
            let entry = entry
                .inspect_err(|e| log::warn!(target: "recovery", "Skipping unreadable entry: {e}"))
                .ok()?;
            let metadata = entry.metadata().ok().filter(|m| m.is_file())?;
            BackupRecord::from_path(&entry.path(), extension, &metadata)
        })
        .collect();

    if candidates.is_empty() {
        return Err(RecoveryError::NoBackupsFound(backup_dir.to_path_buf()));
    }

    candidates.sort_by(|a, b| {
        b.timestamp
            .cmp(&a.timestamp)
            .then_with(|| b.file_path.cmp(&a.file_path))
    });
    Ok(candidates)
}

/// Label of a candidate in the selection list.
pub fn label(record: &BackupRecord) -> String {
    format!(
        "{} ({}) - {:.2}MB",
        record.file_name(),
        record.timestamp.format("%Y-%m-%d %H:%M:%S"),
        record.size_bytes as f64 / (1024.0 * 1024.0)
    )
}

/// Result of a [RecoverySession].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The database was replaced by the content of the backup.
    Restored(BackupRecord),
    /// The user backed out, nothing was changed.
    Cancelled,
}

/// Drops, recreates and restores a database.
#[derive(Debug, Clone)]
pub struct Recovery<E> {
    engine: E,
}

impl<E: Engine> Recovery<E> {
    pub fn new(engine: E) -> Self {
        Self { engine }
    }

    /// Replaces the database of `target` with the content of `dump`.
    ///
    /// Steps run in order and stop at the first failure. Completed steps are
    /// not undone: a failed restore leaves an empty database behind.
    pub fn recover(
        &self,
        target: &ConnectionDescriptor,
        dump: &Path,
        _consent: DestructiveConsent,
    ) -> Result<(), RecoveryError> {
        log::info!(target: "recovery", "Target database: {}", target.database());
        log::info!(target: "recovery", "Using backup file: {}", dump.display());

        log::info!(target: "recovery", "Dropping existing database...");
        self.engine
            .drop_database(target)
            .map_err(|source| RecoveryError::StepFailed { step: Step::Drop, source })?;

        log::info!(target: "recovery", "Creating new database...");
        self.engine
            .create_database(target)
            .map_err(|source| RecoveryError::StepFailed { step: Step::Create, source })?;

        log::info!(target: "recovery", "Restoring from backup...");
        self.engine
            .restore(target, dump)
            .map_err(|source| RecoveryError::StepFailed { step: Step::Restore, source })?;

        log::info!(target: "recovery", "Database recovery completed successfully");
        Ok(())
    }
}

/// One interactive recovery: list, select, confirm, recover.
pub struct RecoverySession<'a, E, S> {
    recovery: Recovery<E>,
    selector: &'a mut S,
    backup_dir: PathBuf,
    extension: String,
}

impl<'a, E: Engine, S: Selector> RecoverySession<'a, E, S> {
    pub fn new(
        engine: E,
        selector: &'a mut S,
        backup_dir: impl Into<PathBuf>,
        extension: impl Into<String>,
    ) -> Self {
        Self {
            recovery: Recovery::new(engine),
            selector,
            backup_dir: backup_dir.into(),
            extension: extension.into(),
        }
    }

    /// Runs the session against `target`.
    ///
    /// Cancelling the selection or declining the confirmation returns
    /// [Outcome::Cancelled] without touching the database.
    pub fn run(self, target: &ConnectionDescriptor) -> Result<Outcome, RecoveryError> {
        let mut candidates = list_candidates(&self.backup_dir, &self.extension)?;
        let labels: Vec<_> = candidates.iter().map(label).collect();

        let index = match self
            .selector
            .choose("Select a backup file to recover from", &labels)
            .map_err(RecoveryError::Prompt)?
        {
            Answer::Chosen(index) if index < candidates.len() => index,
            Answer::Chosen(index) => {
                log::warn!(target: "recovery", "Selection {index} is out of range");
                return Ok(Outcome::Cancelled);
            }
            Answer::Cancelled => return Ok(Outcome::Cancelled),
        };
        let chosen = candidates.swap_remove(index);
        log::debug!(target: "recovery", "Selected {}", chosen.file_path.display());

        let answer = self
            .selector
            .confirm(&format!(
                "This will REPLACE the database {}. Continue?",
                target.database()
            ))
            .map_err(RecoveryError::Prompt)?;
        let Some(consent) = DestructiveConsent::from_answer(answer) else {
            return Ok(Outcome::Cancelled);
        };

        self.recovery.recover(target, &chosen.file_path, consent)?;
        Ok(Outcome::Restored(chosen))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;

    use super::*;
    use crate::engine::fake::{Call, FakeEngine};

    /// Replays canned answers.
    #[derive(Default)]
    struct Script {
        choices: VecDeque<Answer<usize>>,
        confirmations: VecDeque<Answer<bool>>,
        offered: Vec<String>,
    }

    impl Selector for Script {
        fn choose(&mut self, _message: &str, options: &[String]) -> io::Result<Answer<usize>> {
            self.offered = options.to_vec();
            Ok(self.choices.pop_front().unwrap_or(Answer::Cancelled))
        }

        fn confirm(&mut self, _message: &str) -> io::Result<Answer<bool>> {
            Ok(self.confirmations.pop_front().unwrap_or(Answer::Cancelled))
        }
    }

    fn target() -> ConnectionDescriptor {
        ConnectionDescriptor::parse("postgresql://u:p@localhost:5432/db").unwrap()
    }

    fn backup_dir() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("db_20240101_000000.sql"), [0u8; 10]).unwrap();
        fs::write(dir.path().join("db_20240301_000000.sql"), [0u8; 20]).unwrap();
        fs::write(dir.path().join("README.txt"), "not a backup").unwrap();
        dir
    }

    fn consent() -> DestructiveConsent {
        DestructiveConsent::from_answer(Answer::Chosen(true)).unwrap()
    }

    #[test]
    fn candidates_are_most_recent_first() {
        let dir = backup_dir();

        let candidates = list_candidates(dir.path(), "sql").unwrap();

        let names: Vec<_> = candidates.iter().map(BackupRecord::file_name).collect();
        assert_eq!(names, ["db_20240301_000000.sql", "db_20240101_000000.sql"]);
        assert_eq!(candidates[0].size_bytes, 20);
        assert_eq!(candidates[1].size_bytes, 10);
    }

    #[test]
    fn candidates_of_all_databases_are_ordered_by_time() {
        let dir = backup_dir();
        fs::write(dir.path().join("app_20240201_000000.sql"), "").unwrap();

        let candidates = list_candidates(dir.path(), "sql").unwrap();

        let names: Vec<_> = candidates.iter().map(BackupRecord::file_name).collect();
        assert_eq!(
            names,
            [
                "db_20240301_000000.sql",
                "app_20240201_000000.sql",
                "db_20240101_000000.sql"
            ]
        );
    }

    #[test]
    fn missing_or_empty_folder_has_no_backups() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("README.txt"), "").unwrap();

        assert!(matches!(
            list_candidates(dir.path(), "sql"),
            Err(RecoveryError::NoBackupsFound(_))
        ));
        assert!(matches!(
            list_candidates(&dir.path().join("absent"), "sql"),
            Err(RecoveryError::NoBackupsFound(_))
        ));
    }

    #[test]
    fn labels_show_time_and_size() {
        let dir = backup_dir();
        let candidates = list_candidates(dir.path(), "sql").unwrap();

        assert_eq!(
            label(&candidates[0]),
            "db_20240301_000000.sql (2024-03-01 00:00:00) - 0.00MB"
        );
    }

    #[test]
    fn recover_runs_drop_create_restore_in_order() {
        let engine = FakeEngine::default();
        let dump = PathBuf::from("/backups/db_20240101_000000.sql");

        Recovery::new(&engine).recover(&target(), &dump, consent()).unwrap();

        assert_eq!(
            engine.calls(),
            [
                Call::Drop("db".to_string()),
                Call::Create("db".to_string()),
                Call::Restore("db".to_string(), dump)
            ]
        );
    }

    #[test]
    fn failed_restore_is_reported_as_restore_step() {
        let engine = FakeEngine::failing("restore", "syntax error at line 3");
        let dump = PathBuf::from("/backups/db_20240101_000000.sql");

        let err = Recovery::new(&engine)
            .recover(&target(), &dump, consent())
            .unwrap_err();

        assert_eq!(err.step(), Some(Step::Restore));
        // drop and create went through, the database exists but is empty
        assert_eq!(engine.calls().len(), 3);
        assert!(err.to_string().contains("syntax error at line 3"));
    }

    #[test]
    fn failed_drop_skips_remaining_steps() {
        let engine = FakeEngine::failing("drop", "permission denied");

        let err = Recovery::new(&engine)
            .recover(&target(), Path::new("dump.sql"), consent())
            .unwrap_err();

        assert_eq!(err.step(), Some(Step::Drop));
        assert_eq!(engine.calls(), [Call::Drop("db".to_string())]);
    }

    #[test]
    fn session_restores_selected_backup_after_confirmation() {
        let dir = backup_dir();
        let engine = FakeEngine::default();
        let mut script = Script {
            choices: VecDeque::from([Answer::Chosen(1)]),
            confirmations: VecDeque::from([Answer::Chosen(true)]),
            ..Script::default()
        };

        let outcome = RecoverySession::new(&engine, &mut script, dir.path(), "sql")
            .run(&target())
            .unwrap();

        let january = dir.path().join("db_20240101_000000.sql");
        match outcome {
            Outcome::Restored(record) => assert_eq!(record.file_path, january),
            Outcome::Cancelled => panic!("recovery should have run"),
        }
        assert_eq!(script.offered.len(), 2);
        assert!(script.offered[0].starts_with("db_20240301_000000.sql"));
        assert_eq!(engine.calls().last(), Some(&Call::Restore("db".to_string(), january)));
    }

    #[test]
    fn cancelled_selection_touches_nothing() {
        let dir = backup_dir();
        let engine = FakeEngine::default();
        let mut script = Script {
            choices: VecDeque::from([Answer::Cancelled]),
            confirmations: VecDeque::from([Answer::Chosen(true)]),
            ..Script::default()
        };

        let outcome = RecoverySession::new(&engine, &mut script, dir.path(), "sql")
            .run(&target())
            .unwrap();

        assert_eq!(outcome, Outcome::Cancelled);
        assert!(engine.calls().is_empty());
    }

    #[test]
    fn declined_or_cancelled_confirmation_touches_nothing() {
        for confirmation in [Answer::Chosen(false), Answer::Cancelled] {
            let dir = backup_dir();
            let engine = FakeEngine::default();
            let mut script = Script {
                choices: VecDeque::from([Answer::Chosen(0)]),
                confirmations: VecDeque::from([confirmation]),
                ..Script::default()
            };

            let outcome = RecoverySession::new(&engine, &mut script, dir.path(), "sql")
                .run(&target())
                .unwrap();

            assert_eq!(outcome, Outcome::Cancelled);
            assert!(engine.calls().is_empty());
        }
    }

    #[test]
    fn consent_requires_a_yes() {
        assert!(DestructiveConsent::from_answer(Answer::Chosen(false)).is_none());
        assert!(DestructiveConsent::from_answer(Answer::Cancelled).is_none());
        assert!(DestructiveConsent::from_answer(Answer::Chosen(true)).is_some());
    }
}
