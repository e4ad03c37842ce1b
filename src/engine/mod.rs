//! External engines performing the actual dump and restore work.
//!
//! The orchestration in [backup](crate::backup) and [recovery](crate::recovery)
//! only talks to an [Engine]. [PgTools] implements it with the PostgreSQL
//! client tools (`pg_dump`, `psql`, `dropdb`, `createdb`).

pub mod postgres;

use std::io;
use std::path::Path;

use derive_more::{Display, Error, From};

pub use postgres::{PgTools, PgToolsConfig};

use crate::connection::ConnectionDescriptor;

/// Options of a dump.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DumpOptions {
    /// Emit statements dropping existing objects before recreating them.
    pub clean_before_restore: bool,
    /// Guard the drop statements with `IF EXISTS`.
    pub drop_if_exists: bool,
}

impl Default for DumpOptions {
    fn default() -> Self {
        Self {
            clean_before_restore: true,
            drop_if_exists: true,
        }
    }
}

/// Captured output of a successful engine invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EngineOutput {
    pub stdout: String,
    pub stderr: String,
}

/// Errors of an engine invocation.
#[derive(Debug, Display, Error, From)]
pub enum EngineError {
    /// The engine program isn't installed.
    #[display("{program} not found, please install the PostgreSQL client tools")]
    NotFound {
        #[error(ignore)]
        program: String,
    },
    /// The engine ran but reported failure.
    #[display("{program} exited with {}: {diagnostic}", exit_status(status))]
    NonZeroExit {
        program: String,
        status: Option<i32>,
        diagnostic: String,
    },
    /// Spawning or waiting for the engine failed.
    #[from]
    #[display("Running the engine failed: {_0}")]
    Io(io::Error),
}

fn exit_status(status: &Option<i32>) -> String {
    match status {
        Some(code) => format!("status {code}"),
        None => "a signal".to_string(),
    }
}

/// A pluggable dump/restore engine.
///
/// Every call blocks until the external work is complete.
pub trait Engine {
    /// Checks that the engine can be invoked at all.
    fn available(&self) -> Result<(), EngineError> {
        Ok(())
    }

    /// Writes a replayable dump of `source` to `destination`.
    fn dump(
        &self,
        source: &ConnectionDescriptor,
        destination: &Path,
        options: DumpOptions,
    ) -> Result<EngineOutput, EngineError>;

    /// Replays the statements of `dump` against `target`.
    fn restore(&self, target: &ConnectionDescriptor, dump: &Path)
        -> Result<EngineOutput, EngineError>;

    /// Drops the database of `target`. A missing database is not an error.
    fn drop_database(&self, target: &ConnectionDescriptor) -> Result<EngineOutput, EngineError>;

    /// Creates the empty database of `target`.
    fn create_database(&self, target: &ConnectionDescriptor)
        -> Result<EngineOutput, EngineError>;
}

impl<E: Engine + ?Sized> Engine for &E {
    fn available(&self) -> Result<(), EngineError> {
        (**self).available()
    }

    fn dump(
        &self,
        source: &ConnectionDescriptor,
        destination: &Path,
        options: DumpOptions,
    ) -> Result<EngineOutput, EngineError> {
        (**self).dump(source, destination, options)
    }

    fn restore(
        &self,
        target: &ConnectionDescriptor,
        dump: &Path,
    ) -> Result<EngineOutput, EngineError> {
        (**self).restore(target, dump)
    }

    fn drop_database(&self, target: &ConnectionDescriptor) -> Result<EngineOutput, EngineError> {
        (**self).drop_database(target)
    }

    fn create_database(
        &self,
        target: &ConnectionDescriptor,
    ) -> Result<EngineOutput, EngineError> {
        (**self).create_database(target)
    }
}
