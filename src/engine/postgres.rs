use std::path::{Path, PathBuf};
use std::process::Command;

use super::{DumpOptions, Engine, EngineError, EngineOutput};
use crate::connection::ConnectionDescriptor;

/// Program names of the PostgreSQL client tools.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct PgToolsConfig {
    pub pg_dump: String,
    pub psql: String,
    pub dropdb: String,
    pub createdb: String,
    /// Pass `--verbose` to `pg_dump`.
    pub verbose: bool,
}

impl Default for PgToolsConfig {
    fn default() -> Self {
        Self {
            pg_dump: "pg_dump".to_string(),
            psql: "psql".to_string(),
            dropdb: "dropdb".to_string(),
            createdb: "createdb".to_string(),
            verbose: false,
        }
    }
}

/// [Engine] backed by the PostgreSQL client tools.
///
/// Credentials are handed to the child processes only, either as part of the
/// connection string or via `PGPASSWORD` in the child's environment.
#[derive(Debug, Clone, Default)]
pub struct PgTools {
    config: PgToolsConfig,
    own_process_group: bool,
}

impl PgTools {
    pub fn new(config: PgToolsConfig) -> Self {
        Self {
            config,
            own_process_group: false,
        }
    }

    /// Runs the tools in their own process group, so an interrupt sent to the
    /// terminal doesn't kill an in-flight dump.
    pub fn in_own_process_group(mut self) -> Self {
        self.own_process_group = true;
        self
    }

    fn locate(program: &str) -> Result<PathBuf, EngineError> {
        which::which(program).map_err(|_| EngineError::NotFound {
            program: program.to_string(),
        })
    }

    fn command(&self, program: &str) -> Result<Command, EngineError> {
        let mut command = Command::new(Self::locate(program)?);

        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            if self.own_process_group {
                command.process_group(0);
            }
        }

        Ok(command)
    }

    /// Adds host, port and user options and the password to `command`.
    fn authenticate(command: &mut Command, target: &ConnectionDescriptor) {
        command
            .arg("--host")
            .arg(target.host())
            .arg("--port")
            .arg(target.port().to_string())
            .arg("--username")
            .arg(target.user())
            .arg("--no-password")
            .env("PGPASSWORD", target.password());
    }

    /// Level at which stderr of successful runs is relayed.
    ///
    /// `--verbose` makes `pg_dump` report its progress on stderr.
    fn stderr_level(&self) -> log::Level {
        if self.config.verbose {
            log::Level::Debug
        } else {
            log::Level::Warn
        }
    }

    fn execute(&self, program: &str, mut command: Command) -> Result<EngineOutput, EngineError> {
        // arguments and environment carry credentials
        log::trace!(target: "engine::postgres", "Running {}", command.get_program().to_string_lossy());

        let output = command.output()?;
        let stdout = String::from_utf8_lossy(&output.stdout).trim_end().to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).trim_end().to_string();

        if !output.status.success() {
            return Err(EngineError::NonZeroExit {
                program: program.to_string(),
                status: output.status.code(),
                diagnostic: stderr,
            });
        }

        // relay stderr
        if !stderr.is_empty() {
            log::log!(target: "engine::postgres", self.stderr_level(), "{program}: {stderr}");
        }

        Ok(EngineOutput { stdout, stderr })
    }
}

impl Engine for PgTools {
    fn available(&self) -> Result<(), EngineError> {
        Self::locate(&self.config.pg_dump).map(|_| ())
    }

    fn dump(
        &self,
        source: &ConnectionDescriptor,
        destination: &Path,
        options: DumpOptions,
    ) -> Result<EngineOutput, EngineError> {
        let program = &self.config.pg_dump;
        let mut command = self.command(program)?;
        command
            .arg(source.url())
            .arg("--file")
            .arg(destination)
            .arg("--no-password");
        if self.config.verbose {
            command.arg("--verbose");
        }
        if options.clean_before_restore {
            command.arg("--clean");
        }
        if options.drop_if_exists {
            command.arg("--if-exists");
        }

        self.execute(program, command)
    }

    fn restore(
        &self,
        target: &ConnectionDescriptor,
        dump: &Path,
    ) -> Result<EngineOutput, EngineError> {
        let program = &self.config.psql;
        let mut command = self.command(program)?;
        Self::authenticate(&mut command, target);
        command
            .arg("-X") // don't read psqlrc
            .arg("--quiet")
            .arg("--set")
            .arg("ON_ERROR_STOP=1")
            .arg("--dbname")
            .arg(target.database())
            .arg("--file")
            .arg(dump);

        self.execute(program, command)
    }

    fn drop_database(&self, target: &ConnectionDescriptor) -> Result<EngineOutput, EngineError> {
        let program = &self.config.dropdb;
        let mut command = self.command(program)?;
        Self::authenticate(&mut command, target);
        command.arg("--if-exists").arg(target.database());

        self.execute(program, command)
    }

    fn create_database(
        &self,
        target: &ConnectionDescriptor,
    ) -> Result<EngineOutput, EngineError> {
        let program = &self.config.createdb;
        let mut command = self.command(program)?;
        Self::authenticate(&mut command, target);
        command.arg(target.database());

        self.execute(program, command)
    }
}
