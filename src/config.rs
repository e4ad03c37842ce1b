//! Configuration of the tool.
//!
//! Long living settings are read from a TOML file ([Config]), while the
//! connection is taken from the environment or the command line
//! ([DatabaseSettings]).

use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use derive_more::{Display, Error, From};

use crate::connection::{ConnectionDescriptor, ParseError};
use crate::engine::PgToolsConfig;

/// Environment variable holding the connection URL.
pub const DATABASE_URL_VAR: &str = "DATABASE_URL";
/// Environment variable holding the name of the database to back up.
pub const DATABASE_NAME_VAR: &str = "DATABASE_NAME";

const DEFAULT_BACKUP_DIR: &str = "backup";
const DEFAULT_EXTENSION: &str = "sql";

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
/// Content of the configuration file.
pub struct Config {
    /// Folder holding the dump files.
    ///
    /// Relative paths are resolved against the folder of the executable.
    pub backup_dir: PathBuf,

    /// Extension of the dump files.
    pub extension: String,

    /// Programs used to dump and restore.
    pub engine: PgToolsConfig,

    /// Cadence of scheduled backups and retention.
    pub schedule: ScheduleConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            backup_dir: PathBuf::from(DEFAULT_BACKUP_DIR),
            extension: DEFAULT_EXTENSION.to_string(),
            engine: PgToolsConfig::default(),
            schedule: ScheduleConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
/// Cadence of the [Scheduler](crate::schedule::Scheduler).
pub struct ScheduleConfig {
    /// Hours between two backups. At least 1.
    pub interval_hours: u32,

    /// Days a backup is kept before the daily sweep deletes it.
    pub retention_days: u32,

    /// Seconds between two checks for due work.
    pub poll_seconds: u64,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            interval_hours: 1,
            retention_days: 7,
            poll_seconds: 60,
        }
    }
}

impl ScheduleConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.interval_hours < 1 {
            return Err(ConfigError::InvalidSchedule("interval must be at least one hour"));
        }
        if self.poll_seconds < 1 {
            return Err(ConfigError::InvalidSchedule("poll interval must be at least one second"));
        }
        Ok(())
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(u64::from(self.interval_hours) * 60 * 60)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_seconds)
    }
}

#[derive(Debug, Display, Error, From)]
/// Errors of the configuration. They are fatal before any work starts.
pub enum ConfigError {
    /// Reading the configuration file failed.
    #[display("Reading the config file failed: {_0}")]
    #[from]
    Read(io::Error),
    /// The configuration file isn't valid TOML or has unknown values.
    #[display("Parsing the config file failed: {_0}")]
    #[from]
    Parse(toml::de::Error),
    /// Schedule values out of range.
    #[display("Invalid schedule: {_0}")]
    InvalidSchedule(#[error(ignore)] &'static str),
    /// Connection settings are missing or malformed.
    #[display("{_0}")]
    #[from]
    Credentials(CredentialsError),
}

impl Config {
    /// Reads the configuration at `path`.
    ///
    /// A missing file is created with the default configuration.
    pub fn load_or_init(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::read_to_string(path) {
            Ok(config_str) => {
                let config: Config = toml::from_str(&config_str)?;
                config.schedule.validate()?;
                Ok(config)
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                log::debug!(
                    target: "config",
                    "Writing default config to {} because it doesn't exist yet",
                    path.display()
                );
                let default_config = Config::default();
                match toml::to_string_pretty(&default_config) {
                    Ok(config_str) => {
                        if let Err(e) = std::fs::write(path, config_str) {
                            log::warn!(
                                target: "config",
                                "Writing default config to {} failed {e}",
                                path.display(),
                            );
                        }
                    }
                    Err(e) => log::warn!(target: "config", "Serializing default config failed: {e}"),
                }

                Ok(default_config)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// The backup folder with relative paths resolved against the folder
    /// of the executable (or the working directory if that is unknown).
    pub fn backup_dir(&self) -> PathBuf {
        if self.backup_dir.is_absolute() {
            return self.backup_dir.clone();
        }

        let base = std::env::current_exe()
            .ok()
            .and_then(|exe| exe.parent().map(Path::to_path_buf));
        match base {
            Some(base) => base.join(&self.backup_dir),
            None => {
                log::warn!(target: "config", "backup_dir is relative: {}", self.backup_dir.display());
                self.backup_dir.clone()
            }
        }
    }
}

#[derive(Debug, Display, Error, Clone, PartialEq, Eq)]
/// Problems with the connection settings.
pub enum CredentialsError {
    /// A required variable isn't set.
    #[display("{_0} is not set, put it into the environment or a .env file")]
    MissingCredentials(#[error(ignore)] &'static str),
    /// The connection URL is malformed.
    #[display("DATABASE_URL is invalid: {_0}")]
    InvalidConnection(ParseError),
    /// The database name is empty.
    #[display("DATABASE_NAME must not be empty")]
    EmptyDatabaseName,
}

/// Connection settings as found in the environment.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct DatabaseSettings {
    /// Connection URL (`DATABASE_URL`).
    pub url: Option<String>,
    /// Name of the database (`DATABASE_NAME`), defaults to the database of the URL.
    pub name: Option<String>,
}

impl std::fmt::Debug for DatabaseSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatabaseSettings")
            .field("url", &self.url.as_ref().map(|_| "***"))
            .field("name", &self.name)
            .finish()
    }
}

impl DatabaseSettings {
    /// Parses the URL and retargets it at the configured database name.
    pub fn resolve(&self) -> Result<ConnectionDescriptor, CredentialsError> {
        let url = self
            .url
            .as_deref()
            .filter(|url| !url.trim().is_empty())
            .ok_or(CredentialsError::MissingCredentials(DATABASE_URL_VAR))?;
        let descriptor =
            ConnectionDescriptor::parse(url).map_err(CredentialsError::InvalidConnection)?;

        match self.name.as_deref().map(str::trim) {
            None => Ok(descriptor),
            Some("") => Err(CredentialsError::EmptyDatabaseName),
            Some(name) => Ok(descriptor.with_database(name)),
        }
    }
}
