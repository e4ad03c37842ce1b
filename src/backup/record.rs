//! Naming convention of backup files: `{database}_{YYYYMMDD_HHMMSS}.{extension}`.
//!
//! The zero padded timestamp makes the names of one database sort
//! lexicographically in creation order.

use std::fs::Metadata;
use std::path::{Path, PathBuf};

use chrono::{NaiveDateTime, Timelike};

/// Timestamp format used in backup file names.
pub const TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";
const TIMESTAMP_LEN: usize = "YYYYMMDD_HHMMSS".len();

/// A backup file on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupRecord {
    pub database_name: String,
    pub timestamp: NaiveDateTime,
    pub file_path: PathBuf,
    pub size_bytes: u64,
}

impl BackupRecord {
    /// Builds the record of `path` if its name follows the naming convention.
    pub fn from_path(path: &Path, extension: &str, metadata: &Metadata) -> Option<Self> {
        let file_name = path.file_name()?.to_str()?;
        let (database_name, timestamp) = parse_file_name(file_name, extension)?;

        Some(Self {
            database_name: database_name.to_string(),
            timestamp,
            file_path: path.to_path_buf(),
            size_bytes: metadata.len(),
        })
    }

    pub fn file_name(&self) -> String {
        self.file_path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

/// File name of the backup of `database_name` taken at `timestamp`.
///
/// Sub-second precision is dropped.
pub fn file_name(database_name: &str, timestamp: &NaiveDateTime, extension: &str) -> String {
    let timestamp = timestamp.with_nanosecond(0).unwrap_or(*timestamp);
    format!(
        "{database_name}_{}.{extension}",
        timestamp.format(TIMESTAMP_FORMAT)
    )
}

/// Splits a backup file name into database name and timestamp.
pub fn parse_file_name<'a>(
    file_name: &'a str,
    extension: &str,
) -> Option<(&'a str, NaiveDateTime)> {
    let stem = file_name
        .strip_suffix(extension)?
        .strip_suffix('.')?;
    let split = stem.len().checked_sub(TIMESTAMP_LEN)?;
    if !stem.is_char_boundary(split) {
        return None;
    }

    let (database_name, timestamp) = stem.split_at(split);
    let database_name = database_name.strip_suffix('_')?;
    if database_name.is_empty() {
        return None;
    }

    let well_formed = timestamp.char_indices().all(|(i, c)| match i {
        8 => c == '_',
        _ => c.is_ascii_digit(),
    });
    if !well_formed {
        return None;
    }

    let timestamp = NaiveDateTime::parse_from_str(timestamp, TIMESTAMP_FORMAT).ok()?;
    Some((database_name, timestamp))
}

/// Timestamp of `file_name` if it is a backup of exactly `database_name`.
///
/// Backups of `app_v2` are not backups of `app`, although both names start
/// with `app_`.
pub fn backup_of(file_name: &str, database_name: &str, extension: &str) -> Option<NaiveDateTime> {
    parse_file_name(file_name, extension)
        .filter(|(name, _)| *name == database_name)
        .map(|(_, timestamp)| timestamp)
}
