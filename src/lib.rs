//! Library to back up a [PostgreSQL][pg] database and restore it again.
//!
//! Backups are plain SQL dumps named `{database}_{YYYYMMDD_HHMMSS}.sql`.
//! The [`schedule`] module creates them periodically and removes old ones
//! with [`util::retention`], while [`recovery`] replaces the database with
//! the content of a chosen backup.
//!
//! [pg]: https://www.postgresql.org/

#![forbid(unsafe_code)]

pub mod backup;
pub mod cli;
pub mod config;
pub mod connection;
pub mod engine;
pub mod recovery;
pub mod schedule;
pub mod util;
