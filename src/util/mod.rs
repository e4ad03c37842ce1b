//! Helpers shared by the backup, schedule and recovery paths.

pub mod clock;
pub mod retention;

pub use clock::{Clock, StopSignal, SystemClock};
