//! Periodic execution of backups and retention.
//!
//! A single control loop polls two triggers: a backup every
//! [`interval_hours`](ScheduleConfig::interval_hours), starting immediately,
//! and a retention sweep every day at 00:00 local time. Due cycles run one
//! after another; the loop only checks for a stop request between cycles, so
//! an in-flight dump or sweep always completes.

use std::fmt;

use chrono::{DateTime, Local, NaiveDateTime, NaiveTime, TimeDelta};

use crate::backup::Backup;
use crate::config::ScheduleConfig;
use crate::util::retention::RetentionPolicy;
use crate::util::{Clock, StopSignal, SystemClock};

/// Kind of work the [Scheduler] performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cycle {
    Backup,
    Retention,
}

impl fmt::Display for Cycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cycle::Backup => f.write_str("backup"),
            Cycle::Retention => f.write_str("retention"),
        }
    }
}

/// What the [Scheduler] is doing right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum State {
    #[default]
    Idle,
    Running(Cycle),
}

/// Counts of the cycles a [Scheduler::run] performed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Summary {
    pub backups: usize,
    pub failed_backups: usize,
    pub sweeps: usize,
    pub failed_sweeps: usize,
}

/// Drives a [Backup] until stopped.
pub struct Scheduler<B, C = SystemClock> {
    task: B,
    clock: C,
    config: ScheduleConfig,
    dry_run: bool,
    stop: StopSignal,
    state: State,
}

impl<B: Backup> Scheduler<B> {
    pub fn new(task: B, config: ScheduleConfig) -> Self {
        Self::with_clock(task, config, SystemClock)
    }
}

impl<B: Backup, C: Clock> Scheduler<B, C> {
    pub fn with_clock(task: B, config: ScheduleConfig, clock: C) -> Self {
        Self {
            task,
            clock,
            config,
            dry_run: false,
            stop: StopSignal::new(),
            state: State::Idle,
        }
    }

    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Handle to stop the [run](Self::run) loop from another thread.
    pub fn stop_signal(&self) -> StopSignal {
        self.stop.clone()
    }

    pub fn state(&self) -> State {
        self.state
    }

    /// Runs until the stop signal is raised.
    ///
    /// The first backup starts right away. Failed cycles are logged and
    /// retried at their next regular time.
    pub fn run(&mut self) -> Summary {
        let interval = TimeDelta::from_std(self.config.interval()).unwrap_or(TimeDelta::MAX);
        let policy = RetentionPolicy::new(self.config.retention_days);
        let start = self.clock.now();

        log::info!(target: "scheduler", "Starting backup scheduler");
        log::info!(target: "scheduler", "Backups: every {} hour(s)", self.config.interval_hours);
        log::info!(target: "scheduler", "Cleanup: every day at midnight");
        log::info!(target: "scheduler", "Retention: {} day(s)", self.config.retention_days);

        let mut summary = Summary::default();
        let mut next_backup = Some(start);
        let mut next_retention = next_midnight(&start);

        loop {
            let now = self.clock.now();

            if let Some(due) = next_backup.filter(|due| now >= *due && !self.stop.is_stopped()) {
                let ok = self.run_cycle(Cycle::Backup, |task, dry_run| task.backup(dry_run));
                summary.backups += 1;
                summary.failed_backups += usize::from(!ok);
                next_backup = next_slot(due, interval, &now);
                match next_backup {
                    Some(next) => log::debug!(target: "scheduler", "Next backup at {next}"),
                    None => log::warn!(target: "scheduler", "The next backup is out of the calendar range, no further backups"),
                }
            }

            if now.naive_local() >= next_retention && !self.stop.is_stopped() {
                let ok = self.run_cycle(Cycle::Retention, |task, dry_run| {
                    task.retention(&policy, dry_run)
                });
                summary.sweeps += 1;
                summary.failed_sweeps += usize::from(!ok);
                next_retention = next_midnight(&self.clock.now());
                log::debug!(target: "scheduler", "Next cleanup at {next_retention}");
            }

            if self.stop.is_stopped() || self.clock.wait(self.config.poll_interval(), &self.stop) {
                break;
            }
        }

        log::info!(target: "scheduler", "Backup scheduler stopped");
        summary
    }

    fn run_cycle<F>(&mut self, cycle: Cycle, work: F) -> bool
    where
        F: FnOnce(&B, bool) -> Result<(), B::Error>,
    {
        self.state = State::Running(cycle);
        log::trace!(target: "scheduler", "Running {cycle} cycle");

        let res = work(&self.task, self.dry_run);
        self.state = State::Idle;

        match res {
            Ok(()) => true,
            Err(e) => {
                log::error!(target: "scheduler", "The {cycle} cycle failed: {e}");
                false
            }
        }
    }
}

/// First slot of the grid `previous + k * interval` after `now`.
///
/// Slots missed while a cycle was running are skipped, not made up for.
/// `None` if that slot can't be represented.
fn next_slot(
    previous: DateTime<Local>,
    interval: TimeDelta,
    now: &DateTime<Local>,
) -> Option<DateTime<Local>> {
    let next = previous.checked_add_signed(interval)?;
    if next > *now || interval <= TimeDelta::zero() {
        return Some(next);
    }

    let behind = (*now - next).num_seconds() / interval.num_seconds().max(1);
    let skipped = i32::try_from(behind).ok()?.checked_add(1)?;
    next.checked_add_signed(interval.checked_mul(skipped)?)
}

/// The next 00:00 strictly after `now`, in local wall clock time.
fn next_midnight(now: &DateTime<Local>) -> NaiveDateTime {
    let tomorrow = now
        .date_naive()
        .succ_opt()
        .unwrap_or(now.date_naive());
    tomorrow.and_time(NaiveTime::MIN)
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use chrono::TimeZone;

    use super::*;
    use crate::util::clock::manual::ManualClock;

    struct Recorder<'a> {
        clock: &'a ManualClock,
        events: RefCell<Vec<(Cycle, DateTime<Local>)>>,
        fail: bool,
        stop_during_backup: RefCell<Option<StopSignal>>,
    }

    impl<'a> Recorder<'a> {
        fn new(clock: &'a ManualClock) -> Self {
            Self {
                clock,
                events: RefCell::new(Vec::new()),
                fail: false,
                stop_during_backup: RefCell::new(None),
            }
        }

        fn times(&self, cycle: Cycle) -> Vec<DateTime<Local>> {
            self.events
                .borrow()
                .iter()
                .filter(|(c, _)| *c == cycle)
                .map(|(_, t)| *t)
                .collect()
        }
    }

    impl Backup for &Recorder<'_> {
        type Error = String;

        fn backup(&self, _dry_run: bool) -> Result<(), Self::Error> {
            if let Some(stop) = self.stop_during_backup.borrow().as_ref() {
                stop.stop();
                // the dump is still running when the stop request arrives
                self.clock.advance(TimeDelta::minutes(5));
            }
            self.events.borrow_mut().push((Cycle::Backup, self.clock.now()));
            if self.fail {
                Err("pg_dump exited with status 1".to_string())
            } else {
                Ok(())
            }
        }

        fn retention(&self, _policy: &RetentionPolicy, _dry_run: bool) -> Result<(), Self::Error> {
            self.events.borrow_mut().push((Cycle::Retention, self.clock.now()));
            Ok(())
        }
    }

    fn local(y: i32, m: u32, d: u32, h: u32, min: u32, s: u32) -> DateTime<Local> {
        Local.with_ymd_and_hms(y, m, d, h, min, s).single().unwrap()
    }

    fn config(interval_hours: u32, poll_seconds: u64) -> ScheduleConfig {
        ScheduleConfig {
            interval_hours,
            retention_days: 7,
            poll_seconds,
        }
    }

    #[test]
    fn first_backup_is_immediate_then_every_interval() {
        let start = local(2024, 1, 10, 10, 0, 0);
        let clock = ManualClock::new(start, 5 * 60);
        let recorder = Recorder::new(&clock);

        let summary = Scheduler::with_clock(&recorder, config(2, 60), &clock).run();

        assert_eq!(
            recorder.times(Cycle::Backup),
            [start, start + TimeDelta::hours(2), start + TimeDelta::hours(4)]
        );
        assert_eq!(summary.backups, 3);
        assert_eq!(summary.sweeps, 0);
    }

    #[test]
    fn retention_runs_once_per_day_after_midnight() {
        let start = local(2024, 1, 10, 22, 30, 0);
        let clock = ManualClock::new(start, 48);
        let recorder = Recorder::new(&clock);

        let summary = Scheduler::with_clock(&recorder, config(1, 3600), &clock).run();

        assert_eq!(
            recorder.times(Cycle::Retention),
            [local(2024, 1, 11, 0, 30, 0), local(2024, 1, 12, 0, 30, 0)]
        );
        assert_eq!(summary.backups, 48);
        assert_eq!(summary.sweeps, 2);
    }

    #[test]
    fn coinciding_cycles_run_one_after_another() {
        let start = local(2024, 1, 10, 23, 0, 0);
        let clock = ManualClock::new(start, 2);
        let recorder = Recorder::new(&clock);

        Scheduler::with_clock(&recorder, config(1, 3600), &clock).run();

        let events: Vec<_> = recorder.events.borrow().clone();
        let midnight = local(2024, 1, 11, 0, 0, 0);
        assert_eq!(
            events,
            [
                (Cycle::Backup, start),
                (Cycle::Backup, midnight),
                (Cycle::Retention, midnight)
            ]
        );
    }

    #[test]
    fn failed_backups_keep_the_scheduler_running() {
        let start = local(2024, 1, 10, 10, 0, 0);
        let clock = ManualClock::new(start, 3 * 60);
        let mut recorder = Recorder::new(&clock);
        recorder.fail = true;

        let summary = Scheduler::with_clock(&recorder, config(1, 60), &clock).run();

        assert_eq!(summary.backups, 3);
        assert_eq!(summary.failed_backups, 3);
    }

    #[test]
    fn stop_lets_the_running_backup_finish() {
        let start = local(2024, 1, 10, 12, 0, 0);
        let clock = ManualClock::new(start, 100);
        let recorder = Recorder::new(&clock);
        let mut scheduler = Scheduler::with_clock(&recorder, config(1, 60), &clock);
        *recorder.stop_during_backup.borrow_mut() = Some(scheduler.stop_signal());

        let summary = scheduler.run();

        assert_eq!(recorder.times(Cycle::Backup), [start + TimeDelta::minutes(5)]);
        assert_eq!(summary.backups, 1);
        assert_eq!(summary.failed_backups, 0);
        assert_eq!(clock.waits(), 0);
        assert_eq!(scheduler.state(), State::Idle);
    }

    #[test]
    fn next_slot_skips_missed_slots() {
        let start = local(2024, 1, 10, 10, 0, 0);
        let hour = TimeDelta::hours(1);

        assert_eq!(next_slot(start, hour, &start), Some(start + hour));
        assert_eq!(
            next_slot(start, hour, &(start + TimeDelta::minutes(150))),
            Some(start + TimeDelta::hours(3))
        );
    }

    #[test]
    fn next_slot_out_of_range_is_none() {
        let start = local(2024, 1, 10, 10, 0, 0);
        let huge = TimeDelta::hours(i64::from(u32::MAX));

        assert_eq!(next_slot(start, huge, &start), None);
        assert_eq!(next_slot(start, TimeDelta::MAX, &start), None);
    }

    #[test]
    fn huge_interval_backs_up_once_and_keeps_running() {
        let start = local(2024, 1, 10, 23, 0, 0);
        let clock = ManualClock::new(start, 120);
        let recorder = Recorder::new(&clock);
        let config = ScheduleConfig {
            interval_hours: u32::MAX,
            ..config(1, 60)
        };
        assert!(config.validate().is_ok());

        let summary = Scheduler::with_clock(&recorder, config, &clock).run();

        assert_eq!(recorder.times(Cycle::Backup), [start]);
        assert_eq!(summary.backups, 1);
        assert_eq!(summary.sweeps, 1);
        assert_eq!(clock.waits(), 120);
    }

    #[test]
    fn next_midnight_is_strictly_later() {
        let expected = local(2024, 1, 11, 0, 0, 0).naive_local();
        assert_eq!(next_midnight(&local(2024, 1, 10, 0, 0, 0)), expected);
        assert_eq!(next_midnight(&local(2024, 1, 10, 23, 59, 59)), expected);
    }
}
