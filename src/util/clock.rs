//! Time source and cooperative cancellation.

use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Local};

/// Source of the current time, and the way to let time pass.
pub trait Clock {
    /// Current local time.
    fn now(&self) -> DateTime<Local>;

    /// Blocks for up to `timeout`, returning early once `stop` is raised.
    ///
    /// Returns whether `stop` has been raised.
    fn wait(&self, timeout: Duration, stop: &StopSignal) -> bool;
}

impl<C: Clock + ?Sized> Clock for &C {
    fn now(&self) -> DateTime<Local> {
        (**self).now()
    }

    fn wait(&self, timeout: Duration, stop: &StopSignal) -> bool {
        (**self).wait(timeout, stop)
    }
}

/// The wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Local> {
        Local::now()
    }

    fn wait(&self, timeout: Duration, stop: &StopSignal) -> bool {
        stop.wait_timeout(timeout)
    }
}

/// A flag that can be raised once from any thread to stop a loop.
#[derive(Debug, Clone, Default)]
pub struct StopSignal {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raises the signal and wakes up all waiters.
    pub fn stop(&self) {
        let (stopped, cvar) = &*self.inner;
        *stopped.lock().unwrap_or_else(PoisonError::into_inner) = true;
        cvar.notify_all();
    }

    pub fn is_stopped(&self) -> bool {
        let (stopped, _) = &*self.inner;
        *stopped.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Waits until the signal is raised or `timeout` elapsed.
    ///
    /// Returns whether the signal has been raised.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let (stopped, cvar) = &*self.inner;
        let guard = stopped.lock().unwrap_or_else(PoisonError::into_inner);
        let (guard, _) = cvar
            .wait_timeout_while(guard, timeout, |stopped| !*stopped)
            .unwrap_or_else(PoisonError::into_inner);
        *guard
    }
}


#[cfg(test)]
mod tests {
    use std::thread;
    use std::time::Instant;

    use super::*;

    #[test]
    fn wait_times_out_without_stop() {
        let stop = StopSignal::new();
        assert!(!stop.wait_timeout(Duration::from_millis(10)));
        assert!(!stop.is_stopped());
    }

    #[test]
    fn stop_wakes_up_waiter() {
        let stop = StopSignal::new();
        let remote = stop.clone();

        let start = Instant::now();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            remote.stop();
        });

        assert!(SystemClock.wait(Duration::from_secs(30), &stop));
        assert!(start.elapsed() < Duration::from_secs(30));
        handle.join().unwrap();
    }
}
