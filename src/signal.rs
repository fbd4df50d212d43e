//! Thread wake-up primitives shared by the periodic tasks.

use parking_lot::{Condvar, Mutex};
use std::time::{Duration, Instant};

struct SignalState {
    generation: u64,
    closed: bool,
}

/// Single-slot, latest-value-wins notification.
///
/// Every `notify` bumps a generation counter. A waiter remembers the last
/// generation it consumed, so several notifications raised before it wakes up
/// coalesce into one.
pub struct Signal {
    state: Mutex<SignalState>,
    cond: Condvar,
}

impl Signal {
    pub fn new() -> Self {
        Signal {
            state: Mutex::new(SignalState { generation: 0, closed: false }),
            cond: Condvar::new(),
        }
    }

    pub fn notify(&self) {
        let mut state = self.state.lock();
        state.generation = state.generation.wrapping_add(1);
        self.cond.notify_one();
    }

    /// Block until the generation moves past `seen`. Returns `None` once closed.
    pub fn wait_newer(&self, seen: u64) -> Option<u64> {
        let mut state = self.state.lock();
        loop {
            if state.closed {
                return None;
            }
            if state.generation != seen {
                return Some(state.generation);
            }
            self.cond.wait(&mut state);
        }
    }

    /// Like [`Signal::wait_newer`] but gives up after `timeout`, returning `Some(seen)`.
    pub fn wait_newer_timeout(&self, seen: u64, timeout: Duration) -> Option<u64> {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        loop {
            if state.closed {
                return None;
            }
            if state.generation != seen {
                return Some(state.generation);
            }
            if self.cond.wait_until(&mut state, deadline).timed_out() {
                return if state.closed { None } else { Some(seen) };
            }
        }
    }

    pub fn generation(&self) -> u64 {
        self.state.lock().generation
    }

    pub fn close(&self) {
        self.state.lock().closed = true;
        self.cond.notify_all();
    }
}

impl Default for Signal {
    fn default() -> Self {
        Self::new()
    }
}

/// Cooperative stop flag with an interruptible sleep.
pub struct Shutdown {
    stopped: Mutex<bool>,
    cond: Condvar,
}

impl Shutdown {
    pub fn new() -> Self {
        Shutdown {
            stopped: Mutex::new(false),
            cond: Condvar::new(),
        }
    }

    pub fn trigger(&self) {
        *self.stopped.lock() = true;
        self.cond.notify_all();
    }

    pub fn is_triggered(&self) -> bool {
        *self.stopped.lock()
    }

    /// Sleep for `period`. Returns `false` if shutdown was requested meanwhile.
    pub fn sleep(&self, period: Duration) -> bool {
        let deadline = Instant::now() + period;
        let mut stopped = self.stopped.lock();
        while !*stopped {
            if self.cond.wait_until(&mut stopped, deadline).timed_out() {
                break;
            }
        }
        !*stopped
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn notifications_coalesce() {
        let signal = Signal::new();
        signal.notify();
        signal.notify();
        signal.notify();

        let seen = signal.wait_newer(0).unwrap();
        assert_eq!(seen, 3);
        assert_eq!(signal.wait_newer_timeout(seen, Duration::from_millis(20)), Some(seen));
    }

    #[test]
    fn waiter_wakes_on_notify() {
        let signal = Arc::new(Signal::new());
        let waiter = {
            let signal = Arc::clone(&signal);
            thread::spawn(move || signal.wait_newer(0))
        };
        thread::sleep(Duration::from_millis(20));
        signal.notify();
        assert_eq!(waiter.join().unwrap(), Some(1));
    }

    #[test]
    fn close_releases_waiters() {
        let signal = Arc::new(Signal::new());
        let waiter = {
            let signal = Arc::clone(&signal);
            thread::spawn(move || signal.wait_newer(0))
        };
        thread::sleep(Duration::from_millis(20));
        signal.close();
        assert_eq!(waiter.join().unwrap(), None);
    }

    #[test]
    fn shutdown_interrupts_sleep() {
        let shutdown = Arc::new(Shutdown::new());
        let sleeper = {
            let shutdown = Arc::clone(&shutdown);
            thread::spawn(move || {
                let start = Instant::now();
                let kept_running = shutdown.sleep(Duration::from_secs(10));
                (kept_running, start.elapsed())
            })
        };
        thread::sleep(Duration::from_millis(20));
        shutdown.trigger();
        let (kept_running, elapsed) = sleeper.join().unwrap();
        assert!(!kept_running);
        assert!(elapsed < Duration::from_secs(5));
    }

    #[test]
    fn sleep_runs_full_period_without_shutdown() {
        let shutdown = Shutdown::new();
        assert!(shutdown.sleep(Duration::from_millis(10)));
        assert!(!shutdown.is_triggered());
    }
}
