//! Single-shot liveness timer.
//!
//! Arming replaces any pending deadline and returns a fresh generation. When a
//! deadline elapses the expiry callback receives the generation it was armed
//! with, so the receiver can tell a stale fire from a current one.

use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

struct TimerState {
    deadline: Option<Instant>,
    generation: u64,
    shutdown: bool,
}

struct Shared {
    state: Mutex<TimerState>,
    cond: Condvar,
}

pub struct Watchdog {
    shared: Arc<Shared>,
}

impl Watchdog {
    pub fn new() -> Self {
        Watchdog {
            shared: Arc::new(Shared {
                state: Mutex::new(TimerState {
                    deadline: None,
                    generation: 0,
                    shutdown: false,
                }),
                cond: Condvar::new(),
            }),
        }
    }

    /// Start the timer thread. `on_expire` runs on that thread, without any
    /// timer lock held.
    pub fn start<F>(&self, name: &str, on_expire: F) -> std::io::Result<()>
    where
        F: Fn(u64) + Send + 'static,
    {
        let worker = Arc::clone(&self.shared);
        thread::Builder::new()
            .name(name.to_string())
            .spawn(move || run(&worker, on_expire))?;
        Ok(())
    }

    pub fn arm(&self, timeout: Duration) -> u64 {
        let mut state = self.shared.state.lock();
        state.generation = state.generation.wrapping_add(1);
        state.deadline = Some(Instant::now() + timeout);
        self.shared.cond.notify_one();
        state.generation
    }

    pub fn disarm(&self) {
        let mut state = self.shared.state.lock();
        state.generation = state.generation.wrapping_add(1);
        state.deadline = None;
        self.shared.cond.notify_one();
    }

    pub fn is_armed(&self) -> bool {
        self.shared.state.lock().deadline.is_some()
    }
}

impl Default for Watchdog {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Watchdog {
    fn drop(&mut self) {
        self.shared.state.lock().shutdown = true;
        self.shared.cond.notify_one();
    }
}

fn run<F: Fn(u64)>(shared: &Shared, on_expire: F) {
    let mut state = shared.state.lock();
    loop {
        if state.shutdown {
            return;
        }
        match state.deadline {
            None => shared.cond.wait(&mut state),
            Some(deadline) if Instant::now() >= deadline => {
                state.deadline = None;
                let generation = state.generation;
                drop(state);
                on_expire(generation);
                state = shared.state.lock();
            }
            Some(deadline) => {
                shared.cond.wait_until(&mut state, deadline);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    #[test]
    fn fires_once_after_timeout() {
        let (tx, rx) = mpsc::channel();
        let watchdog = Watchdog::new();
        watchdog
            .start("test-watchdog", move |generation| {
                let _ = tx.send(generation);
            })
            .unwrap();

        let start = Instant::now();
        let armed = watchdog.arm(Duration::from_millis(50));
        let fired = rx.recv_timeout(Duration::from_secs(2)).unwrap();

        assert_eq!(fired, armed);
        assert!(start.elapsed() >= Duration::from_millis(50));
        assert!(!watchdog.is_armed());
        assert!(rx.recv_timeout(Duration::from_millis(150)).is_err());
    }

    #[test]
    fn rearming_postpones_expiry() {
        let (tx, rx) = mpsc::channel();
        let watchdog = Watchdog::new();
        watchdog
            .start("test-watchdog", move |generation| {
                let _ = tx.send(generation);
            })
            .unwrap();

        watchdog.arm(Duration::from_millis(250));
        for _ in 0..4 {
            thread::sleep(Duration::from_millis(50));
            watchdog.arm(Duration::from_millis(250));
        }
        assert!(rx.try_recv().is_err());

        let last = watchdog.arm(Duration::from_millis(30));
        assert_eq!(rx.recv_timeout(Duration::from_secs(2)).unwrap(), last);
    }

    #[test]
    fn disarm_cancels() {
        let (tx, rx) = mpsc::channel();
        let watchdog = Watchdog::new();
        watchdog
            .start("test-watchdog", move |generation| {
                let _ = tx.send(generation);
            })
            .unwrap();

        watchdog.arm(Duration::from_millis(30));
        watchdog.disarm();
        assert!(rx.recv_timeout(Duration::from_millis(150)).is_err());
    }
}
