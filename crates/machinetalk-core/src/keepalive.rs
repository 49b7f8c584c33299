//! One-shot and periodic keepalive timers.
//!
//! Each endpoint owns one timer thread parked on a `Condvar`. Rearming bumps
//! a generation counter so a stale wakeup (the thread waking up just as a
//! fresh `rearm` lands) is distinguishable from a real expiry — the thread
//! re-checks the generation after waking and only fires the callback if
//! nothing rearmed or cancelled it in the meantime.
//!
//! The callback runs on the timer thread and is expected to take whatever
//! locks the I/O worker and public API also take (per spec.md §9); it must
//! not block for long, since a slow callback delays the next tick.

use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

struct Shared {
    generation: u64,
    deadline: Option<Instant>,
    period: Option<Duration>,
    stopped: bool,
}

/// A rearmable one-shot timer, optionally auto-repeating at a fixed period.
pub struct Timer {
    shared: Arc<(Mutex<Shared>, Condvar)>,
    handle: Option<JoinHandle<()>>,
}

impl Timer {
    /// Spawn the timer thread. `on_fire` is invoked (on the timer thread)
    /// each time a deadline is reached without being rearmed or cancelled
    /// first.
    pub fn spawn<F>(name: &str, on_fire: F) -> Self
    where
        F: Fn() + Send + 'static,
    {
        let shared = Arc::new((
            Mutex::new(Shared {
                generation: 0,
                deadline: None,
                period: None,
                stopped: false,
            }),
            Condvar::new(),
        ));

        let worker_shared = Arc::clone(&shared);
        let name = name.to_string();
        let handle = std::thread::Builder::new()
            .name(format!("{name}-timer"))
            .spawn(move || Self::run(worker_shared, on_fire))
            .expect("failed to spawn timer thread");

        Timer {
            shared,
            handle: Some(handle),
        }
    }

    fn run<F: Fn() + Send + 'static>(shared: Arc<(Mutex<Shared>, Condvar)>, on_fire: F) {
        let (lock, cvar) = &*shared;
        let mut guard = lock.lock().unwrap();
        loop {
            if guard.stopped {
                return;
            }

            let Some(deadline) = guard.deadline else {
                guard = cvar.wait(guard).unwrap();
                continue;
            };

            let now = Instant::now();
            if now >= deadline {
                let generation = guard.generation;
                let period = guard.period;
                drop(guard);
                on_fire();
                guard = lock.lock().unwrap();
                // Only rearm for the next tick if nothing else touched the
                // timer (cancel/rearm) while the callback was running.
                if guard.generation == generation {
                    guard.deadline = period.map(|p| Instant::now() + p);
                    if guard.deadline.is_none() {
                        guard.generation = guard.generation.wrapping_add(1);
                    }
                }
                continue;
            }

            let (g, timeout_result) = cvar.wait_timeout(guard, deadline - now).unwrap();
            guard = g;
            let _ = timeout_result;
        }
    }

    /// Arm (or rearm) a one-shot timer for `duration` from now. Passing a
    /// zero duration disables the timer (matches `heartbeat_period = 0`
    /// disabling the command heartbeat, and the status/error keepalive
    /// never arming when no `pparams` were present).
    pub fn arm_once(&self, duration: Duration) {
        if duration.is_zero() {
            self.cancel();
        } else {
            self.set(Some(duration), None);
        }
    }

    /// Arm a periodic timer that refires every `period` until cancelled or
    /// rearmed. A zero period disables the timer.
    pub fn arm_periodic(&self, period: Duration) {
        if period.is_zero() {
            self.cancel();
            return;
        }
        self.set(Some(period), Some(period));
    }

    /// Cancel any pending firing.
    pub fn cancel(&self) {
        self.set(None, None);
    }

    fn set(&self, next_in: Option<Duration>, period: Option<Duration>) {
        let (lock, cvar) = &*self.shared;
        let mut guard = lock.lock().unwrap();
        guard.generation = guard.generation.wrapping_add(1);
        guard.deadline = next_in.map(|d| Instant::now() + d);
        guard.period = period;
        cvar.notify_one();
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        {
            let (lock, cvar) = &*self.shared;
            let mut guard = lock.lock().unwrap();
            guard.stopped = true;
            cvar.notify_one();
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn one_shot_fires_once() {
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        let timer = Timer::spawn("test", move || {
            c.fetch_add(1, Ordering::SeqCst);
        });
        timer.arm_once(Duration::from_millis(20));
        std::thread::sleep(Duration::from_millis(120));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn rearm_before_expiry_resets_deadline() {
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        let timer = Timer::spawn("test", move || {
            c.fetch_add(1, Ordering::SeqCst);
        });
        timer.arm_once(Duration::from_millis(50));
        std::thread::sleep(Duration::from_millis(20));
        timer.arm_once(Duration::from_millis(50)); // push the deadline back
        std::thread::sleep(Duration::from_millis(40));
        assert_eq!(count.load(Ordering::SeqCst), 0, "should not have fired yet");
        std::thread::sleep(Duration::from_millis(60));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn cancel_prevents_firing() {
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        let timer = Timer::spawn("test", move || {
            c.fetch_add(1, Ordering::SeqCst);
        });
        timer.arm_once(Duration::from_millis(20));
        timer.cancel();
        std::thread::sleep(Duration::from_millis(80));
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn periodic_fires_repeatedly() {
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        let timer = Timer::spawn("test", move || {
            c.fetch_add(1, Ordering::SeqCst);
        });
        timer.arm_periodic(Duration::from_millis(30));
        std::thread::sleep(Duration::from_millis(200));
        timer.cancel();
        let fired = count.load(Ordering::SeqCst);
        assert!(fired >= 3, "expected several ticks, got {fired}");
    }

    #[test]
    fn zero_duration_disables_timer() {
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        let timer = Timer::spawn("test", move || {
            c.fetch_add(1, Ordering::SeqCst);
        });
        timer.arm_once(Duration::ZERO);
        std::thread::sleep(Duration::from_millis(80));
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }
}
