use super::wait_queue::{self, WaitResult};
use std::{
    fmt,
    sync::atomic::{AtomicU8, Ordering},
    time::{Duration, Instant},
};

const UNSET: u8 = 0;
const SET: u8 = 1;
const WAITING: u8 = 2;

/// A manual-reset event.
///
/// Once [`set`](Self::set), every current and future [`wait`](Self::wait)
/// returns immediately until the event is [`reset`](Self::reset).
pub struct ResetEvent {
    state: AtomicU8,
}

impl fmt::Debug for ResetEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResetEvent")
            .field("is_set", &self.is_set())
            .finish()
    }
}

impl Default for ResetEvent {
    fn default() -> Self {
        Self::new(false)
    }
}

impl ResetEvent {
    pub const fn new(is_set: bool) -> Self {
        Self {
            state: AtomicU8::new(if is_set { SET } else { UNSET }),
        }
    }

    #[inline]
    pub fn is_set(&self) -> bool {
        self.state.load(Ordering::Acquire) == SET
    }

    /// Sets the event and wakes up all threads waiting on it.
    pub fn set(&self) {
        if self.state.swap(SET, Ordering::Release) == WAITING {
            wait_queue::wake_all(self.address());
        }
    }

    /// Clears the event. Waiting threads stay blocked until the next `set`.
    pub fn reset(&self) {
        let _ = self
            .state
            .compare_exchange(SET, UNSET, Ordering::Relaxed, Ordering::Relaxed);
    }

    /// Blocks until the event is set.
    pub fn wait(&self) {
        let _ = self.wait_until(None);
    }

    /// Blocks until the event is set or `timeout` elapses.
    ///
    /// Returns whether the event was set.
    pub fn wait_for(&self, timeout: Duration) -> bool {
        // An unrepresentable deadline is as good as no deadline at all.
        let deadline = Instant::now().checked_add(timeout);
        self.wait_until(deadline)
    }

    fn wait_until(&self, deadline: Option<Instant>) -> bool {
        let mut state = self.state.load(Ordering::Acquire);
        loop {
            if state == SET {
                return true;
            }

            if state == UNSET {
                if let Err(e) = self.state.compare_exchange_weak(
                    UNSET,
                    WAITING,
                    Ordering::Acquire,
                    Ordering::Acquire,
                ) {
                    state = e;
                    continue;
                }
            }

            let validate = || self.state.load(Ordering::Relaxed) == WAITING;
            if let WaitResult::TimedOut = wait_queue::wait(self.address(), validate, deadline) {
                let is_set = self.is_set();
                if !is_set {
                    tracing::trace!("event wait timed out");
                }
                return is_set;
            }

            state = self.state.load(Ordering::Acquire);
        }
    }

    fn address(&self) -> usize {
        self as *const Self as usize
    }
}

#[cfg(test)]
mod tests {
    use super::ResetEvent;
    use std::{
        sync::{mpsc::channel, Arc},
        thread,
        time::{Duration, Instant},
    };

    #[test]
    fn smoke() {
        let event = ResetEvent::default();
        assert!(!event.is_set());
        event.set();
        assert!(event.is_set());
        event.wait();
        event.reset();
        assert!(!event.is_set());
    }

    #[test]
    fn wait_for_times_out() {
        let event = ResetEvent::new(false);
        let started = Instant::now();
        assert!(!event.wait_for(Duration::from_millis(50)));
        assert!(started.elapsed() >= Duration::from_millis(50));
    }

    #[test]
    fn set_wakes_all_waiters() {
        const N: usize = 8;
        let event = Arc::new(ResetEvent::new(false));
        let (tx, rx) = channel();

        for _ in 0..N {
            let event = event.clone();
            let tx = tx.clone();
            thread::spawn(move || {
                event.wait();
                tx.send(()).unwrap();
            });
        }
        drop(tx);

        thread::sleep(Duration::from_millis(50));
        assert!(rx.try_recv().is_err());

        event.set();
        for _ in 0..N {
            rx.recv_timeout(Duration::from_secs(5)).unwrap();
        }
    }

    #[test]
    fn reset_blocks_later_waiters() {
        let event = ResetEvent::new(true);
        assert!(event.wait_for(Duration::from_millis(1)));
        event.reset();
        assert!(!event.wait_for(Duration::from_millis(10)));
    }
}
