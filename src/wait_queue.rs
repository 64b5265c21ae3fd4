//! A small parking lot: threads park on an address and are woken by address.
//!
//! Waiters are kept in a fixed table of buckets hashed by address, each
//! bucket protecting a map of address to queued waiters.

use once_cell::sync::OnceCell;
use std::{
    collections::{btree_map::Entry, BTreeMap},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, MutexGuard, PoisonError,
    },
    thread::{self, Thread},
    time::Instant,
};

struct Waiter {
    thread: Thread,
    queued: AtomicBool,
    notified: AtomicBool,
}

impl Waiter {
    fn with<F>(f: impl FnOnce(&Arc<Self>) -> F) -> F {
        thread_local!(static TLS_WAITER: Arc<Waiter> = Arc::new(Waiter {
            thread: thread::current(),
            queued: AtomicBool::new(false),
            notified: AtomicBool::new(false),
        }));
        TLS_WAITER.with(f)
    }

    fn park(&self, deadline: Option<Instant>) -> bool {
        loop {
            if self.notified.load(Ordering::Acquire) {
                return true;
            }

            match deadline {
                None => thread::park(),
                Some(deadline) => match deadline.checked_duration_since(Instant::now()) {
                    Some(timeout) => thread::park_timeout(timeout),
                    None => return false,
                },
            }
        }
    }

    fn unpark(&self) {
        self.notified.store(true, Ordering::Release);
        self.thread.unpark();
    }
}

type Queue = Vec<Arc<Waiter>>;

#[derive(Default)]
struct Bucket {
    queues: Mutex<BTreeMap<usize, Queue>>,
}

impl Bucket {
    fn from(address: usize) -> &'static Self {
        const NUM_BUCKETS: usize = 64;
        static BUCKETS: OnceCell<Box<[Bucket]>> = OnceCell::new();
        let buckets =
            BUCKETS.get_or_init(|| (0..NUM_BUCKETS).map(|_| Bucket::default()).collect());

        #[cfg(target_pointer_width = "64")]
        const HASH_MULT: usize = 0x9E3779B97F4A7C15;
        #[cfg(target_pointer_width = "32")]
        const HASH_MULT: usize = 0x9E3779B9;

        let hash = address.wrapping_mul(HASH_MULT);
        &buckets[hash % NUM_BUCKETS]
    }

    // Nothing runs user code while the bucket is held, so a poisoned lock
    // still guards a consistent map.
    fn lock(&self) -> MutexGuard<'_, BTreeMap<usize, Queue>> {
        self.queues.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn try_remove(queues: &mut BTreeMap<usize, Queue>, address: usize, waiter: &Arc<Waiter>) -> bool {
    if !waiter.queued.load(Ordering::Relaxed) {
        return false;
    }

    if let Entry::Occupied(mut entry) = queues.entry(address) {
        if let Some(index) = entry.get().iter().position(|w| Arc::ptr_eq(w, waiter)) {
            entry.get_mut().swap_remove(index);
        }
        if entry.get().is_empty() {
            entry.remove();
        }
    }

    waiter.queued.store(false, Ordering::Relaxed);
    true
}

#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub(crate) enum WaitResult {
    Invalidated,
    TimedOut,
    Notified,
}

/// Parks the caller on `address` until [`wake_all`] is called for it.
///
/// `validate` runs with the bucket locked; returning `false` skips parking.
pub(crate) fn wait(
    address: usize,
    validate: impl FnOnce() -> bool,
    deadline: Option<Instant>,
) -> WaitResult {
    let bucket = Bucket::from(address);
    let mut queues = bucket.lock();

    if !validate() {
        return WaitResult::Invalidated;
    }

    Waiter::with(|waiter| {
        waiter.notified.store(false, Ordering::Relaxed);
        waiter.queued.store(true, Ordering::Relaxed);
        queues.entry(address).or_default().push(waiter.clone());
        drop(queues);

        if waiter.park(deadline) {
            return WaitResult::Notified;
        }

        let mut queues = bucket.lock();
        let removed = try_remove(&mut queues, address, waiter);
        drop(queues);

        if removed {
            return WaitResult::TimedOut;
        }

        // A waker dequeued us concurrently with the timeout and is about to
        // unpark, so wait for it to finish touching this waiter.
        waiter.park(None);
        WaitResult::Notified
    })
}

/// Wakes every thread parked on `address`, returning how many were woken.
pub(crate) fn wake_all(address: usize) -> usize {
    let bucket = Bucket::from(address);
    let woken = {
        let mut queues = bucket.lock();
        let woken = queues.remove(&address).unwrap_or_default();
        for waiter in woken.iter() {
            waiter.queued.store(false, Ordering::Relaxed);
        }
        woken
    };

    for waiter in woken.iter() {
        waiter.unpark();
    }
    woken.len()
}

#[cfg(test)]
mod tests {
    use super::{wait, wake_all, WaitResult};
    use std::{
        sync::{
            atomic::{AtomicBool, Ordering},
            Arc,
        },
        thread,
        time::{Duration, Instant},
    };

    #[test]
    fn invalidated_wait_returns_immediately() {
        let address = 0x1000;
        assert_eq!(wait(address, || false, None), WaitResult::Invalidated);
    }

    #[test]
    fn wait_times_out_without_waker() {
        let address = 0x2000;
        let deadline = Instant::now() + Duration::from_millis(20);
        assert_eq!(wait(address, || true, Some(deadline)), WaitResult::TimedOut);
        assert_eq!(wake_all(address), 0);
    }

    #[test]
    fn wake_all_unparks_every_waiter() {
        const N: usize = 4;
        let ready = Arc::new(AtomicBool::new(false));
        let address = Arc::as_ptr(&ready) as usize;

        let threads: Vec<_> = (0..N)
            .map(|_| {
                let ready = ready.clone();
                thread::spawn(move || {
                    while !ready.load(Ordering::Acquire) {
                        let _ = wait(address, || !ready.load(Ordering::Relaxed), None);
                    }
                })
            })
            .collect();

        thread::sleep(Duration::from_millis(50));
        ready.store(true, Ordering::Release);
        wake_all(address);

        for t in threads {
            t.join().unwrap();
        }
    }
}
