use crate::{AtomicFlag, Error, ResetEvent, Result};
use once_cell::sync::OnceCell;
use std::{
    fmt,
    sync::{
        atomic::{AtomicU8, Ordering},
        Arc,
    },
    thread::{self, JoinHandle},
    time::Duration,
};

/// Terminal state of a [`CoordinatedOperation`].
#[repr(u8)]
#[derive(Copy, Clone, Eq, PartialEq, Debug, Hash)]
pub enum OperationResult {
    /// The operation has not finished (or was never started).
    Unset = 0,
    /// The operation ran and returned `true`.
    Success = 1,
    /// The operation ran and returned `false`.
    Failure = 2,
    /// The start signal did not arrive in time; the operation never ran.
    TimedOut = 3,
}

impl Default for OperationResult {
    fn default() -> Self {
        Self::Unset
    }
}

impl OperationResult {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Success,
            2 => Self::Failure,
            3 => Self::TimedOut,
            _ => Self::Unset,
        }
    }
}

struct FinishOnDrop<'a>(&'a ResetEvent);

impl<'a> Drop for FinishOnDrop<'a> {
    fn drop(&mut self) {
        self.0.set();
    }
}

#[derive(Default)]
struct Signals {
    start: ResetEvent,
    finish: ResetEvent,
    result: AtomicU8,
}

impl Signals {
    fn execute(
        &self,
        timeout: Option<Duration>,
        operation: impl FnOnce() -> bool,
        record: bool,
    ) -> OperationResult {
        let started = match timeout {
            None => {
                self.start.wait();
                true
            }
            Some(timeout) => self.start.wait_for(timeout),
        };

        if !started {
            tracing::debug!(?timeout, "start signal not received, operation skipped");
            if record {
                self.result
                    .store(OperationResult::TimedOut as u8, Ordering::Release);
            }
            return OperationResult::TimedOut;
        }

        let _finish = FinishOnDrop(&self.finish);
        let result = match operation() {
            true => OperationResult::Success,
            false => OperationResult::Failure,
        };

        // Published before `_finish` fires the finish signal.
        if record {
            self.result.store(result as u8, Ordering::Release);
        }
        result
    }
}

/// Runs an operation once a start signal arrives and announces when it
/// finished, so tests can sequence two threads deterministically.
///
/// The operation can run on the calling thread with
/// [`execute_on_start`](Self::execute_on_start) or on a single worker thread
/// owned by the instance with
/// [`threaded_execute_on_start`](Self::threaded_execute_on_start).
///
/// # Examples
///
/// ```
/// use syncguard::{CoordinatedOperation, OperationResult};
/// use std::time::Duration;
///
/// let op = CoordinatedOperation::new();
/// op.threaded_execute_on_start(|| true).unwrap();
/// assert_eq!(op.result(), OperationResult::Unset);
///
/// op.signal_start();
/// assert!(op.wait_for_finish_for(Duration::from_secs(5)));
/// assert_eq!(op.result(), OperationResult::Success);
/// op.join().unwrap();
/// ```
#[derive(Default)]
pub struct CoordinatedOperation {
    signals: Arc<Signals>,
    spawned: AtomicFlag,
    worker: OnceCell<JoinHandle<()>>,
}

impl fmt::Debug for CoordinatedOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CoordinatedOperation")
            .field("started", &self.signals.start.is_set())
            .field("finished", &self.signals.finish.is_set())
            .field("result", &self.result())
            .finish()
    }
}

impl CoordinatedOperation {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an operation and immediately hands `operation` to its worker
    /// thread, which waits at most `timeout` (or forever) for the start signal.
    pub fn spawn<F>(timeout: Option<Duration>, operation: F) -> Result<Self>
    where
        F: FnOnce() -> bool + Send + 'static,
    {
        let coordinated = Self::new();
        coordinated.spawn_worker(timeout, operation)?;
        Ok(coordinated)
    }

    /// Blocks until [`signal_start`](Self::signal_start) is called, then runs
    /// `operation` and fires the finish signal.
    ///
    /// The finish signal fires even when `operation` panics.
    pub fn execute_on_start(&self, operation: impl FnOnce() -> bool) -> OperationResult {
        self.signals.execute(None, operation, false)
    }

    /// Like [`execute_on_start`](Self::execute_on_start) but returns
    /// [`OperationResult::TimedOut`] without running `operation` if the start
    /// signal does not arrive within `timeout`.
    pub fn execute_on_start_for(
        &self,
        timeout: Duration,
        operation: impl FnOnce() -> bool,
    ) -> OperationResult {
        self.signals.execute(Some(timeout), operation, false)
    }

    /// Runs [`execute_on_start`](Self::execute_on_start) on a new worker
    /// thread. Its outcome is available from [`result`](Self::result) once
    /// the finish signal fired.
    ///
    /// An instance owns at most one worker: a second call fails with
    /// [`Error::InvalidState`].
    pub fn threaded_execute_on_start<F>(&self, operation: F) -> Result<()>
    where
        F: FnOnce() -> bool + Send + 'static,
    {
        self.spawn_worker(None, operation)
    }

    /// Threaded form of [`execute_on_start_for`](Self::execute_on_start_for).
    pub fn threaded_execute_on_start_for<F>(&self, timeout: Duration, operation: F) -> Result<()>
    where
        F: FnOnce() -> bool + Send + 'static,
    {
        self.spawn_worker(Some(timeout), operation)
    }

    fn spawn_worker<F>(&self, timeout: Option<Duration>, operation: F) -> Result<()>
    where
        F: FnOnce() -> bool + Send + 'static,
    {
        if self.spawned.compare_exchange(false, true).is_err() {
            return Err(Error::InvalidState(
                "CoordinatedOperation already owns a worker thread",
            ));
        }

        let signals = self.signals.clone();
        let worker = thread::Builder::new()
            .name("coordinated-operation".into())
            .spawn(move || {
                signals.execute(timeout, operation, true);
            })
            .map_err(|e| {
                self.spawned.set(false);
                Error::from(e)
            })?;

        tracing::debug!(?timeout, "spawned coordinated operation worker");
        // The spawned flag makes this the only writer of the cell.
        let _ = self.worker.set(worker);
        Ok(())
    }

    /// Lets the waiting operation run. Calling it more than once, or before
    /// anything waits, is fine.
    pub fn signal_start(&self) {
        self.signals.start.set();
    }

    /// Blocks until the operation has finished running.
    pub fn wait_for_finish(&self) {
        self.signals.finish.wait()
    }

    /// Blocks until the operation has finished or `timeout` elapsed,
    /// returning whether it finished.
    pub fn wait_for_finish_for(&self, timeout: Duration) -> bool {
        self.signals.finish.wait_for(timeout)
    }

    /// The outcome recorded by the worker thread.
    pub fn result(&self) -> OperationResult {
        OperationResult::from_u8(self.signals.result.load(Ordering::Acquire))
    }

    /// Waits for the worker thread to exit, returning its panic payload if
    /// the operation panicked. Returns `Ok` when no worker was spawned.
    pub fn join(self) -> thread::Result<()> {
        match self.worker.into_inner() {
            Some(worker) => worker.join(),
            None => Ok(()),
        }
    }
}
