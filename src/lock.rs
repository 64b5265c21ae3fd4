use lock_api::{
    RawRwLockUpgrade, RawRwLockUpgradeTimed, RwLock as LockApiRwLock, RwLockReadGuard,
    RwLockUpgradableReadGuard, RwLockWriteGuard,
};
use std::{
    fmt,
    ops::{Deref, DerefMut},
    time::Duration,
};

#[cfg(feature = "parking_lot")]
pub type RwLock<T> = lock_api::RwLock<parking_lot::RawRwLock, T>;
#[cfg(feature = "parking_lot")]
pub type ReadHandle<'a, T> = LockHandle<RwLockReadGuard<'a, parking_lot::RawRwLock, T>>;
#[cfg(feature = "parking_lot")]
pub type WriteHandle<'a, T> = LockHandle<RwLockWriteGuard<'a, parking_lot::RawRwLock, T>>;
#[cfg(feature = "parking_lot")]
pub type UpgradableReadHandle<'a, T> =
    LockHandle<RwLockUpgradableReadGuard<'a, parking_lot::RawRwLock, T>>;

/// How a [`LockResult`] came to be.
#[derive(Copy, Clone, Eq, PartialEq, Debug, Hash)]
pub enum LockOutcome {
    /// No locked operation has produced this result.
    Unset,
    /// The lock was acquired and the operation ran.
    Completed,
    /// The lock could not be acquired in time; nothing ran.
    TimedOut,
    /// The upgrade condition returned `false`; the write operation never ran.
    ConditionalFailure,
}

impl Default for LockOutcome {
    fn default() -> Self {
        Self::Unset
    }
}

/// The value produced by an operation run under a lock, tagged with how the
/// attempt went. Only a [`LockOutcome::Completed`] result carries a value.
#[derive(Clone, Eq, PartialEq, Debug, Hash)]
pub struct LockResult<T> {
    outcome: LockOutcome,
    value: Option<T>,
}

impl<T> Default for LockResult<T> {
    fn default() -> Self {
        Self::with_outcome(LockOutcome::Unset)
    }
}

impl<T> From<LockResult<T>> for Option<T> {
    fn from(result: LockResult<T>) -> Self {
        result.value
    }
}

impl<T> LockResult<T> {
    fn with_outcome(outcome: LockOutcome) -> Self {
        Self {
            outcome,
            value: None,
        }
    }

    pub fn completed(value: T) -> Self {
        Self {
            outcome: LockOutcome::Completed,
            value: Some(value),
        }
    }

    pub fn timed_out() -> Self {
        Self::with_outcome(LockOutcome::TimedOut)
    }

    pub fn conditional_failure() -> Self {
        Self::with_outcome(LockOutcome::ConditionalFailure)
    }

    #[inline]
    pub fn outcome(&self) -> LockOutcome {
        self.outcome
    }

    #[inline]
    pub fn is_completed(&self) -> bool {
        self.outcome == LockOutcome::Completed
    }

    #[inline]
    pub fn is_timed_out(&self) -> bool {
        self.outcome == LockOutcome::TimedOut
    }

    pub fn value(&self) -> Option<&T> {
        self.value.as_ref()
    }

    pub fn into_value(self) -> Option<T> {
        self.value
    }

    /// Maps the value of a completed result, keeping any other outcome as is.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> LockResult<U> {
        LockResult {
            outcome: self.outcome,
            value: self.value.map(f),
        }
    }
}

/// The mode a [`LockHandle`] holds its lock in.
#[derive(Copy, Clone, Eq, PartialEq, Debug, Hash)]
pub enum LockMode {
    Read,
    Write,
    UpgradableRead,
}

/// An acquired lock which is released exactly once, either through
/// [`release`](Self::release) or when the handle goes out of scope.
#[must_use = "if unused the lock will immediately be released"]
pub struct LockHandle<G> {
    guard: G,
    mode: LockMode,
}

impl<G> LockHandle<G> {
    fn new(guard: G, mode: LockMode) -> Self {
        Self { guard, mode }
    }

    #[inline]
    pub fn mode(&self) -> LockMode {
        self.mode
    }

    /// Releases the lock now instead of at the end of the scope.
    pub fn release(self) {
        tracing::trace!(mode = ?self.mode, "releasing scoped lock");
        drop(self);
    }

    pub fn into_guard(self) -> G {
        self.guard
    }
}

impl<'a, R: RawRwLockUpgrade + 'a, T: ?Sized + 'a> LockHandle<RwLockUpgradableReadGuard<'a, R, T>> {
    /// Atomically upgrades the held upgradable read lock to a write lock.
    pub fn upgrade(self) -> LockHandle<RwLockWriteGuard<'a, R, T>> {
        let guard = RwLockUpgradableReadGuard::upgrade(self.guard);
        LockHandle::new(guard, LockMode::Write)
    }
}

impl<G: Deref> Deref for LockHandle<G> {
    type Target = G::Target;

    fn deref(&self) -> &Self::Target {
        &self.guard
    }
}

impl<G: DerefMut> DerefMut for LockHandle<G> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.guard
    }
}

impl<G> fmt::Debug for LockHandle<G>
where
    G: Deref,
    G::Target: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockHandle")
            .field("mode", &self.mode)
            .field("data", &&*self.guard)
            .finish()
    }
}

/// Runs closures under a reader/writer lock with the acquire and release
/// bracketing done for you.
///
/// Every mode comes in four shapes:
///
/// - `with_*` blocks until the lock is acquired and returns the closure's value,
/// - `try_with_*_for` gives up after a timeout and reports whether the closure ran,
/// - `with_*_for` gives up after a timeout and wraps the value in a [`LockResult`],
/// - `*_scoped` returns a [`LockHandle`] that releases the lock on drop.
///
/// The lock is released on every exit path, including a panic unwinding out
/// of the closure.
///
/// # Examples
///
/// ```
/// use syncguard::{LockOutcome, RwLock, RwLockExt};
/// use std::time::Duration;
///
/// let lock = RwLock::new(Vec::new());
/// lock.with_write(|items| items.push(1));
///
/// let len = lock.with_read_for(Duration::from_millis(10), |items| items.len());
/// assert_eq!(len.into_value(), Some(1));
///
/// let pushed = lock.with_read_then_write(|items| items.len() < 2, |items| {
///     items.push(2);
///     items.len()
/// });
/// assert_eq!(pushed.outcome(), LockOutcome::Completed);
/// ```
pub trait RwLockExt<T: ?Sized> {
    type Raw: RawRwLockUpgradeTimed<Duration = Duration>;

    fn with_read<U, F>(&self, f: F) -> U
    where
        F: FnOnce(&T) -> U;

    fn try_with_read_for<F>(&self, timeout: Duration, f: F) -> bool
    where
        F: FnOnce(&T);

    fn with_read_for<U, F>(&self, timeout: Duration, f: F) -> LockResult<U>
    where
        F: FnOnce(&T) -> U;

    fn read_scoped(&self) -> LockHandle<RwLockReadGuard<'_, Self::Raw, T>>;

    fn with_write<U, F>(&self, f: F) -> U
    where
        F: FnOnce(&mut T) -> U;

    fn try_with_write_for<F>(&self, timeout: Duration, f: F) -> bool
    where
        F: FnOnce(&mut T);

    fn with_write_for<U, F>(&self, timeout: Duration, f: F) -> LockResult<U>
    where
        F: FnOnce(&mut T) -> U;

    fn write_scoped(&self) -> LockHandle<RwLockWriteGuard<'_, Self::Raw, T>>;

    fn with_upgradable_read<U, F>(&self, f: F) -> U
    where
        F: FnOnce(&T) -> U;

    fn try_with_upgradable_read_for<F>(&self, timeout: Duration, f: F) -> bool
    where
        F: FnOnce(&T);

    fn with_upgradable_read_for<U, F>(&self, timeout: Duration, f: F) -> LockResult<U>
    where
        F: FnOnce(&T) -> U;

    fn upgradable_read_scoped(&self) -> LockHandle<RwLockUpgradableReadGuard<'_, Self::Raw, T>>;

    /// Takes an upgradable read lock and runs `condition`. Only if it returns
    /// `true` is the lock upgraded to a write lock for `write`.
    ///
    /// Returns [`LockOutcome::ConditionalFailure`] when `condition` says no,
    /// in which case the write lock is never requested.
    fn with_read_then_write<U, C, W>(&self, condition: C, write: W) -> LockResult<U>
    where
        C: FnOnce(&T) -> bool,
        W: FnOnce(&mut T) -> U;

    /// Like [`with_read_then_write`](Self::with_read_then_write) but gives up
    /// with [`LockOutcome::TimedOut`] if the upgradable read lock is not
    /// acquired within `timeout`.
    ///
    /// The upgrade itself is not bounded: holding the upgradable lock already
    /// shuts out other writers, so it only waits for plain readers to leave.
    fn with_read_then_write_for<U, C, W>(
        &self,
        timeout: Duration,
        condition: C,
        write: W,
    ) -> LockResult<U>
    where
        C: FnOnce(&T) -> bool,
        W: FnOnce(&mut T) -> U;
}

fn upgrade_if<R, T, U, C, W>(
    guard: RwLockUpgradableReadGuard<'_, R, T>,
    condition: C,
    write: W,
) -> LockResult<U>
where
    R: RawRwLockUpgrade,
    T: ?Sized,
    C: FnOnce(&T) -> bool,
    W: FnOnce(&mut T) -> U,
{
    if !condition(&*guard) {
        tracing::trace!("upgrade condition failed, write lock not requested");
        return LockResult::conditional_failure();
    }

    let mut guard = RwLockUpgradableReadGuard::upgrade(guard);
    LockResult::completed(write(&mut *guard))
}

fn timed_out<U>(mode: LockMode, timeout: Duration) -> LockResult<U> {
    tracing::trace!(?mode, ?timeout, "lock acquisition timed out");
    LockResult::timed_out()
}

impl<R: RawRwLockUpgradeTimed<Duration = Duration>, T: ?Sized> RwLockExt<T> for LockApiRwLock<R, T> {
    type Raw = R;

    fn with_read<U, F>(&self, f: F) -> U
    where
        F: FnOnce(&T) -> U,
    {
        let guard = self.read();
        f(&*guard)
    }

    fn try_with_read_for<F>(&self, timeout: Duration, f: F) -> bool
    where
        F: FnOnce(&T),
    {
        self.with_read_for(timeout, f).is_completed()
    }

    fn with_read_for<U, F>(&self, timeout: Duration, f: F) -> LockResult<U>
    where
        F: FnOnce(&T) -> U,
    {
        match self.try_read_for(timeout) {
            Some(guard) => LockResult::completed(f(&*guard)),
            None => timed_out(LockMode::Read, timeout),
        }
    }

    fn read_scoped(&self) -> LockHandle<RwLockReadGuard<'_, R, T>> {
        LockHandle::new(self.read(), LockMode::Read)
    }

    fn with_write<U, F>(&self, f: F) -> U
    where
        F: FnOnce(&mut T) -> U,
    {
        let mut guard = self.write();
        f(&mut *guard)
    }

    fn try_with_write_for<F>(&self, timeout: Duration, f: F) -> bool
    where
        F: FnOnce(&mut T),
    {
        self.with_write_for(timeout, f).is_completed()
    }

    fn with_write_for<U, F>(&self, timeout: Duration, f: F) -> LockResult<U>
    where
        F: FnOnce(&mut T) -> U,
    {
        match self.try_write_for(timeout) {
            Some(mut guard) => LockResult::completed(f(&mut *guard)),
            None => timed_out(LockMode::Write, timeout),
        }
    }

    fn write_scoped(&self) -> LockHandle<RwLockWriteGuard<'_, R, T>> {
        LockHandle::new(self.write(), LockMode::Write)
    }

    fn with_upgradable_read<U, F>(&self, f: F) -> U
    where
        F: FnOnce(&T) -> U,
    {
        let guard = self.upgradable_read();
        f(&*guard)
    }

    fn try_with_upgradable_read_for<F>(&self, timeout: Duration, f: F) -> bool
    where
        F: FnOnce(&T),
    {
        self.with_upgradable_read_for(timeout, f).is_completed()
    }

    fn with_upgradable_read_for<U, F>(&self, timeout: Duration, f: F) -> LockResult<U>
    where
        F: FnOnce(&T) -> U,
    {
        match self.try_upgradable_read_for(timeout) {
            Some(guard) => LockResult::completed(f(&*guard)),
            None => timed_out(LockMode::UpgradableRead, timeout),
        }
    }

    fn upgradable_read_scoped(&self) -> LockHandle<RwLockUpgradableReadGuard<'_, R, T>> {
        LockHandle::new(self.upgradable_read(), LockMode::UpgradableRead)
    }

    fn with_read_then_write<U, C, W>(&self, condition: C, write: W) -> LockResult<U>
    where
        C: FnOnce(&T) -> bool,
        W: FnOnce(&mut T) -> U,
    {
        upgrade_if(self.upgradable_read(), condition, write)
    }

    fn with_read_then_write_for<U, C, W>(
        &self,
        timeout: Duration,
        condition: C,
        write: W,
    ) -> LockResult<U>
    where
        C: FnOnce(&T) -> bool,
        W: FnOnce(&mut T) -> U,
    {
        match self.try_upgradable_read_for(timeout) {
            Some(guard) => upgrade_if(guard, condition, write),
            None => timed_out(LockMode::UpgradableRead, timeout),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{LockMode, LockOutcome, LockResult, RwLockExt};
    use std::{
        panic::{self, AssertUnwindSafe},
        sync::{
            atomic::{AtomicUsize, Ordering},
            Arc,
        },
        thread,
        time::Duration,
    };

    type RwLock<T> = lock_api::RwLock<parking_lot::RawRwLock, T>;

    const SHORT: Duration = Duration::from_millis(20);

    struct Attempts {
        read: bool,
        write: bool,
        upgradable: bool,
    }

    fn attempt_from_other_thread(lock: &Arc<RwLock<usize>>) -> Attempts {
        let lock = lock.clone();
        thread::spawn(move || Attempts {
            read: lock.try_with_read_for(SHORT, |_| {}),
            write: lock.try_with_write_for(SHORT, |_| {}),
            upgradable: lock.try_with_upgradable_read_for(SHORT, |_| {}),
        })
        .join()
        .unwrap()
    }

    #[test]
    fn smoke() {
        let lock = RwLock::new(1usize);
        assert_eq!(lock.with_read(|v| *v), 1);
        lock.with_write(|v| *v += 1);
        assert_eq!(lock.with_upgradable_read(|v| *v), 2);
        assert!(lock.try_with_read_for(SHORT, |v| assert_eq!(*v, 2)));
        assert!(lock.try_with_write_for(SHORT, |v| *v = 3));
        assert!(lock.try_with_upgradable_read_for(SHORT, |v| assert_eq!(*v, 3)));
        assert_eq!(lock.with_read_for(SHORT, |v| *v), LockResult::completed(3));
        assert_eq!(lock.with_write_for(SHORT, |v| *v * 2).into_value(), Some(6));
        assert_eq!(lock.with_upgradable_read_for(SHORT, |v| *v).value(), Some(&3));
    }

    #[test]
    fn write_excludes_all() {
        let lock = Arc::new(RwLock::new(0));
        let handle = lock.write_scoped();
        assert_eq!(handle.mode(), LockMode::Write);

        let attempts = attempt_from_other_thread(&lock);
        assert!(!attempts.read);
        assert!(!attempts.write);
        assert!(!attempts.upgradable);

        let other = lock.clone();
        let result = thread::spawn(move || other.with_read_for(SHORT, |v| *v))
            .join()
            .unwrap();
        assert!(result.is_timed_out());
        assert_eq!(result.value(), None);

        handle.release();
        let attempts = attempt_from_other_thread(&lock);
        assert!(attempts.read && attempts.write && attempts.upgradable);
    }

    #[test]
    fn read_admits_readers_and_one_upgrader() {
        let lock = Arc::new(RwLock::new(0));
        let handle = lock.read_scoped();
        assert_eq!(handle.mode(), LockMode::Read);
        assert_eq!(*handle, 0);

        let attempts = attempt_from_other_thread(&lock);
        assert!(attempts.read);
        assert!(!attempts.write);
        assert!(attempts.upgradable);
        drop(handle);
    }

    #[test]
    fn upgradable_read_excludes_upgraders_and_writers() {
        let lock = Arc::new(RwLock::new(0));
        let handle = lock.upgradable_read_scoped();
        assert_eq!(handle.mode(), LockMode::UpgradableRead);

        let attempts = attempt_from_other_thread(&lock);
        assert!(attempts.read);
        assert!(!attempts.write);
        assert!(!attempts.upgradable);

        let mut handle = handle.upgrade();
        assert_eq!(handle.mode(), LockMode::Write);
        *handle = 5;
        let attempts = attempt_from_other_thread(&lock);
        assert!(!attempts.read);
        drop(handle);

        assert_eq!(lock.with_read(|v| *v), 5);
    }

    #[test]
    fn release_on_panic() {
        let lock = RwLock::new(0);
        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            lock.with_write(|_| panic!("operation failed"))
        }));
        assert!(result.is_err());
        assert!(lock.try_with_write_for(SHORT, |v| *v = 1));

        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            lock.with_read_then_write(|_| true, |_: &mut i32| -> i32 { panic!("operation failed") })
        }));
        assert!(result.is_err());
        assert!(lock.try_with_upgradable_read_for(SHORT, |v| assert_eq!(*v, 1)));
    }

    #[test]
    fn conditional_failure_never_writes() {
        let lock = RwLock::new(0);
        let writes = AtomicUsize::new(0);

        let result = lock.with_read_then_write(
            |v| *v > 0,
            |v| {
                writes.fetch_add(1, Ordering::Relaxed);
                *v += 1;
                *v
            },
        );
        assert_eq!(result, LockResult::conditional_failure());
        assert_eq!(result.outcome(), LockOutcome::ConditionalFailure);
        assert_eq!(writes.load(Ordering::Relaxed), 0);
        assert_eq!(lock.with_read(|v| *v), 0);
    }

    #[test]
    fn conditional_success_writes_once() {
        let lock = RwLock::new(0);
        let writes = AtomicUsize::new(0);

        let result = lock.with_read_then_write(
            |v| *v == 0,
            |v| {
                writes.fetch_add(1, Ordering::Relaxed);
                *v += 10;
                *v
            },
        );
        assert_eq!(result, LockResult::completed(10));
        assert_eq!(writes.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn conditional_upgrade_times_out() {
        let lock = Arc::new(RwLock::new(0));
        let handle = lock.upgradable_read_scoped();

        let other = lock.clone();
        let result = thread::spawn(move || {
            other.with_read_then_write_for(SHORT, |_| true, |v| {
                *v += 1;
                *v
            })
        })
        .join()
        .unwrap();
        assert_eq!(result.outcome(), LockOutcome::TimedOut);
        drop(handle);

        let result = lock.with_read_then_write_for(SHORT, |_| true, |v| {
            *v += 1;
            *v
        });
        assert_eq!(result.into_value(), Some(1));
    }

    #[test]
    fn lock_result_values() {
        let unset = LockResult::<u32>::default();
        assert_eq!(unset.outcome(), LockOutcome::Unset);
        assert_eq!(unset.value(), None);

        let done = LockResult::completed(4u32);
        assert!(done.is_completed());
        assert_ne!(done, LockResult::completed(5));
        assert_eq!(done.clone().map(|v| v * 2), LockResult::completed(8));
        let value: Option<u32> = done.into();
        assert_eq!(value, Some(4));

        let timed_out = LockResult::<u32>::timed_out().map(|v| v + 1);
        assert!(timed_out.is_timed_out());
        assert_eq!(timed_out.into_value(), None);
    }
}
