use super::event::ResetEvent;
use std::{
    fmt,
    sync::atomic::{AtomicU8, Ordering},
    time::Duration,
};

const ALLOWED: u8 = 0;
const PREVENTED: u8 = 1;

/// Outcome of running a boolean operation through a reentrancy guard.
#[derive(Copy, Clone, Eq, PartialEq, Debug, Hash)]
pub enum GuardResult {
    /// The operation ran and returned `true`.
    Success,
    /// The operation ran and returned `false`.
    Fail,
    /// The operation did not run because another execution was in flight.
    GuardBlocked,
}

impl GuardResult {
    #[inline]
    pub fn is_blocked(self) -> bool {
        self == Self::GuardBlocked
    }
}

trait Gate {
    fn try_enter(&self) -> bool;

    fn exit(&self);
}

/// Proof of a successful entry into a guard. Dropping it exits the guard.
#[must_use = "the guard is exited as soon as this value is dropped"]
pub struct Entered<'a> {
    gate: &'a dyn Gate,
}

impl<'a> Drop for Entered<'a> {
    fn drop(&mut self) {
        self.gate.exit();
    }
}

impl<'a> fmt::Debug for Entered<'a> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad("Entered { .. }")
    }
}

fn enter(gate: &dyn Gate) -> Option<Entered<'_>> {
    if gate.try_enter() {
        Some(Entered { gate })
    } else {
        tracing::trace!("guarded operation blocked by an execution in flight");
        None
    }
}

fn run_guarded(gate: &dyn Gate, operation: impl FnOnce() -> bool) -> GuardResult {
    match enter(gate) {
        None => GuardResult::GuardBlocked,
        Some(_entered) => match operation() {
            true => GuardResult::Success,
            false => GuardResult::Fail,
        },
    }
}

fn run_guarded_unit(gate: &dyn Gate, operation: impl FnOnce()) -> bool {
    enter(gate).map(|_entered| operation()).is_some()
}

/// A single-flight gate: at most one guarded execution at a time.
///
/// Unlike a reentrant mutex the guard is not tied to a thread. While one
/// execution is in flight every other attempt, from this thread or any
/// other, is rejected with [`GuardResult::GuardBlocked`] instead of waiting.
///
/// # Examples
///
/// ```
/// use syncguard::{GuardResult, ReentrancyGuard};
///
/// let guard = ReentrancyGuard::new();
/// let result = guard.run_guarded(|| {
///     // Nested attempts are blocked while the outer one runs.
///     assert_eq!(guard.run_guarded(|| true), GuardResult::GuardBlocked);
///     true
/// });
/// assert_eq!(result, GuardResult::Success);
/// assert!(!guard.is_reentrancy_prevented());
/// ```
#[derive(Default)]
pub struct ReentrancyGuard {
    state: AtomicU8,
}

impl fmt::Debug for ReentrancyGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReentrancyGuard")
            .field("prevented", &self.is_reentrancy_prevented())
            .finish()
    }
}

impl Gate for ReentrancyGuard {
    fn try_enter(&self) -> bool {
        ReentrancyGuard::try_enter(self)
    }

    fn exit(&self) {
        ReentrancyGuard::exit(self)
    }
}

impl ReentrancyGuard {
    pub const fn new() -> Self {
        Self {
            state: AtomicU8::new(ALLOWED),
        }
    }

    /// Returns `true` while a guarded execution is in flight.
    #[inline]
    pub fn is_reentrancy_prevented(&self) -> bool {
        self.state.load(Ordering::Acquire) == PREVENTED
    }

    /// Tries to claim the guard without blocking.
    ///
    /// Every successful call must be paired with exactly one [`exit`](Self::exit).
    /// Prefer [`enter`](Self::enter) which pairs them automatically.
    #[inline]
    pub fn try_enter(&self) -> bool {
        self.state
            .compare_exchange(ALLOWED, PREVENTED, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
    }

    /// Releases the guard. Calling it on a free guard has no effect.
    #[inline]
    pub fn exit(&self) {
        self.state.store(ALLOWED, Ordering::Release);
    }

    /// Claims the guard, returning a value which exits it when dropped.
    pub fn enter(&self) -> Option<Entered<'_>> {
        enter(self)
    }

    /// Runs `operation` unless another execution is in flight.
    ///
    /// The guard is released on every exit path, including a panic unwinding
    /// out of `operation`.
    pub fn run_guarded(&self, operation: impl FnOnce() -> bool) -> GuardResult {
        run_guarded(self, operation)
    }

    /// Runs `operation` unless another execution is in flight, returning
    /// whether it ran.
    pub fn run_guarded_unit(&self, operation: impl FnOnce()) -> bool {
        run_guarded_unit(self, operation)
    }
}

/// A [`ReentrancyGuard`] other threads can wait on.
///
/// Each successful entry resets a completion event and each exit sets it,
/// so [`wait_for_completion`](Self::wait_for_completion) blocks until the
/// execution in flight (if any) is done.
///
/// Completion is only a hint: by the time a waiter acts on it another thread
/// may already have entered again. Callers who need the guard for themselves
/// should loop on [`try_enter`](Self::try_enter).
#[derive(Debug)]
pub struct WaitableReentrancyGuard {
    guard: ReentrancyGuard,
    completed: ResetEvent,
}

impl Default for WaitableReentrancyGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Gate for WaitableReentrancyGuard {
    fn try_enter(&self) -> bool {
        WaitableReentrancyGuard::try_enter(self)
    }

    fn exit(&self) {
        WaitableReentrancyGuard::exit(self)
    }
}

impl WaitableReentrancyGuard {
    pub const fn new() -> Self {
        Self {
            guard: ReentrancyGuard::new(),
            completed: ResetEvent::new(true),
        }
    }

    #[inline]
    pub fn is_reentrancy_prevented(&self) -> bool {
        self.guard.is_reentrancy_prevented()
    }

    pub fn try_enter(&self) -> bool {
        if !self.guard.try_enter() {
            return false;
        }

        self.completed.reset();
        true
    }

    pub fn exit(&self) {
        // Waiters woken by `set` must find the guard already allowed.
        self.guard.exit();
        self.completed.set();
    }

    pub fn enter(&self) -> Option<Entered<'_>> {
        enter(self)
    }

    pub fn run_guarded(&self, operation: impl FnOnce() -> bool) -> GuardResult {
        run_guarded(self, operation)
    }

    pub fn run_guarded_unit(&self, operation: impl FnOnce()) -> bool {
        run_guarded_unit(self, operation)
    }

    /// Blocks until no guarded execution is in flight.
    pub fn wait_for_completion(&self) {
        self.completed.wait()
    }

    /// Like [`wait_for_completion`](Self::wait_for_completion) but gives up
    /// after `timeout`, returning whether completion was observed.
    pub fn wait_for_completion_for(&self, timeout: Duration) -> bool {
        self.completed.wait_for(timeout)
    }
}
