use std::{
    fmt,
    ops::Deref,
    sync::atomic::{AtomicU8, Ordering},
};

const ALLOCATED: u8 = 0;
const DISPOSING: u8 = 1;
const DISPOSED: u8 = 2;

/// Teardown hooks for a resource held by a [`Disposable`].
///
/// Both hooks default to doing nothing. They run at most once, managed
/// resources first.
pub trait Release {
    /// Frees resources owned by other Rust values, like handles and buffers.
    fn release_managed(&self) {}

    /// Frees raw resources, like file descriptors or foreign allocations.
    fn release_unmanaged(&self) {}
}

/// Wraps a resource so that its teardown runs exactly once, no matter how
/// many threads call [`dispose`](Self::dispose) concurrently.
///
/// Only the first caller runs the [`Release`] hooks. Every other call returns
/// immediately without waiting for that teardown to finish. Dropping a
/// `Disposable` which was never disposed disposes it.
///
/// # Examples
///
/// ```
/// use syncguard::{Disposable, Release};
/// use std::sync::atomic::{AtomicUsize, Ordering};
///
/// #[derive(Default)]
/// struct Connection {
///     closed: AtomicUsize,
/// }
///
/// impl Release for Connection {
///     fn release_managed(&self) {
///         self.closed.fetch_add(1, Ordering::Relaxed);
///     }
/// }
///
/// let conn = Disposable::new(Connection::default());
/// assert!(conn.dispose());
/// assert!(!conn.dispose());
/// assert_eq!(conn.closed.load(Ordering::Relaxed), 1);
/// assert!(!conn.is_allocated());
/// ```
pub struct Disposable<R: Release> {
    state: AtomicU8,
    resource: R,
}

impl<R: Release + Default> Default for Disposable<R> {
    fn default() -> Self {
        Self::new(R::default())
    }
}

impl<R: Release> From<R> for Disposable<R> {
    fn from(resource: R) -> Self {
        Self::new(resource)
    }
}

impl<R: Release + fmt::Debug> fmt::Debug for Disposable<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Disposable")
            .field("allocated", &self.is_allocated())
            .field("resource", &self.resource)
            .finish()
    }
}

impl<R: Release> Disposable<R> {
    pub const fn new(resource: R) -> Self {
        Self {
            state: AtomicU8::new(ALLOCATED),
            resource,
        }
    }

    /// Returns `false` as soon as disposal has started, even if the
    /// teardown is still running on another thread.
    #[inline]
    pub fn is_allocated(&self) -> bool {
        self.state.load(Ordering::Acquire) == ALLOCATED
    }

    /// Returns `true` once the teardown has finished.
    #[inline]
    pub fn is_disposed(&self) -> bool {
        self.state.load(Ordering::Acquire) == DISPOSED
    }

    #[inline]
    pub fn get(&self) -> &R {
        &self.resource
    }

    /// Runs the teardown hooks if nobody has yet.
    ///
    /// Returns `true` for the single call which ran them.
    pub fn dispose(&self) -> bool {
        if let Err(state) =
            self.state
                .compare_exchange(ALLOCATED, DISPOSING, Ordering::Acquire, Ordering::Relaxed)
        {
            tracing::trace!(state, "dispose lost the race, nothing to do");
            return false;
        }

        tracing::debug!("disposing resource");
        self.resource.release_managed();
        self.resource.release_unmanaged();
        self.state.store(DISPOSED, Ordering::Release);
        true
    }
}

impl<R: Release> Deref for Disposable<R> {
    type Target = R;

    fn deref(&self) -> &R {
        &self.resource
    }
}

impl<R: Release> Drop for Disposable<R> {
    fn drop(&mut self) {
        let _ = self.dispose();
    }
}
