use crate::{Error, Result};
use std::{
    fmt,
    hash::{Hash, Hasher},
    ptr,
    sync::atomic::{AtomicBool, Ordering},
};

/// A boolean which can be read and written from many threads at once.
///
/// Every read and write is a single atomic operation so no torn or
/// intermediate value is ever observed. Comparing two flags reads each one
/// atomically, but the two reads happen at different instants.
///
/// `AtomicFlag` is intentionally neither `Clone` nor `Copy`. Share it through
/// a reference or an [`Arc`](std::sync::Arc).
///
/// # Examples
///
/// ```
/// use syncguard::AtomicFlag;
///
/// let flag = AtomicFlag::new(false);
/// flag.set(true);
/// assert!(flag.get());
/// assert!(flag == true);
/// ```
#[derive(Default)]
pub struct AtomicFlag {
    value: AtomicBool,
}

impl AtomicFlag {
    pub const fn new(value: bool) -> Self {
        Self {
            value: AtomicBool::new(value),
        }
    }

    #[inline]
    pub fn get(&self) -> bool {
        self.value.load(Ordering::Acquire)
    }

    #[inline]
    pub fn set(&self, value: bool) {
        self.value.store(value, Ordering::Release);
    }

    /// Stores `value` and returns the previous one.
    #[inline]
    pub fn swap(&self, value: bool) -> bool {
        self.value.swap(value, Ordering::AcqRel)
    }

    /// Stores `new` only if the flag currently holds `current`.
    ///
    /// On success returns the previous value, on failure the value that was
    /// observed instead.
    #[inline]
    pub fn compare_exchange(&self, current: bool, new: bool) -> Result<bool, bool> {
        self.value
            .compare_exchange(current, new, Ordering::AcqRel, Ordering::Acquire)
    }

    pub fn into_inner(self) -> bool {
        self.value.into_inner()
    }

    /// Reads a flag which may not be there.
    ///
    /// Returns [`Error::InvalidArgument`] when `flag` is `None`.
    pub fn value_of(flag: Option<&Self>) -> Result<bool> {
        flag.map(Self::get)
            .ok_or(Error::InvalidArgument("cannot convert an absent AtomicFlag to bool"))
    }
}

impl From<bool> for AtomicFlag {
    fn from(value: bool) -> Self {
        Self::new(value)
    }
}

impl From<&AtomicFlag> for bool {
    fn from(flag: &AtomicFlag) -> Self {
        flag.get()
    }
}

impl PartialEq for AtomicFlag {
    fn eq(&self, other: &Self) -> bool {
        ptr::eq(self, other) || self.get() == other.get()
    }
}

impl Eq for AtomicFlag {}

impl PartialEq<bool> for AtomicFlag {
    fn eq(&self, other: &bool) -> bool {
        self.get() == *other
    }
}

impl Hash for AtomicFlag {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.get().hash(state)
    }
}

impl fmt::Debug for AtomicFlag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("AtomicFlag").field(&self.get()).finish()
    }
}

impl fmt::Display for AtomicFlag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.get(), f)
    }
}
