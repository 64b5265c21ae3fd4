#![warn(
    rust_2018_idioms,
    unreachable_pub,
    missing_debug_implementations,
)]

//! Small concurrency primitives for coordinating OS threads: an atomic
//! flag, single-flight reentrancy guards, reader/writer lock helpers with
//! timeouts, one-shot disposal and a start/finish rendezvous.

mod atomic_flag;
mod coordinated;
mod disposable;
mod error;
mod event;
mod lock;
mod reentrancy;
mod wait_queue;

pub use self::{
    atomic_flag::AtomicFlag,
    coordinated::{CoordinatedOperation, OperationResult},
    disposable::{Disposable, Release},
    error::{Error, Result},
    event::ResetEvent,
    lock::{LockHandle, LockMode, LockOutcome, LockResult, RwLockExt},
    reentrancy::{Entered, GuardResult, ReentrancyGuard, WaitableReentrancyGuard},
};

#[cfg(feature = "parking_lot")]
pub use self::lock::{ReadHandle, RwLock, UpgradableReadHandle, WriteHandle};
