use std::io;
use thiserror::Error;

/// Contract violations reported by the primitives in this crate.
///
/// Timeouts and blocked guards are not errors; they come back as values
/// such as [`LockOutcome::TimedOut`](crate::LockOutcome::TimedOut) or
/// [`GuardResult::GuardBlocked`](crate::GuardResult::GuardBlocked).
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),
    #[error("invalid state: {0}")]
    InvalidState(&'static str),
    #[error("failed to spawn worker thread: {0}")]
    Spawn(#[from] io::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
