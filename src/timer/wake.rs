//! Wake-lock seam.
//!
//! Keeping the screen on during a rest period is a user-experience
//! concern only; the countdown stays correct whether or not a lock is
//! held, so every failure here is non-fatal.

use thiserror::Error;

/// Errors from wake-lock acquisition.
#[derive(Debug, Error)]
pub enum WakeLockError {
    /// The platform refused or does not support the lock
    #[error("Wake lock unavailable: {0}")]
    Unavailable(String),
}

/// Platform primitive that discourages the device from sleeping while
/// held. Implemented by the embedding application; the timer only
/// drives acquire/release around its active period.
pub trait WakeLock: Send {
    /// Request the lock. Best-effort; callers swallow failures.
    fn acquire(&mut self) -> Result<(), WakeLockError>;

    /// Release the lock if held. Must be safe to call when not held.
    fn release(&mut self);
}

/// Default no-op implementation for platforms without a wake lock.
#[derive(Debug, Default)]
pub struct NoopWakeLock;

impl WakeLock for NoopWakeLock {
    fn acquire(&mut self) -> Result<(), WakeLockError> {
        Ok(())
    }

    fn release(&mut self) {}
}
