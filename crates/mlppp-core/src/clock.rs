//! Monotonic time source.

use std::fmt::Debug;
use std::time::Instant;

/// Source of the current instant.
///
/// Timers read time through this so tests can drive them deterministically.
pub trait Clock: Debug + Send + Sync {
    /// The current instant.
    fn now(&self) -> Instant;
}

/// The real monotonic clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}
