//! Idle supervision.
//!
//! One timer plus the instant of the last qualifying traffic (`done`).
//! Traffic only moves `done`; it never re-arms the timer. When the timer
//! comes due it re-checks the time elapsed since `done` and either reports
//! expiry or re-arms itself for `done + timeout`.

use std::time::{Duration, Instant};

/// Outcome of polling the supervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdleCheck {
    /// The timer is not armed.
    NotArmed,
    /// The timer is armed and not yet due.
    NotDue,
    /// Traffic was seen since arming; the timer moved out.
    Rearmed,
    /// Nothing qualifying happened for a full timeout. The timer is now
    /// disarmed.
    Expired,
}

/// Idle timer state.
#[derive(Debug, Clone, Default)]
pub struct IdleSupervisor {
    timeout: u32,
    done: Option<Instant>,
    deadline: Option<Instant>,
}

impl IdleSupervisor {
    /// A disarmed supervisor with the given timeout in seconds (`0`
    /// disables).
    #[must_use]
    pub fn new(timeout: u32) -> Self {
        Self {
            timeout,
            done: None,
            deadline: None,
        }
    }

    /// Configured timeout in seconds.
    #[must_use]
    pub fn timeout(&self) -> u32 {
        self.timeout
    }

    /// Change the timeout. Does not arm or disarm; `0` disarms.
    pub fn set_timeout(&mut self, secs: u32) {
        self.timeout = secs;
        if secs == 0 {
            self.stop();
        }
    }

    /// Arm the timer for a full timeout from `now`. A zero timeout leaves
    /// it disarmed.
    pub fn start(&mut self, now: Instant) {
        if self.timeout == 0 {
            self.stop();
            return;
        }
        self.done = Some(now);
        self.deadline = now.checked_add(self.period());
    }

    /// Disarm the timer.
    pub fn stop(&mut self) {
        self.deadline = None;
    }

    /// Whether the timer is armed.
    #[must_use]
    pub fn is_armed(&self) -> bool {
        self.deadline.is_some()
    }

    /// Record qualifying traffic.
    pub fn note_traffic(&mut self, now: Instant) {
        self.done = Some(now);
    }

    /// Seconds left before the bundle counts as idle, or `None` when the
    /// timer is not armed.
    #[must_use]
    pub fn remaining(&self, now: Instant) -> Option<u32> {
        self.deadline?;
        let done = self.done?;
        let elapsed = now.saturating_duration_since(done).as_secs();
        let left = u64::from(self.timeout).saturating_sub(elapsed);
        Some(u32::try_from(left).unwrap_or(u32::MAX))
    }

    /// When the timer next needs attention.
    #[must_use]
    pub fn next_deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Check the timer against `now`.
    pub fn poll(&mut self, now: Instant) -> IdleCheck {
        let Some(deadline) = self.deadline else {
            return IdleCheck::NotArmed;
        };
        if now < deadline {
            return IdleCheck::NotDue;
        }
        let done = self.done.unwrap_or(deadline);
        if now.saturating_duration_since(done) >= self.period() {
            self.deadline = None;
            IdleCheck::Expired
        } else {
            self.deadline = done.checked_add(self.period());
            IdleCheck::Rearmed
        }
    }

    fn period(&self) -> Duration {
        Duration::from_secs(u64::from(self.timeout))
    }
}
