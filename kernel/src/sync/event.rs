//! Event - the blocking primitive behind every wait in the object core
//!
//! An `Event` is an auto-unsignaling latch: `signal` deposits a single wake
//! token, and exactly one waiter consumes it. Signaling an event that is
//! already signaled is a no-op, so a burst of state changes collapses into
//! one wakeup. Waiters learn *what* happened from the observer that
//! signaled them, not from the event.
//!
//! ## Design
//!
//! The token lives in a `crossbeam` bounded channel of capacity one. That
//! gives us a lock-free signal path that is safe to call while an object
//! lock is held, and a deadline-aware blocking receive for the wait path.

use core::time::Duration;
use std::time::Instant;

use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender, TrySendError};

use crate::error::{KError, Result};

/// Point in time after which a blocking wait gives up
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Deadline {
    /// Block until signaled
    Infinite,
    /// Block until signaled or this instant passes
    At(Instant),
}

impl Deadline {
    /// Deadline `timeout` from now
    ///
    /// Saturates to `Infinite` if the instant is not representable.
    pub fn after(timeout: Duration) -> Self {
        Instant::now()
            .checked_add(timeout)
            .map_or(Deadline::Infinite, Deadline::At)
    }

    /// Deadline that has already passed (poll)
    pub fn now() -> Self {
        Deadline::At(Instant::now())
    }

    /// Decode a relative deadline in nanoseconds (`u64::MAX` means infinite)
    pub fn from_nanos(nanos: u64) -> Self {
        if nanos == u64::MAX {
            Deadline::Infinite
        } else {
            Deadline::after(Duration::from_nanos(nanos))
        }
    }

    /// Check whether the deadline has passed
    pub fn has_passed(&self) -> bool {
        match self {
            Deadline::Infinite => false,
            Deadline::At(when) => Instant::now() >= *when,
        }
    }
}

/// Why a waiter was woken
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WakeStatus {
    /// A watched condition became true
    Signaled,
    /// The handle being waited through was closed
    Canceled,
}

/// Auto-unsignaling event
pub struct Event {
    tx: Sender<WakeStatus>,
    rx: Receiver<WakeStatus>,
}

impl Event {
    /// Create an unsignaled event
    pub fn new() -> Self {
        let (tx, rx) = channel::bounded(1);
        Self { tx, rx }
    }

    /// Signal with a normal wake
    ///
    /// Returns `true` if the event transitioned from unsignaled to signaled.
    #[inline]
    pub fn signal(&self) -> bool {
        self.signal_with(WakeStatus::Signaled)
    }

    /// Signal with an explicit wake status
    ///
    /// Never blocks. If a token is already pending the first status wins.
    pub fn signal_with(&self, status: WakeStatus) -> bool {
        match self.tx.try_send(status) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => false,
            // We own the receiver, so the channel cannot be disconnected.
            Err(TrySendError::Disconnected(_)) => false,
        }
    }

    /// Drop a pending wake token, if any
    pub fn unsignal(&self) {
        while self.rx.try_recv().is_ok() {}
    }

    /// Check whether a wake token is pending
    #[inline]
    pub fn is_signaled(&self) -> bool {
        !self.rx.is_empty()
    }

    /// Block until signaled or the deadline elapses
    ///
    /// Consumes the wake token. Never call this while holding an object lock.
    ///
    /// # Errors
    /// `TimedOut` if the deadline passes first.
    pub fn wait(&self, deadline: Deadline) -> Result<WakeStatus> {
        match deadline {
            Deadline::Infinite => self.rx.recv().map_err(|_| KError::Internal),
            Deadline::At(when) => self.rx.recv_deadline(when).map_err(|e| match e {
                RecvTimeoutError::Timeout => KError::TimedOut,
                RecvTimeoutError::Disconnected => KError::Internal,
            }),
        }
    }
}

impl Default for Event {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Debug for Event {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Event")
            .field("signaled", &self.is_signaled())
            .finish()
    }
}
