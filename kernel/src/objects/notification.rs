//! Notification - user-signalable kernel object
//!
//! A notification carries no data. Its only state is the signal mask, and
//! holders of a `SIGNAL` handle may raise or clear the user bits and the
//! generic `SIGNALED` bit. Every other bit is reserved for the kernel.
//!
//! ## Use Cases
//!
//! - Cross-thread wakeups through `wait_one` / `wait_many`
//! - Triggering asynchronous port waits
//! - Exercising the observer path in tests

use alloc::sync::Arc;

use log::trace;

use super::dispatcher::{impl_dispatcher_any, Dispatcher, ObjectType};
use super::kobject::{KernelObject, ObjectBase};
use super::signals::Signals;
use crate::error::{KError, Result};

/// Bits user space may change on a notification
pub const NOTIFICATION_SIGNALS: Signals =
    Signals::from_bits_retain(Signals::USER_ALL.bits() | Signals::SIGNALED.bits());

/// Notification object
#[derive(Debug)]
pub struct Notification {
    base: KernelObject,
}

impl Notification {
    /// Create an unsignaled notification
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            base: KernelObject::with_signals(Signals::empty()),
        })
    }

    /// Clear then set signal bits
    ///
    /// # Errors
    /// `InvalidArgs` if either mask touches a kernel-reserved bit.
    pub fn signal(&self, clear: Signals, set: Signals) -> Result<()> {
        if !NOTIFICATION_SIGNALS.contains(clear | set) {
            return Err(KError::InvalidArgs);
        }
        trace!(
            "[notification] {} clear {:#x} set {:#x}",
            self.base.koid(),
            clear.bits(),
            set.bits()
        );
        self.base.update_state(clear, set);
        Ok(())
    }

    /// Current signal state
    #[inline]
    pub fn signals(&self) -> Signals {
        self.base.signals()
    }
}

impl Dispatcher for Notification {
    fn base(&self) -> &dyn ObjectBase {
        &self.base
    }

    fn object_type(&self) -> ObjectType {
        ObjectType::Notification
    }

    impl_dispatcher_any!();
}
