//! WaitBridge - one thread's blocking wait on one object
//!
//! The bridge turns observer callbacks into a single wakeup. `begin`
//! attaches an observer to the object behind a handle, the caller then
//! blocks on an `Event` with no lock held, and `end` detaches and hands back
//! every signal bit seen while attached.
//!
//! ## Accumulation
//!
//! A state change can satisfy the wait and then be undone before the
//! waiting thread is scheduled again. The bridge therefore ORs every state it
//! observes into `wakeup_reasons` instead of keeping only the latest one.
//!
//! ## Cancellation
//!
//! Closing the handle being waited through is the only path that detaches
//! the observer on the object's initiative. It adds `HANDLE_CLOSED` to the
//! reasons, so a caller that inspects the result after `end` always sees the
//! cancellation even if a satisfying state arrived first.

use alloc::sync::Arc;
use core::sync::atomic::{AtomicU32, Ordering};

use log::trace;

use super::dispatcher::Dispatcher;
use super::handle::{Handle, HandleId};
use super::observer::{ObserverFlags, ObserverId, StateObserver};
use super::signals::Signals;
use crate::error::{KError, Result};
use crate::sync::{Event, WakeStatus};

/// Observer half of a wait, shared with the object while attached
struct WaitObserver {
    event: Arc<Event>,
    handle: HandleId,
    watched: Signals,
    wakeup_reasons: AtomicU32,
}

impl WaitObserver {
    fn accumulate(&self, state: Signals) {
        self.wakeup_reasons.fetch_or(state.bits(), Ordering::AcqRel);
        if state.satisfies(self.watched) {
            self.event.signal();
        }
    }

    fn reasons(&self) -> Signals {
        Signals::from_bits_retain(self.wakeup_reasons.load(Ordering::Acquire))
    }
}

impl StateObserver for WaitObserver {
    fn on_initialize(&self, initial: Signals) -> ObserverFlags {
        self.accumulate(initial);
        ObserverFlags::empty()
    }

    fn on_state_change(&self, new_state: Signals) -> ObserverFlags {
        self.accumulate(new_state);
        ObserverFlags::empty()
    }

    fn on_cancel(&self, handle: HandleId) -> ObserverFlags {
        if handle != self.handle {
            return ObserverFlags::empty();
        }
        self.wakeup_reasons
            .fetch_or(Signals::HANDLE_CLOSED.bits(), Ordering::AcqRel);
        self.event.signal_with(WakeStatus::Canceled);
        ObserverFlags::NEED_REMOVAL | ObserverFlags::HANDLED
    }
}

struct Attachment {
    object: Arc<dyn Dispatcher>,
    observer: Arc<WaitObserver>,
    id: Option<ObserverId>,
}

/// Adapter from observer notifications to a single blocking wait
///
/// Dropping a bridge that is still attached detaches it.
#[derive(Default)]
pub struct WaitBridge {
    attached: Option<Attachment>,
}

impl WaitBridge {
    pub const fn new() -> Self {
        Self { attached: None }
    }

    /// Attach to the object behind `handle`
    ///
    /// If the object already asserts a watched bit, `event` is signaled
    /// before this returns.
    ///
    /// # Errors
    /// `AlreadyBound` if called again without an intervening `end`.
    pub fn begin(&mut self, event: Arc<Event>, handle: &Handle, watched: Signals) -> Result<()> {
        if self.attached.is_some() {
            return Err(KError::AlreadyBound);
        }
        let observer = Arc::new(WaitObserver {
            event,
            handle: handle.id(),
            watched,
            wakeup_reasons: AtomicU32::new(0),
        });
        let object = handle.object().clone();
        let id = object.base().add_observer(observer.clone());
        trace!(
            "[wait] begin on {} watching {:#x}",
            object.koid(),
            watched.bits()
        );
        self.attached = Some(Attachment {
            object,
            observer,
            id,
        });
        Ok(())
    }

    /// Detach and return every signal bit observed while attached
    ///
    /// # Panics
    /// If the bridge is not attached.
    pub fn end(&mut self) -> Signals {
        let attachment = self.attached.take();
        assert!(attachment.is_some(), "wait bridge ended without begin");
        match attachment {
            Some(attachment) => Self::detach(attachment),
            None => Signals::empty(),
        }
    }

    /// Check whether `begin` has been called without a matching `end`
    #[inline]
    pub fn is_attached(&self) -> bool {
        self.attached.is_some()
    }

    fn detach(attachment: Attachment) -> Signals {
        if let Some(id) = attachment.id {
            // Already gone if the handle was closed while we waited.
            attachment.object.base().remove_observer(id);
        }
        let reasons = attachment.observer.reasons();
        trace!(
            "[wait] end on {} with {:#x}",
            attachment.object.koid(),
            reasons.bits()
        );
        reasons
    }
}

impl Drop for WaitBridge {
    fn drop(&mut self) {
        if let Some(attachment) = self.attached.take() {
            Self::detach(attachment);
        }
    }
}

/// Result of a completed wait
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitOutcome {
    /// `Ok` when a watched bit was seen, otherwise why the wait ended
    pub status: Result<()>,
    /// Union of the states observed while attached
    pub observed: Signals,
}

impl WaitOutcome {
    /// Decide the outcome of a wait from the accumulated reasons
    ///
    /// A closed handle beats a satisfied condition, and a satisfied condition
    /// beats an elapsed deadline.
    pub fn resolve(observed: Signals, watched: Signals, wait: Result<WakeStatus>) -> Self {
        let status = if observed.contains(Signals::HANDLE_CLOSED) {
            Err(KError::Canceled)
        } else if observed.satisfies(watched) {
            Ok(())
        } else {
            match wait {
                Ok(_) => Err(KError::Internal),
                Err(err) => Err(err),
            }
        };
        Self { status, observed }
    }
}
