//! State observers
//!
//! A `StateObserver` is anything that wants to be told, synchronously, when
//! an object's signal state changes or when the handle it watches through is
//! closed. Blocked threads (`WaitBridge`), asynchronous port waits
//! (`PortObserver`) and test hooks all implement the same four callbacks.
//!
//! ## Calling Convention
//!
//! Every callback runs with the owning object's lock held. Observers must
//! therefore never call back into the object they observe and must never
//! block. The return value tells the object whether to detach the observer
//! right after the callback (`NEED_REMOVAL`) and whether a cancel request was
//! consumed (`HANDLED`).

use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicU64, Ordering};

use bitflags::bitflags;

use super::handle::HandleId;
use super::kobject::Koid;
use super::signals::Signals;

bitflags! {
    /// Result flags returned by observer callbacks
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ObserverFlags: u8 {
        /// Detach this observer immediately after the callback returns
        const NEED_REMOVAL = 1 << 0;
        /// The cancel request was meant for this observer
        const HANDLED = 1 << 1;
    }
}

/// Capability interface for synchronous state-change notification
pub trait StateObserver: Send + Sync {
    /// Called once, at attach time, with the object's current state
    fn on_initialize(&self, initial: Signals) -> ObserverFlags;

    /// Called whenever the object's signal state actually changes
    fn on_state_change(&self, new_state: Signals) -> ObserverFlags;

    /// Called when a handle to the object is closed
    fn on_cancel(&self, handle: HandleId) -> ObserverFlags;

    /// Called for a keyed cancel issued through a port
    fn on_cancel_by_key(&self, handle: HandleId, port: Koid, key: u64) -> ObserverFlags {
        let _ = (handle, port, key);
        ObserverFlags::empty()
    }

    /// Called after the object detached this observer on its own
    fn on_removed(&self) {}
}

/// Token naming one attachment of an observer to an object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(u64);

impl ObserverId {
    fn next() -> Self {
        static NEXT_ID: AtomicU64 = AtomicU64::new(1);
        ObserverId(NEXT_ID.fetch_add(1, Ordering::Relaxed))
    }
}

struct ObserverEntry {
    id: ObserverId,
    observer: Arc<dyn StateObserver>,
}

/// Observers attached to one object
///
/// Only reachable through the owning object's lock. Insertion order is kept
/// so notification order is deterministic per call, but nothing relies on it.
#[derive(Default)]
pub(crate) struct ObserverList {
    entries: Vec<ObserverEntry>,
}

impl ObserverList {
    pub(crate) const fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    /// Insert an observer
    ///
    /// # Panics
    /// If the same observer is already on the list. That is a lifetime bug in
    /// the caller and must not be tolerated.
    pub(crate) fn insert(&mut self, observer: Arc<dyn StateObserver>) -> ObserverId {
        let new_ptr = Arc::as_ptr(&observer) as *const ();
        assert!(
            !self
                .entries
                .iter()
                .any(|e| Arc::as_ptr(&e.observer) as *const () == new_ptr),
            "observer attached twice to the same object"
        );
        let id = ObserverId::next();
        self.entries.push(ObserverEntry { id, observer });
        id
    }

    /// Remove by token, returning whether it was still attached
    pub(crate) fn remove(&mut self, id: ObserverId) -> bool {
        match self.entries.iter().position(|e| e.id == id) {
            Some(index) => {
                self.entries.remove(index);
                true
            }
            None => false,
        }
    }

    /// Run `notify` on every observer, detaching those that ask for it
    ///
    /// An observer that returns `NEED_REMOVAL` is detached (and told so via
    /// `on_removed`) before the next observer is notified. Returns the number
    /// of observers that reported `HANDLED`.
    pub(crate) fn notify_each<F>(&mut self, mut notify: F) -> usize
    where
        F: FnMut(&dyn StateObserver) -> ObserverFlags,
    {
        let mut handled = 0;
        let mut index = 0;
        while index < self.entries.len() {
            let flags = notify(self.entries[index].observer.as_ref());
            if flags.contains(ObserverFlags::HANDLED) {
                handled += 1;
            }
            if flags.contains(ObserverFlags::NEED_REMOVAL) {
                let entry = self.entries.remove(index);
                entry.observer.on_removed();
            } else {
                index += 1;
            }
        }
        handled
    }
}
