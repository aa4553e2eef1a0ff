//! Kernel object base
//!
//! Every kernel object embeds a `KernelObject`: a process-unique id, the
//! signal-state bitmask, the attached observers, and a handle count. Signal
//! state and observers are guarded by one `spin::Mutex` per object, so two
//! threads can never mutate them concurrently and every observer callback
//! runs serialized with state changes on that object.
//!
//! ## Payload
//!
//! Objects whose protocol treats some extra fields and the signal bits as one
//! atomic unit (the SMC channel) store those fields as the payload `T`. The
//! payload lives under the same lock and is reached through `StateGuard`.
//!
//! ## Lock Discipline
//!
//! - The object lock is never held across a blocking point
//! - Observer callbacks run with the lock held and must not re-enter the object
//! - Order: handle table lock → object lock → port lock

use alloc::sync::Arc;
use core::fmt;
use core::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use log::trace;
use spin::{Mutex, MutexGuard};

use super::handle::HandleId;
use super::observer::{ObserverFlags, ObserverId, ObserverList, StateObserver};
use super::signals::Signals;

/// Process-unique kernel object id
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Koid(u64);

impl Koid {
    /// Invalid id, never assigned to an object
    pub const INVALID: Koid = Koid(0);

    pub(crate) fn next() -> Self {
        static NEXT_KOID: AtomicU64 = AtomicU64::new(1);
        Koid(NEXT_KOID.fetch_add(1, Ordering::Relaxed))
    }

    /// Raw id value
    #[inline]
    pub const fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for Koid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "koid:{}", self.0)
    }
}

struct ObjectState<T> {
    signals: Signals,
    observers: ObserverList,
    payload: T,
}

/// Base kernel object: signal state, observers and handle count
pub struct KernelObject<T = ()> {
    koid: Koid,
    handle_count: AtomicU32,
    state: Mutex<ObjectState<T>>,
}

impl<T> KernelObject<T> {
    /// Create an object with the given initial signals and payload
    pub fn new(initial: Signals, payload: T) -> Self {
        Self {
            koid: Koid::next(),
            handle_count: AtomicU32::new(0),
            state: Mutex::new(ObjectState {
                signals: initial,
                observers: ObserverList::new(),
                payload,
            }),
        }
    }

    /// Acquire the object lock
    ///
    /// The guard gives access to the signal state and the payload as one
    /// unit. State updates made through it notify observers before the guard
    /// is released.
    pub fn lock(&self) -> StateGuard<'_, T> {
        StateGuard {
            koid: self.koid,
            inner: self.state.lock(),
        }
    }
}

impl KernelObject<()> {
    /// Create a payload-free object
    pub fn with_signals(initial: Signals) -> Self {
        Self::new(initial, ())
    }
}

/// Locked view of an object's signal state and payload
pub struct StateGuard<'a, T> {
    koid: Koid,
    inner: MutexGuard<'a, ObjectState<T>>,
}

impl<'a, T> StateGuard<'a, T> {
    /// Current signal state
    #[inline]
    pub fn signals(&self) -> Signals {
        self.inner.signals
    }

    /// Clear then set signal bits, notifying observers if anything changed
    ///
    /// Returns the resulting state.
    pub fn update_state(&mut self, clear: Signals, set: Signals) -> Signals {
        update_locked(self.koid, &mut self.inner, clear, set)
    }

    /// Payload protected by this lock
    #[inline]
    pub fn payload(&self) -> &T {
        &self.inner.payload
    }

    /// Mutable payload protected by this lock
    #[inline]
    pub fn payload_mut(&mut self) -> &mut T {
        &mut self.inner.payload
    }
}

fn update_locked<T>(koid: Koid, state: &mut ObjectState<T>, clear: Signals, set: Signals) -> Signals {
    let old_state = state.signals;
    let new_state = Signals::from_bits_retain((old_state.bits() & !clear.bits()) | set.bits());
    if new_state == old_state {
        return new_state;
    }
    state.signals = new_state;
    trace!(
        "[kobject] {} state {:#x} -> {:#x}, notifying {} observer(s)",
        koid,
        old_state.bits(),
        new_state.bits(),
        state.observers.len()
    );
    state
        .observers
        .notify_each(|observer| observer.on_state_change(new_state));
    new_state
}

/// Object-safe view of any `KernelObject`, whatever its payload
pub trait ObjectBase: Send + Sync {
    /// Object id
    fn koid(&self) -> Koid;

    /// Snapshot of the current signal state
    fn signals(&self) -> Signals;

    /// Attach an observer and deliver `on_initialize`
    ///
    /// Returns `None` if the observer asked to be removed during
    /// `on_initialize`; it has then already received `on_removed`.
    ///
    /// # Panics
    /// If the observer is already attached to this object.
    fn add_observer(&self, observer: Arc<dyn StateObserver>) -> Option<ObserverId>;

    /// Detach an observer; no further callbacks follow
    ///
    /// Returns `false` if the object had already detached it.
    fn remove_observer(&self, id: ObserverId) -> bool;

    /// Clear then set signal bits, notifying observers on change
    fn update_state(&self, clear: Signals, set: Signals);

    /// A handle to this object was closed
    ///
    /// Returns how many observers reported the cancel as handled.
    fn cancel(&self, handle: HandleId) -> usize;

    /// Keyed cancel issued through a port
    ///
    /// Returns `true` if at least one observer handled it.
    fn cancel_by_key(&self, handle: HandleId, port: Koid, key: u64) -> bool;

    /// Number of attached observers
    fn observer_count(&self) -> usize;

    /// Number of live handles
    fn handle_count(&self) -> u32;

    /// Record a new handle (used by `Handle`)
    fn increment_handle_count(&self);

    /// Record a dropped handle, returning `true` when it was the last one
    fn decrement_handle_count(&self) -> bool;
}

impl<T: Send> ObjectBase for KernelObject<T> {
    #[inline]
    fn koid(&self) -> Koid {
        self.koid
    }

    fn signals(&self) -> Signals {
        self.state.lock().signals
    }

    fn add_observer(&self, observer: Arc<dyn StateObserver>) -> Option<ObserverId> {
        let mut state = self.state.lock();
        let id = state.observers.insert(observer.clone());
        let flags = observer.on_initialize(state.signals);
        if flags.contains(ObserverFlags::NEED_REMOVAL) {
            state.observers.remove(id);
            observer.on_removed();
            trace!("[kobject] {} observer satisfied at attach, not kept", self.koid);
            return None;
        }
        Some(id)
    }

    fn remove_observer(&self, id: ObserverId) -> bool {
        self.state.lock().observers.remove(id)
    }

    fn update_state(&self, clear: Signals, set: Signals) {
        let mut state = self.state.lock();
        update_locked(self.koid, &mut state, clear, set);
    }

    fn cancel(&self, handle: HandleId) -> usize {
        let mut state = self.state.lock();
        let handled = state
            .observers
            .notify_each(|observer| observer.on_cancel(handle));
        if handled > 0 {
            trace!("[kobject] {} cancel {:?} handled by {}", self.koid, handle, handled);
        }
        handled
    }

    fn cancel_by_key(&self, handle: HandleId, port: Koid, key: u64) -> bool {
        let mut state = self.state.lock();
        state
            .observers
            .notify_each(|observer| observer.on_cancel_by_key(handle, port, key))
            > 0
    }

    fn observer_count(&self) -> usize {
        self.state.lock().observers.len()
    }

    #[inline]
    fn handle_count(&self) -> u32 {
        self.handle_count.load(Ordering::Acquire)
    }

    #[inline]
    fn increment_handle_count(&self) {
        self.handle_count.fetch_add(1, Ordering::AcqRel);
    }

    fn decrement_handle_count(&self) -> bool {
        let previous = self.handle_count.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(previous > 0, "handle count underflow");
        previous == 1
    }
}

impl<T> fmt::Debug for KernelObject<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("KernelObject")
            .field("koid", &self.koid)
            .field("signals", &format_args!("{:#x}", state.signals.bits()))
            .field("observers", &state.observers.len())
            .field("handles", &self.handle_count.load(Ordering::Relaxed))
            .finish()
    }
}
