//! Port - keyed packet delivery channel
//!
//! A port is a bounded queue of `PortPacket`s. Asynchronous waits and
//! exception bindings queue packets on it; a consumer thread dequeues them
//! with `wait`. `READABLE` is asserted exactly while the queue is non-empty.
//!
//! ## Exception Bindings
//!
//! Bindings that deliver to this port are registered here so they can be
//! told when the port's last handle closes. The list holds weak references:
//! a binding is owned by the task it is installed on, never by the port.
//!
//! Only code that has already released a binding's lock may change the
//! list. That rule is carried by `BindingUnlocked`, which the link and
//! unlink methods take by value and which can only be produced by giving up
//! an `ExceptionBinding` lock guard.
//!
//! ## Locking
//!
//! Packets may be queued from observer callbacks that run under another
//! object's lock, so the port lock always comes last.

use alloc::sync::{Arc, Weak};
use alloc::vec::Vec;

use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender, TrySendError};
use log::{debug, trace, warn};

use super::dispatcher::{impl_dispatcher_any, Dispatcher, ObjectType};
use super::exception::{BindingUnlocked, ExceptionBinding, ExceptionReport};
use super::kobject::{KernelObject, ObjectBase, StateGuard};
use super::signals::Signals;
use crate::config::PortConfig;
use crate::error::{KError, Result};
use crate::sync::Deadline;

/// Packet contents
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketPayload {
    /// An asynchronous wait was satisfied
    Signal {
        /// Signals the wait was armed with
        trigger: Signals,
        /// Object state that satisfied it
        observed: Signals,
    },
    /// Exception or lifecycle report from an exception binding
    Exception(ExceptionReport),
    /// Packet queued directly by user space
    User([u64; 4]),
}

/// Keyed packet delivered through a port
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortPacket {
    /// Caller-chosen key identifying the source
    pub key: u64,
    pub payload: PacketPayload,
}

impl PortPacket {
    pub fn user(key: u64, data: [u64; 4]) -> Self {
        Self {
            key,
            payload: PacketPayload::User(data),
        }
    }
}

#[derive(Default)]
struct PortState {
    bindings: Vec<Weak<ExceptionBinding>>,
    /// Set once the last handle has closed; no further bindings may link
    zero_handles: bool,
}

/// Packet delivery channel
pub struct Port {
    base: KernelObject<PortState>,
    tx: Sender<PortPacket>,
    rx: Receiver<PortPacket>,
    capacity: usize,
}

impl Port {
    /// Create a port with the default capacity
    pub fn new() -> Arc<Self> {
        let (tx, rx) = channel::bounded(PortConfig::default().capacity);
        Self::from_parts(tx, rx, PortConfig::default().capacity)
    }

    /// Create a port with explicit configuration
    ///
    /// # Errors
    /// `InvalidArgs` if the capacity is zero.
    pub fn with_config(config: PortConfig) -> Result<Arc<Self>> {
        if config.capacity == 0 {
            return Err(KError::InvalidArgs);
        }
        let (tx, rx) = channel::bounded(config.capacity);
        Ok(Self::from_parts(tx, rx, config.capacity))
    }

    fn from_parts(tx: Sender<PortPacket>, rx: Receiver<PortPacket>, capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            base: KernelObject::new(Signals::WRITABLE, PortState::default()),
            tx,
            rx,
            capacity,
        })
    }

    /// Maximum number of queued packets
    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of queued packets
    #[inline]
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    /// Re-derive READABLE/WRITABLE from the queue with the port lock held
    fn refresh_locked(&self, state: &mut StateGuard<'_, PortState>) {
        let mut clear = Signals::empty();
        let mut set = Signals::empty();
        if self.rx.is_empty() {
            clear |= Signals::READABLE;
        } else {
            set |= Signals::READABLE;
        }
        if self.rx.is_full() {
            clear |= Signals::WRITABLE;
        } else {
            set |= Signals::WRITABLE;
        }
        state.update_state(clear, set);
    }

    /// Queue a packet
    ///
    /// Never blocks, so it may be called from observer callbacks.
    ///
    /// # Errors
    /// `ShouldWait` if the queue is full.
    pub fn queue(&self, packet: PortPacket) -> Result<()> {
        let mut state = self.base.lock();
        match self.tx.try_send(packet) {
            Ok(()) => {
                trace!("[port] {} queued key {:#x}", self.base.koid(), packet.key);
                self.refresh_locked(&mut state);
                Ok(())
            }
            Err(TrySendError::Full(_)) => {
                debug!("[port] {} full, dropping key {:#x}", self.base.koid(), packet.key);
                Err(KError::ShouldWait)
            }
            // The port owns its receiver.
            Err(TrySendError::Disconnected(_)) => Err(KError::Internal),
        }
    }

    /// Dequeue the next packet, blocking until one arrives or the deadline passes
    ///
    /// # Errors
    /// `TimedOut` if the deadline passes with the queue still empty.
    pub fn wait(&self, deadline: Deadline) -> Result<PortPacket> {
        let received = match deadline {
            Deadline::Infinite => self.rx.recv().map_err(|_| KError::Internal),
            Deadline::At(when) => self.rx.recv_deadline(when).map_err(|e| match e {
                RecvTimeoutError::Timeout => KError::TimedOut,
                RecvTimeoutError::Disconnected => KError::Internal,
            }),
        };
        // A packet may have been taken between the producer's send and its
        // refresh; whoever refreshes last sees the final queue state.
        let mut state = self.base.lock();
        self.refresh_locked(&mut state);
        received
    }

    /// Register a binding that delivers to this port
    ///
    /// # Errors
    /// `BadState` once the port's last handle has closed.
    pub(crate) fn link_binding(&self, binding: &Arc<ExceptionBinding>, _unlocked: BindingUnlocked) -> Result<()> {
        let mut state = self.base.lock();
        let port_state = state.payload_mut();
        if port_state.zero_handles {
            return Err(KError::BadState);
        }
        port_state.bindings.retain(|weak| weak.strong_count() > 0);
        port_state.bindings.push(Arc::downgrade(binding));
        trace!(
            "[port] {} linked binding {}",
            self.base.koid(),
            binding.koid()
        );
        Ok(())
    }

    /// Remove a binding from the list if present
    pub(crate) fn unlink_binding(&self, binding: &ExceptionBinding, _unlocked: BindingUnlocked) {
        let mut state = self.base.lock();
        state
            .payload_mut()
            .bindings
            .retain(|weak| weak.strong_count() > 0 && !core::ptr::eq(weak.as_ptr(), binding));
    }

    /// Number of live bindings delivering to this port
    pub fn binding_count(&self) -> usize {
        let state = self.base.lock();
        state
            .payload()
            .bindings
            .iter()
            .filter(|weak| weak.strong_count() > 0)
            .count()
    }
}

impl Dispatcher for Port {
    fn base(&self) -> &dyn ObjectBase {
        &self.base
    }

    fn object_type(&self) -> ObjectType {
        ObjectType::Port
    }

    fn on_zero_handles(&self) {
        let bindings: Vec<Arc<ExceptionBinding>> = {
            let mut state = self.base.lock();
            let port_state = state.payload_mut();
            port_state.zero_handles = true;
            port_state
                .bindings
                .drain(..)
                .filter_map(|weak| weak.upgrade())
                .collect()
        };
        if !bindings.is_empty() {
            debug!(
                "[port] {} closed, releasing {} binding(s)",
                self.base.koid(),
                bindings.len()
            );
        }
        for binding in bindings {
            binding.on_port_zero_handles();
        }
        let dropped = self.rx.try_iter().count();
        if dropped > 0 {
            warn!("[port] {} closed with {} undelivered packet(s)", self.base.koid(), dropped);
        }
        let mut state = self.base.lock();
        self.refresh_locked(&mut state);
    }

    impl_dispatcher_any!();
}

impl core::fmt::Debug for Port {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Port")
            .field("koid", &self.base.koid())
            .field("queued", &self.rx.len())
            .field("capacity", &self.capacity)
            .finish()
    }
}
