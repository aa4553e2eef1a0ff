//! Asynchronous waits delivered as port packets
//!
//! A `PortObserver` is a one-shot observer: the first state that intersects
//! its trigger queues a `Signal` packet on the port and detaches it. Closing
//! the watched handle or a keyed cancel through the port detaches it without
//! a packet.
//!
//! Ports themselves are not async-waitable. A `PortObserver` queues while
//! the observed object's lock is held, so an observer on a port would take
//! one port lock under another.

use alloc::sync::Arc;

use log::{trace, warn};

use super::dispatcher::{Dispatcher, ObjectType};
use super::handle::{Handle, HandleId};
use super::kobject::Koid;
use super::observer::{ObserverFlags, StateObserver};
use super::port::{PacketPayload, Port, PortPacket};
use super::signals::Signals;
use crate::error::{KError, Result};

pub struct PortObserver {
    port: Arc<Port>,
    key: u64,
    trigger: Signals,
    handle: HandleId,
}

impl PortObserver {
    fn deliver(&self, observed: Signals) -> ObserverFlags {
        if !observed.satisfies(self.trigger) {
            return ObserverFlags::empty();
        }
        let packet = PortPacket {
            key: self.key,
            payload: PacketPayload::Signal {
                trigger: self.trigger,
                observed,
            },
        };
        if let Err(err) = self.port.queue(packet) {
            warn!("[port] async wait key {:#x} lost: {}", self.key, err);
        }
        ObserverFlags::NEED_REMOVAL
    }
}

impl StateObserver for PortObserver {
    fn on_initialize(&self, initial: Signals) -> ObserverFlags {
        self.deliver(initial)
    }

    fn on_state_change(&self, new_state: Signals) -> ObserverFlags {
        self.deliver(new_state)
    }

    fn on_cancel(&self, handle: HandleId) -> ObserverFlags {
        if handle == self.handle {
            ObserverFlags::NEED_REMOVAL | ObserverFlags::HANDLED
        } else {
            ObserverFlags::empty()
        }
    }

    fn on_cancel_by_key(&self, handle: HandleId, port: Koid, key: u64) -> ObserverFlags {
        if handle == self.handle && port == self.port.koid() && key == self.key {
            trace!("[port] async wait key {:#x} canceled", key);
            ObserverFlags::NEED_REMOVAL | ObserverFlags::HANDLED
        } else {
            ObserverFlags::empty()
        }
    }
}

/// Arm a one-shot asynchronous wait on the object behind `handle`
///
/// If the object already asserts a trigger bit the packet is queued before
/// this returns.
///
/// # Errors
/// - `NotSupported` when the waited object is a port
/// - `InvalidArgs` for an empty trigger
pub fn wait_async(handle: &Handle, port: &Arc<Port>, key: u64, trigger: Signals) -> Result<()> {
    if trigger.is_empty() {
        return Err(KError::InvalidArgs);
    }
    if handle.object().object_type() == ObjectType::Port {
        return Err(KError::NotSupported);
    }
    let observer = Arc::new(PortObserver {
        port: port.clone(),
        key,
        trigger,
        handle: handle.id(),
    });
    handle.object().base().add_observer(observer);
    Ok(())
}
