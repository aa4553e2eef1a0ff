//! Wait syscalls
//!
//! Both calls attach their bridges inside `HandleTable::with_handle`, so a
//! concurrent close of the same handle either happens before the attach
//! (and the lookup fails) or after it (and the bridge sees the cancel).
//! Threads block with no lock held.

use alloc::sync::Arc;
use alloc::vec::Vec;

use log::trace;

use crate::config::MAX_WAIT_MANY_ITEMS;
use crate::error::{KError, Result};
use crate::objects::{HandleTable, HandleValue, Rights, Signals, WaitBridge, WaitOutcome};
use crate::sync::{Deadline, Event};

fn attach(
    table: &HandleTable,
    value: HandleValue,
    bridge: &mut WaitBridge,
    event: &Arc<Event>,
    watched: Signals,
) -> Result<()> {
    table.with_handle(value, |handle| {
        handle.check_rights(Rights::WAIT)?;
        bridge.begin(event.clone(), handle, watched)
    })?
}

/// Block until the object behind `value` asserts any bit of `watched`
///
/// `observed` holds every state seen while waiting. The status is
/// `Canceled` if the handle was closed during the wait, even when a watched
/// bit was also seen, and `TimedOut` if the deadline passed first.
pub fn wait_one(table: &HandleTable, value: HandleValue, watched: Signals, deadline: Deadline) -> WaitOutcome {
    let event = Arc::new(Event::new());
    let mut bridge = WaitBridge::new();
    if let Err(err) = attach(table, value, &mut bridge, &event, watched) {
        return WaitOutcome {
            status: Err(err),
            observed: Signals::empty(),
        };
    }
    let wake = event.wait(deadline);
    let observed = bridge.end();
    let outcome = WaitOutcome::resolve(observed, watched, wake);
    trace!("[wait] wait_one {} -> {:?}", value, outcome);
    outcome
}

/// One entry of a `wait_many`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitItem {
    pub handle: HandleValue,
    pub watched: Signals,
    /// Filled in on return
    pub observed: Signals,
}

impl WaitItem {
    pub fn new(handle: HandleValue, watched: Signals) -> Self {
        Self {
            handle,
            watched,
            observed: Signals::empty(),
        }
    }
}

/// Block until any item's object asserts one of its watched bits
///
/// All bridges share one event. Every item's `observed` is filled in,
/// whatever the status.
///
/// # Errors
/// - `InvalidArgs` for more than `MAX_WAIT_MANY_ITEMS` items
/// - `BadHandle` / `AccessDenied` from the lookup (nothing stays attached)
/// - `Canceled` if any waited handle was closed
/// - `TimedOut` if the deadline passed first
pub fn wait_many(table: &HandleTable, items: &mut [WaitItem], deadline: Deadline) -> Result<()> {
    if items.len() > MAX_WAIT_MANY_ITEMS {
        return Err(KError::InvalidArgs);
    }
    let event = Arc::new(Event::new());
    let mut bridges: Vec<WaitBridge> = Vec::with_capacity(items.len());
    for item in items.iter() {
        let mut bridge = WaitBridge::new();
        // Bridges already attached detach when `bridges` drops.
        attach(table, item.handle, &mut bridge, &event, item.watched)?;
        bridges.push(bridge);
    }

    let wake = event.wait(deadline);

    let mut canceled = false;
    let mut satisfied = false;
    for (item, bridge) in items.iter_mut().zip(bridges.iter_mut()) {
        item.observed = bridge.end();
        canceled |= item.observed.contains(Signals::HANDLE_CLOSED);
        satisfied |= item.observed.satisfies(item.watched);
    }
    if canceled {
        Err(KError::Canceled)
    } else if satisfied {
        Ok(())
    } else {
        match wake {
            Ok(_) => Err(KError::Internal),
            Err(err) => Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::objects::{Dispatcher, Notification};

    #[test]
    fn wait_one_on_satisfied_object_returns_at_once() {
        let table = HandleTable::new();
        let notification = Notification::new();
        notification.signal(Signals::empty(), Signals::USER_2).unwrap();
        let value = table.add_object(notification.clone()).unwrap();

        let outcome = wait_one(&table, value, Signals::USER_2, Deadline::Infinite);
        assert_eq!(outcome.status, Ok(()));
        assert_eq!(outcome.observed, Signals::USER_2);
        assert_eq!(notification.base().observer_count(), 0);
    }

    #[test]
    fn wait_one_needs_wait_right() {
        let table = HandleTable::new();
        let value = table
            .add(crate::objects::Handle::new(Notification::new(), Rights::READ))
            .unwrap();
        let outcome = wait_one(&table, value, Signals::USER_0, Deadline::now());
        assert_eq!(outcome.status, Err(KError::AccessDenied));
    }

    #[test]
    fn wait_one_times_out_with_observed_state() {
        let table = HandleTable::new();
        let notification = Notification::new();
        notification.signal(Signals::empty(), Signals::USER_1).unwrap();
        let value = table.add_object(notification.clone()).unwrap();
        let outcome = wait_one(&table, value, Signals::USER_0, Deadline::now());
        assert_eq!(outcome.status, Err(KError::TimedOut));
        assert_eq!(outcome.observed, Signals::USER_1);
        assert_eq!(notification.base().observer_count(), 0);
    }

    #[test]
    fn wait_many_reports_every_item() {
        let table = HandleTable::new();
        let a = Notification::new();
        let b = Notification::new();
        b.signal(Signals::empty(), Signals::USER_4).unwrap();
        let mut items = [
            WaitItem::new(table.add_object(a.clone()).unwrap(), Signals::USER_0),
            WaitItem::new(table.add_object(b.clone()).unwrap(), Signals::USER_4),
        ];
        assert_eq!(wait_many(&table, &mut items, Deadline::Infinite), Ok(()));
        assert_eq!(items[0].observed, Signals::empty());
        assert_eq!(items[1].observed, Signals::USER_4);
        assert_eq!(a.base().observer_count(), 0);
        assert_eq!(b.base().observer_count(), 0);
    }

    #[test]
    fn wait_many_bad_handle_detaches_earlier_items() {
        let table = HandleTable::new();
        let a = Notification::new();
        let mut items = [
            WaitItem::new(table.add_object(a.clone()).unwrap(), Signals::USER_0),
            WaitItem::new(99, Signals::USER_0),
        ];
        assert_eq!(
            wait_many(&table, &mut items, Deadline::Infinite),
            Err(KError::BadHandle)
        );
        assert_eq!(a.base().observer_count(), 0);
    }

    #[test]
    fn wait_many_limits_item_count() {
        let table = HandleTable::new();
        let mut items = [WaitItem::new(1, Signals::USER_0); MAX_WAIT_MANY_ITEMS + 1];
        assert_eq!(
            wait_many(&table, &mut items, Deadline::now()),
            Err(KError::InvalidArgs)
        );
    }
}
