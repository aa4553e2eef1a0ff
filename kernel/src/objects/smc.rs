//! Secure monitor call channel
//!
//! The `SecureMonitorChannel` hands secure monitor calls from a privileged
//! originator to a user-mode service thread and carries the result back. It
//! is a strict two-party handoff, so each direction has a dedicated `Event`
//! instead of going through observers.
//!
//! ## Protocol
//!
//! ```text
//!            notify_user             wait_for_request
//!   Idle ─────────────────▶ Pending ─────────────────▶ Claimed
//!    ▲                                                    │
//!    │        wait_for_result             set_result      │
//!    └─────────────────────── Answered ◀──────────────────┘
//! ```
//!
//! | State    | SMC_READABLE | SMC_SIGNALED |
//! |----------|--------------|--------------|
//! | Idle     | clear        | clear        |
//! | Pending  | set          | clear        |
//! | Claimed  | set          | set          |
//! | Answered | set          | clear        |
//!
//! The request arguments, the result and both bits live under the object
//! lock, so every transition is atomic. Calls that do not fit the current
//! state fail with `BadState` and leave the channel untouched.
//!
//! ## Singleton
//!
//! Only one channel exists system-wide. `SmcRegistry::create` allocates it
//! on first use under the registry's allocation lock and returns the same
//! instance afterwards. The channel is never torn down.

use alloc::sync::Arc;
use core::fmt;

use log::{debug, warn};
use spin::Mutex;

use super::dispatcher::{impl_dispatcher_any, Dispatcher, ObjectType};
use super::kobject::{KernelObject, ObjectBase};
use super::observer::StateObserver;
use super::signals::Signals;
use crate::config::SMC_MAX_PARAMS;
use crate::error::{KError, Result};
use crate::sync::{Deadline, Event};

/// Result returned when the request vanished before its result was read
pub const SMC_INTERNAL_FAILURE: i64 = -6;

/// Arguments of one secure monitor call
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SmcArgs {
    pub func_id: u32,
    pub params: [u64; SMC_MAX_PARAMS],
    pub client_id: u16,
    pub secure_os_id: u16,
}

/// Channel creation options
#[derive(Clone, Default)]
pub struct SmcOptions {
    /// Observer attached when the channel is first created
    pub observer: Option<Arc<dyn StateObserver>>,
}

impl fmt::Debug for SmcOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SmcOptions")
            .field("observer", &self.observer.is_some())
            .finish()
    }
}

#[derive(Default)]
struct SmcState {
    args: Option<SmcArgs>,
    result: Option<i64>,
}

/// The secure monitor call request/reply channel
pub struct SecureMonitorChannel {
    base: KernelObject<SmcState>,
    request_event: Event,
    result_event: Event,
}

impl SecureMonitorChannel {
    fn new() -> Self {
        Self {
            base: KernelObject::new(Signals::empty(), SmcState::default()),
            request_event: Event::new(),
            result_event: Event::new(),
        }
    }

    /// Post a request for the service
    ///
    /// Called by the privileged originator. Never blocks.
    ///
    /// # Errors
    /// `BadState` if a request is already outstanding.
    pub fn notify_user(&self, args: SmcArgs) -> Result<()> {
        let mut state = self.base.lock();
        if state.signals().contains(Signals::SMC_READABLE) {
            warn!("[smc] request {:#x} rejected, one already outstanding", args.func_id);
            return Err(KError::BadState);
        }
        let slot = state.payload_mut();
        slot.args = Some(args);
        slot.result = None;
        state.update_state(Signals::empty(), Signals::SMC_READABLE);
        self.request_event.signal();
        debug!("[smc] request {:#x} posted", args.func_id);
        Ok(())
    }

    /// Block until a request is posted, then claim it
    ///
    /// # Errors
    /// `BadState` if the request was already claimed.
    pub fn wait_for_request(&self) -> Result<SmcArgs> {
        self.wait_for_request_until(Deadline::Infinite)
    }

    /// `wait_for_request` with a deadline
    ///
    /// # Errors
    /// `TimedOut` if no request arrives in time, otherwise as
    /// `wait_for_request`.
    pub fn wait_for_request_until(&self, deadline: Deadline) -> Result<SmcArgs> {
        self.request_event.wait(deadline)?;
        let mut state = self.base.lock();
        let signals = state.signals();
        if signals.contains(Signals::SMC_SIGNALED) {
            warn!("[smc] request already claimed");
            return Err(KError::BadState);
        }
        let args = match state.payload().args {
            Some(args) if signals.contains(Signals::SMC_READABLE) => args,
            _ => {
                warn!("[smc] woken without a pending request");
                return Err(KError::BadState);
            }
        };
        state.update_state(Signals::empty(), Signals::SMC_SIGNALED);
        debug!("[smc] request {:#x} claimed", args.func_id);
        Ok(args)
    }

    /// Publish the result of the claimed request
    ///
    /// # Errors
    /// `BadState` unless a request is currently claimed.
    pub fn set_result(&self, result: i64) -> Result<()> {
        let mut state = self.base.lock();
        if !state.signals().contains(Signals::SMC_SIGNALED) {
            warn!("[smc] result {} rejected, nothing claimed", result);
            return Err(KError::BadState);
        }
        state.payload_mut().result = Some(result);
        state.update_state(Signals::SMC_SIGNALED, Signals::empty());
        self.result_event.signal();
        debug!("[smc] result {} set", result);
        Ok(())
    }

    /// Block until the service answers, then return to idle
    ///
    /// Called by the privileged originator after `notify_user`.
    pub fn wait_for_result(&self) -> Result<i64> {
        self.wait_for_result_until(Deadline::Infinite)
    }

    /// `wait_for_result` with a deadline
    ///
    /// # Errors
    /// `TimedOut` if no result arrives in time.
    pub fn wait_for_result_until(&self, deadline: Deadline) -> Result<i64> {
        self.result_event.wait(deadline)?;
        let mut state = self.base.lock();
        if !state.signals().contains(Signals::SMC_READABLE) {
            warn!("[smc] result woken with no request outstanding");
            return Ok(SMC_INTERNAL_FAILURE);
        }
        let slot = state.payload_mut();
        slot.args = None;
        let result = slot.result.take().unwrap_or(SMC_INTERNAL_FAILURE);
        state.update_state(Signals::SMC_READABLE | Signals::SMC_SIGNALED, Signals::empty());
        debug!("[smc] result {} delivered, channel idle", result);
        Ok(result)
    }

    /// Current signal state
    pub fn signals(&self) -> Signals {
        self.base.signals()
    }
}

impl Dispatcher for SecureMonitorChannel {
    fn base(&self) -> &dyn ObjectBase {
        &self.base
    }

    fn object_type(&self) -> ObjectType {
        ObjectType::Smc
    }

    impl_dispatcher_any!();
}

impl fmt::Debug for SecureMonitorChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecureMonitorChannel")
            .field("koid", &self.base.koid())
            .field("signals", &self.signals())
            .finish()
    }
}

/// Owner of the singleton channel and its allocation lock
pub struct SmcRegistry {
    channel: Mutex<Option<Arc<SecureMonitorChannel>>>,
}

static GLOBAL_REGISTRY: SmcRegistry = SmcRegistry::new();

impl SmcRegistry {
    pub const fn new() -> Self {
        Self {
            channel: Mutex::new(None),
        }
    }

    /// The system-wide registry
    pub fn global() -> &'static SmcRegistry {
        &GLOBAL_REGISTRY
    }

    /// Return the channel, creating it on first call
    ///
    /// `options` only take effect on the call that allocates.
    pub fn create(&self, options: SmcOptions) -> Arc<SecureMonitorChannel> {
        let mut slot = self.channel.lock();
        if let Some(channel) = slot.as_ref() {
            return channel.clone();
        }
        let channel = Arc::new(SecureMonitorChannel::new());
        if let Some(observer) = options.observer {
            channel.base.add_observer(observer);
        }
        debug!("[smc] channel {} created", channel.base.koid());
        *slot = Some(channel.clone());
        channel
    }

    /// The channel, if created
    pub fn get(&self) -> Option<Arc<SecureMonitorChannel>> {
        self.channel.lock().clone()
    }

    /// Post a request on this registry's channel
    ///
    /// # Errors
    /// `BadState` if no channel exists or a request is outstanding.
    pub fn notify_smc_service(&self, args: SmcArgs) -> Result<()> {
        self.get().ok_or(KError::BadState)?.notify_user(args)
    }

    /// Wait for the result on this registry's channel
    ///
    /// # Errors
    /// `BadState` if no channel exists.
    pub fn wait_for_result(&self) -> Result<i64> {
        self.get().ok_or(KError::BadState)?.wait_for_result()
    }
}

impl Default for SmcRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Post a request to the system-wide service
pub fn notify_smc_service(args: SmcArgs) -> Result<()> {
    SmcRegistry::global().notify_smc_service(args)
}

/// Wait for the system-wide service to answer
pub fn wait_for_result() -> Result<i64> {
    SmcRegistry::global().wait_for_result()
}
