//! Kernel Object Model
//!
//! Every kernel resource is a `KernelObject` with a signal mask and a list
//! of observers, reached through rights-scoped handles.
//!
//! ## Object Types
//!
//! - **Notification**: user-signalable object
//! - **Port**: keyed packet queue, target of async waits and exception reports
//! - **Task**: job, process or thread; target of exception bindings
//! - **ExceptionBinding**: forwards a task's exceptions to a port
//! - **SecureMonitorChannel**: singleton SMC request/reply handoff
//!
//! ## Observers
//!
//! - **WaitBridge**: one thread blocked on one object
//! - **PortObserver**: one-shot async wait delivered as a port packet

pub mod dispatcher;
pub mod exception;
pub mod handle;
pub mod kobject;
pub mod notification;
pub mod observer;
pub mod port;
pub mod port_observer;
pub mod signals;
pub mod smc;
pub mod task;
pub mod wait;

// Re-export main types
pub use dispatcher::{downcast_dispatcher, Dispatcher, ObjectType};
pub use exception::{
    dispatch_exception, dispatch_fault, BindingType, BindingUnlocked, ExceptionBinding,
    ExceptionReport, ExceptionType,
};
pub use handle::{Handle, HandleId, HandleTable, HandleValue, Rights, HANDLE_INVALID};
pub use kobject::{KernelObject, Koid, ObjectBase, StateGuard};
pub use notification::Notification;
pub use observer::{ObserverFlags, ObserverId, StateObserver};
pub use port::{PacketPayload, Port, PortPacket};
pub use port_observer::{wait_async, PortObserver};
pub use signals::Signals;
pub use smc::{
    notify_smc_service, wait_for_result, SecureMonitorChannel, SmcArgs, SmcOptions, SmcRegistry,
    SMC_INTERNAL_FAILURE,
};
pub use task::{Task, TaskKind};
pub use wait::{WaitBridge, WaitOutcome};
