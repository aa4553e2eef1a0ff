//! KaaL kernel object core
//!
//! Signal-state kernel objects, observers and the blocking handoffs built on
//! them, for the KaaL microkernel.
//!
//! # Architecture
//!
//! The crate is organized into the following modules:
//! - `objects`: kernel objects, handles, observers and the protocols on them
//! - `sync`: the `Event` blocking primitive and deadlines
//! - `syscall`: the syscall surface and trap-frame dispatcher
//! - `arch`: ARM64 register layouts and syndrome decoding
//! - `config`: limits and option structs
//! - `error`: the `KError` type
//!
//! # Locking
//!
//! There is no global lock. Each object, binding and handle table has its own
//! `spin::Mutex`, no lock is ever held while a thread blocks, and nested
//! acquisition follows one order:
//!
//! ```text
//! handle table → object → port
//! binding link → exception binding (released) → port
//! ```
//!
//! Observer callbacks run under the observed object's lock.

extern crate alloc;

pub mod arch;
pub mod config;
pub mod error;
pub mod objects;
pub mod sync;
pub mod syscall;

pub use error::{KError, Result};
pub use objects::{
    Dispatcher, Handle, HandleTable, HandleValue, KernelObject, Koid, ObjectBase, Rights, Signals,
    StateObserver,
};
pub use sync::{Deadline, Event};

use static_assertions::assert_impl_all;

assert_impl_all!(objects::Notification: Send, Sync);
assert_impl_all!(objects::Port: Send, Sync);
assert_impl_all!(objects::Task: Send, Sync);
assert_impl_all!(objects::ExceptionBinding: Send, Sync);
assert_impl_all!(objects::SecureMonitorChannel: Send, Sync);
assert_impl_all!(objects::HandleTable: Send, Sync);
assert_impl_all!(sync::Event: Send, Sync);
