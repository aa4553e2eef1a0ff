//! Dispatcher trait - the typed face of a kernel object
//!
//! Handles refer to objects as `Arc<dyn Dispatcher>`. The trait exposes the
//! embedded `KernelObject` through `base()` and lets each object kind react
//! when its last handle goes away. Concrete types are recovered with
//! `downcast_dispatcher`.

use alloc::sync::Arc;
use core::any::Any;

use super::handle::Rights;
use super::kobject::{Koid, ObjectBase};
use crate::error::{KError, Result};

/// Kinds of kernel objects
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectType {
    /// User-signalable notification object
    Notification,
    /// Packet delivery channel
    Port,
    /// Job (container of processes and child jobs)
    Job,
    /// Process
    Process,
    /// Thread
    Thread,
    /// Secure monitor call channel
    Smc,
    /// Port-to-task exception binding
    ExceptionBinding,
}

/// Operations every kernel object supports
pub trait Dispatcher: Send + Sync + Any {
    /// The embedded signal/observer base
    fn base(&self) -> &dyn ObjectBase;

    /// Object kind
    fn object_type(&self) -> ObjectType;

    /// Rights granted to the first handle created for this object
    fn default_rights(&self) -> Rights {
        Rights::DEFAULT
    }

    /// Called once, outside every lock, when the last handle is dropped
    fn on_zero_handles(&self) {}

    /// Object id
    #[inline]
    fn koid(&self) -> Koid {
        self.base().koid()
    }

    fn as_any(&self) -> &dyn Any;

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

/// Implements the `Any` bridge methods of `Dispatcher`
macro_rules! impl_dispatcher_any {
    () => {
        fn as_any(&self) -> &dyn core::any::Any {
            self
        }

        fn into_any(
            self: alloc::sync::Arc<Self>,
        ) -> alloc::sync::Arc<dyn core::any::Any + Send + Sync> {
            self
        }
    };
}

pub(crate) use impl_dispatcher_any;

/// Recover the concrete object type behind a dispatcher
///
/// # Errors
/// `WrongType` if the object is not a `T`.
pub fn downcast_dispatcher<T: Dispatcher>(object: Arc<dyn Dispatcher>) -> Result<Arc<T>> {
    object.into_any().downcast::<T>().map_err(|_| KError::WrongType)
}
