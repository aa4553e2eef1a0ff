//! Handles and Handle Tables
//!
//! A handle is a rights-scoped reference to a kernel object. Handles are the
//! only way syscall-layer callers name objects, and a handle's destruction is
//! what drives cancellation: closing a handle cancels every observer that was
//! waiting through it, and dropping the last handle to an object runs the
//! object's `on_zero_handles` hook.
//!
//! ## Rights
//!
//! Rights can only be reduced when a handle is duplicated, never added.
//!
//! ## Table Locking
//!
//! `HandleTable::with_handle` runs its callback with the table lock held.
//! Waits attach their observer inside that callback, and `close` cancels
//! under the same lock, so a wait can never attach through a handle whose
//! cancel it already missed.

use alloc::sync::Arc;
use alloc::vec::Vec;
use core::fmt;
use core::sync::atomic::{AtomicU64, Ordering};

use bitflags::bitflags;
use log::{debug, trace};
use spin::Mutex;

use super::dispatcher::{downcast_dispatcher, Dispatcher};
use crate::config::{TableConfig, MAX_HANDLES};
use crate::error::{KError, Result};

bitflags! {
    /// Handle rights
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Rights: u32 {
        const DUPLICATE = 1 << 0;
        const TRANSFER  = 1 << 1;
        const READ      = 1 << 2;
        const WRITE     = 1 << 3;
        const SIGNAL    = 1 << 4;
        const WAIT      = 1 << 5;
        const INSPECT   = 1 << 6;
        const MANAGE    = 1 << 7;

        /// Rights every object kind grants by default
        const BASIC = Self::DUPLICATE.bits() | Self::TRANSFER.bits() | Self::WAIT.bits() | Self::INSPECT.bits();
        /// Default rights for signalable objects
        const DEFAULT = Self::BASIC.bits() | Self::READ.bits() | Self::WRITE.bits() | Self::SIGNAL.bits();
    }
}

/// Globally unique identity of one handle instance
///
/// Distinct from the table value: duplicating a handle yields a new id, and
/// observers match cancellation against this id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandleId(u64);

impl HandleId {
    pub(crate) fn next() -> Self {
        static NEXT_ID: AtomicU64 = AtomicU64::new(1);
        HandleId(NEXT_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// Table slot number as seen by user space (0 is never valid)
pub type HandleValue = u32;

/// Value that never names a handle
pub const HANDLE_INVALID: HandleValue = 0;

/// Rights-scoped reference to a kernel object
pub struct Handle {
    id: HandleId,
    object: Arc<dyn Dispatcher>,
    rights: Rights,
}

impl Handle {
    /// Create a handle, counting it against the object
    pub fn new(object: Arc<dyn Dispatcher>, rights: Rights) -> Self {
        object.base().increment_handle_count();
        Self {
            id: HandleId::next(),
            object,
            rights,
        }
    }

    /// Create a handle with the object's default rights
    pub fn with_default_rights(object: Arc<dyn Dispatcher>) -> Self {
        let rights = object.default_rights();
        Self::new(object, rights)
    }

    #[inline]
    pub fn id(&self) -> HandleId {
        self.id
    }

    #[inline]
    pub fn object(&self) -> &Arc<dyn Dispatcher> {
        &self.object
    }

    #[inline]
    pub fn rights(&self) -> Rights {
        self.rights
    }

    /// Check that this handle carries `required`
    pub fn check_rights(&self, required: Rights) -> Result<()> {
        if self.rights.contains(required) {
            Ok(())
        } else {
            Err(KError::AccessDenied)
        }
    }

    /// Duplicate with the same or fewer rights
    ///
    /// # Errors
    /// - `AccessDenied` without `DUPLICATE`
    /// - `InvalidArgs` if `rights` is not a subset of this handle's rights
    pub fn duplicate(&self, rights: Rights) -> Result<Handle> {
        self.check_rights(Rights::DUPLICATE)?;
        if !self.rights.contains(rights) {
            return Err(KError::InvalidArgs);
        }
        Ok(Handle::new(self.object.clone(), rights))
    }
}

impl Drop for Handle {
    fn drop(&mut self) {
        if self.object.base().decrement_handle_count() {
            debug!(
                "[handle] last handle to {} ({:?}) dropped",
                self.object.koid(),
                self.object.object_type()
            );
            self.object.on_zero_handles();
        }
    }
}

impl fmt::Debug for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handle")
            .field("id", &self.id)
            .field("object", &self.object.koid())
            .field("type", &self.object.object_type())
            .field("rights", &self.rights)
            .finish()
    }
}

/// Per-process map from handle values to handles
pub struct HandleTable {
    handles: Mutex<Vec<Option<Handle>>>,
    max_handles: usize,
}

impl HandleTable {
    pub fn new() -> Self {
        Self::with_config(TableConfig::default())
    }

    pub fn with_config(config: TableConfig) -> Self {
        Self {
            handles: Mutex::new(Vec::new()),
            max_handles: config.max_handles.min(MAX_HANDLES),
        }
    }

    fn index_of(value: HandleValue) -> Result<usize> {
        if value == HANDLE_INVALID {
            Err(KError::BadHandle)
        } else {
            Ok(value as usize - 1)
        }
    }

    /// Install a handle, returning its value
    ///
    /// # Errors
    /// `NoMemory` when the table is full. The handle is dropped in that case.
    pub fn add(&self, handle: Handle) -> Result<HandleValue> {
        let mut handles = self.handles.lock();
        let index = match handles.iter().position(Option::is_none) {
            Some(index) => index,
            None if handles.len() < self.max_handles => {
                handles.push(None);
                handles.len() - 1
            }
            None => return Err(KError::NoMemory),
        };
        trace!("[handle] install {:?} at {}", handle, index + 1);
        handles[index] = Some(handle);
        Ok(index as HandleValue + 1)
    }

    /// Create a handle with default rights for `object` and install it
    pub fn add_object(&self, object: Arc<dyn Dispatcher>) -> Result<HandleValue> {
        self.add(Handle::with_default_rights(object))
    }

    /// Run `f` on a handle while the table lock is held
    ///
    /// `f` must not block and must not touch this table.
    pub fn with_handle<R>(&self, value: HandleValue, f: impl FnOnce(&Handle) -> R) -> Result<R> {
        let index = Self::index_of(value)?;
        let handles = self.handles.lock();
        let handle = handles
            .get(index)
            .and_then(Option::as_ref)
            .ok_or(KError::BadHandle)?;
        Ok(f(handle))
    }

    /// Look up the object behind a handle, checking rights
    pub fn get_object(&self, value: HandleValue, required: Rights) -> Result<Arc<dyn Dispatcher>> {
        self.with_handle(value, |handle| {
            handle.check_rights(required)?;
            Ok(handle.object().clone())
        })?
    }

    /// Look up a typed object behind a handle, checking rights
    ///
    /// # Errors
    /// `BadHandle`, `AccessDenied`, or `WrongType`.
    pub fn get<T: Dispatcher>(&self, value: HandleValue, required: Rights) -> Result<Arc<T>> {
        downcast_dispatcher::<T>(self.get_object(value, required)?)
    }

    /// Duplicate a handle into a new slot
    pub fn duplicate(&self, value: HandleValue, rights: Rights) -> Result<HandleValue> {
        let copy = self.with_handle(value, |handle| handle.duplicate(rights))??;
        self.add(copy)
    }

    /// Take a handle out of the table
    ///
    /// Observers waiting through it are canceled before the table lock is
    /// released; the caller owns the returned handle.
    pub fn remove(&self, value: HandleValue) -> Result<Handle> {
        let index = Self::index_of(value)?;
        let mut handles = self.handles.lock();
        let handle = handles
            .get_mut(index)
            .and_then(Option::take)
            .ok_or(KError::BadHandle)?;
        handle.object().base().cancel(handle.id());
        Ok(handle)
    }

    /// Close a handle
    pub fn close(&self, value: HandleValue) -> Result<()> {
        let handle = self.remove(value)?;
        trace!("[handle] close {}", value);
        // Dropped here, outside the table lock, so on_zero_handles may block on other locks.
        drop(handle);
        Ok(())
    }

    /// Number of live handles
    pub fn len(&self) -> usize {
        self.handles.lock().iter().filter(|h| h.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for HandleTable {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for HandleTable {
    fn drop(&mut self) {
        let drained: Vec<Handle> = {
            let mut handles = self.handles.lock();
            let drained: Vec<Handle> = handles.drain(..).flatten().collect();
            for handle in &drained {
                handle.object().base().cancel(handle.id());
            }
            drained
        };
        drop(drained);
    }
}
