//! System call numbers
//!
//! Passed in x8. Handle and object calls are grouped by object kind in
//! blocks of 0x10.

/// Close a handle (handle)
pub const SYS_HANDLE_CLOSE: u64 = 0x10;

/// Duplicate a handle with equal or fewer rights (handle, rights)
pub const SYS_HANDLE_DUPLICATE: u64 = 0x11;

/// Create a notification () -> handle
pub const SYS_NOTIFICATION_CREATE: u64 = 0x12;

/// Clear then set user signals (handle, clear, set)
pub const SYS_OBJECT_SIGNAL: u64 = 0x13;

/// Block until any watched signal is asserted (handle, signals, deadline_ns) -> observed
pub const SYS_OBJECT_WAIT_ONE: u64 = 0x14;

/// Arm a one-shot async wait (handle, port, key, signals)
pub const SYS_OBJECT_WAIT_ASYNC: u64 = 0x15;

/// Create a port (capacity, 0 = default) -> handle
pub const SYS_PORT_CREATE: u64 = 0x20;

/// Queue a user packet (port, key, w0, w1, w2, w3)
pub const SYS_PORT_QUEUE: u64 = 0x21;

/// Dequeue a packet (port, deadline_ns) -> key, type, w0..w3
pub const SYS_PORT_WAIT: u64 = 0x22;

/// Cancel async waits keyed through a port (port, handle, key)
pub const SYS_PORT_CANCEL: u64 = 0x23;

/// Create an exception binding (type, port, key) -> handle
pub const SYS_EXCEPTION_BINDING_CREATE: u64 = 0x30;

/// Bind a binding to a task (binding, task)
pub const SYS_EXCEPTION_BIND: u64 = 0x31;

/// Unbind a binding from its task (binding)
pub const SYS_EXCEPTION_UNBIND: u64 = 0x32;

/// Create and install a binding in one step (task, port, key, type)
pub const SYS_TASK_BIND_EXCEPTION_PORT: u64 = 0x33;

/// Remove the binding of a given type from a task (task, type)
pub const SYS_TASK_UNBIND_EXCEPTION_PORT: u64 = 0x34;

/// Open the SMC service channel () -> handle
pub const SYS_SMC_CREATE: u64 = 0x40;

/// Block for the next SMC request (handle) -> ids, p0..p5
pub const SYS_SMC_WAIT_FOR_REQUEST: u64 = 0x41;

/// Answer the claimed SMC request (handle, result)
pub const SYS_SMC_SET_RESULT: u64 = 0x42;
