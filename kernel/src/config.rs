//! Kernel object configuration
//!
//! Compile-time limits shared by the object core, plus the small runtime
//! option structs accepted by the constructors that need them. Logging
//! verbosity is selected with the `log-*` cargo features.

/// Maximum number of handles a single handle table may hold
pub const MAX_HANDLES: usize = 1024;

/// Default number of packets a port can hold before `queue` reports `ShouldWait`
pub const DEFAULT_PORT_CAPACITY: usize = 256;

/// Maximum number of items accepted by a single `wait_many`
pub const MAX_WAIT_MANY_ITEMS: usize = 64;

/// Number of parameter registers carried by an SMC request
pub const SMC_MAX_PARAMS: usize = 6;

/// Handle table configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableConfig {
    /// Slots available to the table (clamped to `MAX_HANDLES`)
    pub max_handles: usize,
}

impl Default for TableConfig {
    fn default() -> Self {
        Self {
            max_handles: MAX_HANDLES,
        }
    }
}

/// Port configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortConfig {
    /// Packets the port can queue; must be non-zero
    pub capacity: usize,
}

impl Default for PortConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_PORT_CAPACITY,
        }
    }
}
