//! Kernel object error types
//!
//! Every operation in this crate returns its outcome explicitly. Nothing here
//! retries or swallows a failure; retry policy belongs to the caller.
//!
//! Contract violations that indicate a lifetime bug elsewhere (attaching an
//! observer twice, ending a wait that never began) are assertions, not
//! `KError` values.

use thiserror::Error;

/// Error kinds returned by kernel object operations
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum KError {
    /// Protocol or state-machine violation (double bind, claim without request)
    #[error("Operation not valid in the current state")]
    BadState,

    /// Malformed caller-supplied parameters
    #[error("Invalid arguments")]
    InvalidArgs,

    /// Allocation failed during object or binding creation
    #[error("Out of memory")]
    NoMemory,

    /// Object or feature does not support the operation
    #[error("Operation not supported")]
    NotSupported,

    /// A wait was terminated by handle closure
    #[error("Wait canceled by handle closure")]
    Canceled,

    /// The deadline elapsed before the condition was met
    #[error("Deadline elapsed")]
    TimedOut,

    /// The observer or binding is already attached
    #[error("Already bound")]
    AlreadyBound,

    /// Handle value does not name a live handle
    #[error("Bad handle")]
    BadHandle,

    /// Handle refers to an object of a different type
    #[error("Wrong object type")]
    WrongType,

    /// Handle lacks the rights required by the operation
    #[error("Access denied")]
    AccessDenied,

    /// Operation would have to block (queue full, nothing pending)
    #[error("Should wait")]
    ShouldWait,

    /// No registrant accepted the request
    #[error("Not found")]
    NotFound,

    /// Internal invariant failed in a defensive path
    #[error("Internal error")]
    Internal,
}

impl KError {
    /// Status code reported to user space through the trap frame
    ///
    /// Zero is reserved for success, every error is a distinct negative value.
    pub const fn status(self) -> i64 {
        match self {
            KError::Internal => -1,
            KError::NotSupported => -2,
            KError::NoMemory => -4,
            KError::InvalidArgs => -10,
            KError::BadHandle => -11,
            KError::WrongType => -12,
            KError::BadState => -20,
            KError::TimedOut => -21,
            KError::ShouldWait => -22,
            KError::Canceled => -23,
            KError::NotFound => -25,
            KError::AlreadyBound => -26,
            KError::AccessDenied => -30,
        }
    }
}

pub type Result<T> = core::result::Result<T, KError>;

/// Encode a result as a trap-frame status word
#[inline]
pub fn status_of<T>(result: &Result<T>) -> i64 {
    match result {
        Ok(_) => 0,
        Err(e) => e.status(),
    }
}
