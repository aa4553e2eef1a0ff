//! Blocking primitives
//!
//! Object locks are `spin::Mutex` and are never held across a blocking
//! point. Threads park on the primitives in this module instead.

pub mod event;

pub use event::{Deadline, Event, WakeStatus};
