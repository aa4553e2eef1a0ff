//! ARM64 (AArch64) architecture-specific code

pub mod context;
pub mod exception;

pub use context::{ArchExceptionContext, TrapFrame};
