//! Architecture-specific code
//!
//! Register layouts and syndrome decoding the object core needs to build
//! exception reports. Only ARM64 (AArch64) is supported.

pub mod aarch64;

pub use aarch64::{ArchExceptionContext, TrapFrame};
