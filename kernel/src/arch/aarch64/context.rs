//! ARM64 trap frame and exception context
//!
//! `TrapFrame` is the saved user register state of a thread. Syscalls read
//! their number from x8 and their arguments from x0-x5, and write the status
//! back to x0 with scalar results in x1 onwards.
//!
//! `ArchExceptionContext` is the portable subset of a trap frame that goes
//! into an exception report queued on a port.

use core::fmt;

use static_assertions::const_assert_eq;

/// Number of general purpose registers (x0-x30)
pub const GPR_COUNT: usize = 31;

/// Number of argument registers copied into an exception report
pub const REPORT_GPR_COUNT: usize = 8;

/// Saved user register state
#[repr(C)]
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct TrapFrame {
    /// General purpose registers x0-x30 (x29 = FP, x30 = LR)
    pub x: [u64; GPR_COUNT],
    /// User stack pointer
    pub sp_el0: u64,
    /// Exception return address
    pub elr_el1: u64,
    /// Saved processor status
    pub spsr_el1: u64,
    /// Exception syndrome
    pub esr_el1: u64,
    /// Fault address
    pub far_el1: u64,
}

impl TrapFrame {
    /// Create a trap frame with all registers zeroed
    pub const fn new() -> Self {
        Self {
            x: [0; GPR_COUNT],
            sp_el0: 0,
            elr_el1: 0,
            spsr_el1: 0,
            esr_el1: 0,
            far_el1: 0,
        }
    }

    /// Syscall number (x8 by convention)
    #[inline]
    pub fn syscall_number(&self) -> u64 {
        self.x[8]
    }

    /// Syscall arguments (x0-x5)
    #[inline]
    pub fn syscall_args(&self) -> [u64; 6] {
        [self.x[0], self.x[1], self.x[2], self.x[3], self.x[4], self.x[5]]
    }

    /// Write the syscall status (x0)
    #[inline]
    pub fn set_status(&mut self, status: i64) {
        self.x[0] = status as u64;
    }

    /// Write scalar syscall results to x1 onwards
    ///
    /// Results beyond x7 are dropped.
    pub fn set_results(&mut self, results: &[u64]) {
        for (reg, value) in self.x[1..=7].iter_mut().zip(results) {
            *reg = *value;
        }
    }

    /// Link register (x30)
    #[inline]
    pub fn lr(&self) -> u64 {
        self.x[30]
    }

    /// Exception class from ESR_EL1
    #[inline]
    pub fn exception_class(&self) -> u8 {
        super::exception::exception_class(self.esr_el1)
    }
}

impl Default for TrapFrame {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for TrapFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrapFrame")
            .field("x0", &format_args!("0x{:016x}", self.x[0]))
            .field("x1", &format_args!("0x{:016x}", self.x[1]))
            .field("x8", &format_args!("0x{:016x}", self.x[8]))
            .field("x30_lr", &format_args!("0x{:016x}", self.x[30]))
            .field("sp_el0", &format_args!("0x{:016x}", self.sp_el0))
            .field("elr_el1", &format_args!("0x{:016x}", self.elr_el1))
            .field("spsr_el1", &format_args!("0x{:016x}", self.spsr_el1))
            .field("esr_el1", &format_args!("0x{:016x}", self.esr_el1))
            .field("far_el1", &format_args!("0x{:016x}", self.far_el1))
            .finish()
    }
}

/// Size of trap frame in bytes
pub const TRAP_FRAME_SIZE: usize = core::mem::size_of::<TrapFrame>();

// 31 GPRs + 5 special registers
const_assert_eq!(TRAP_FRAME_SIZE, 36 * 8);
const_assert_eq!(core::mem::align_of::<TrapFrame>(), 8);

/// Architectural state carried by an exception report
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ArchExceptionContext {
    pub pc: u64,
    pub sp: u64,
    pub lr: u64,
    pub spsr: u64,
    pub esr: u64,
    pub far: u64,
    /// x0-x7 at the time of the exception
    pub gprs: [u64; REPORT_GPR_COUNT],
}

impl ArchExceptionContext {
    /// Capture the reportable registers of a saved frame
    pub fn capture(frame: &TrapFrame) -> Self {
        let mut gprs = [0; REPORT_GPR_COUNT];
        gprs.copy_from_slice(&frame.x[..REPORT_GPR_COUNT]);
        Self {
            pc: frame.elr_el1,
            sp: frame.sp_el0,
            lr: frame.lr(),
            spsr: frame.spsr_el1,
            esr: frame.esr_el1,
            far: frame.far_el1,
            gprs,
        }
    }
}
