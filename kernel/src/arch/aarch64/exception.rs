//! ARM64 exception syndrome decoding
//!
//! Maps the exception class (ESR_EL1 bits 31:26) and, for aborts, the fault
//! status code to the architecture-neutral `ExceptionType` carried in
//! exception reports.

use crate::objects::exception::ExceptionType;

/// Exception class values used by the classifier
pub mod ec {
    pub const UNKNOWN: u8 = 0x00;
    pub const ILLEGAL_EXECUTION: u8 = 0x0E;
    pub const SVC64: u8 = 0x15;
    pub const INSTRUCTION_ABORT_LOWER: u8 = 0x20;
    pub const INSTRUCTION_ABORT_SAME: u8 = 0x21;
    pub const PC_ALIGNMENT: u8 = 0x22;
    pub const DATA_ABORT_LOWER: u8 = 0x24;
    pub const DATA_ABORT_SAME: u8 = 0x25;
    pub const SP_ALIGNMENT: u8 = 0x26;
    pub const BREAKPOINT_LOWER: u8 = 0x30;
    pub const BREAKPOINT_SAME: u8 = 0x31;
    pub const SOFTWARE_STEP_LOWER: u8 = 0x32;
    pub const SOFTWARE_STEP_SAME: u8 = 0x33;
    pub const WATCHPOINT_LOWER: u8 = 0x34;
    pub const WATCHPOINT_SAME: u8 = 0x35;
    pub const BRK64: u8 = 0x3C;
}

/// Data fault status code for an alignment fault
const DFSC_ALIGNMENT: u64 = 0x21;

/// Exception class of a syndrome value
#[inline]
pub const fn exception_class(esr: u64) -> u8 {
    ((esr >> 26) & 0x3F) as u8
}

/// Classify a synchronous exception from its syndrome
pub fn classify_syndrome(esr: u64) -> ExceptionType {
    match exception_class(esr) {
        ec::UNKNOWN | ec::ILLEGAL_EXECUTION => ExceptionType::UndefinedInstruction,
        ec::INSTRUCTION_ABORT_LOWER | ec::INSTRUCTION_ABORT_SAME => ExceptionType::FatalPageFault,
        ec::DATA_ABORT_LOWER | ec::DATA_ABORT_SAME => {
            if esr & 0x3F == DFSC_ALIGNMENT {
                ExceptionType::UnalignedAccess
            } else {
                ExceptionType::FatalPageFault
            }
        }
        ec::PC_ALIGNMENT | ec::SP_ALIGNMENT => ExceptionType::UnalignedAccess,
        ec::BRK64 => ExceptionType::SwBreakpoint,
        ec::BREAKPOINT_LOWER
        | ec::BREAKPOINT_SAME
        | ec::SOFTWARE_STEP_LOWER
        | ec::SOFTWARE_STEP_SAME
        | ec::WATCHPOINT_LOWER
        | ec::WATCHPOINT_SAME => ExceptionType::HwBreakpoint,
        _ => ExceptionType::General,
    }
}
