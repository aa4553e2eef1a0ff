//! Signal bits
//!
//! A kernel object's signal state is a 32-bit mask. The low bits carry
//! object-kind specific meaning, bit 23 is reserved for "the handle being
//! waited on was closed", and the top byte is free for user space.

use bitflags::bitflags;

bitflags! {
    /// Bitmask of conditions that currently hold on an object
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct Signals: u32 {
        /// Data available (ports: at least one packet queued)
        const READABLE = 1 << 0;
        /// Space available
        const WRITABLE = 1 << 1;
        /// The peer endpoint went away
        const PEER_CLOSED = 1 << 2;
        /// Generic "signaled" bit (notifications)
        const SIGNALED = 1 << 3;
        /// Task has terminated
        const TERMINATED = 1 << 4;
        /// Task is running
        const RUNNING = 1 << 5;
        /// SMC channel: a request is outstanding
        const SMC_READABLE = 1 << 6;
        /// SMC channel: the outstanding request has been claimed
        const SMC_SIGNALED = 1 << 7;

        /// Reserved: the waited-on handle was closed
        const HANDLE_CLOSED = 1 << 23;

        const USER_0 = 1 << 24;
        const USER_1 = 1 << 25;
        const USER_2 = 1 << 26;
        const USER_3 = 1 << 27;
        const USER_4 = 1 << 28;
        const USER_5 = 1 << 29;
        const USER_6 = 1 << 30;
        const USER_7 = 1 << 31;

        /// All user-settable bits
        const USER_ALL = 0xff00_0000;
    }
}

impl Signals {
    /// Check whether any bit of `watched` is asserted
    #[inline]
    pub const fn satisfies(self, watched: Signals) -> bool {
        self.bits() & watched.bits() != 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_bits_are_contiguous() {
        let all = Signals::USER_0
            | Signals::USER_1
            | Signals::USER_2
            | Signals::USER_3
            | Signals::USER_4
            | Signals::USER_5
            | Signals::USER_6
            | Signals::USER_7;
        assert_eq!(all, Signals::USER_ALL);
        assert!(!Signals::USER_ALL.intersects(Signals::HANDLE_CLOSED));
    }

    #[test]
    fn satisfies_is_any_intersection() {
        let state = Signals::READABLE | Signals::USER_1;
        assert!(state.satisfies(Signals::USER_1 | Signals::USER_2));
        assert!(!state.satisfies(Signals::WRITABLE));
        assert!(!state.satisfies(Signals::empty()));
    }
}
