//! Invocation Envelopes
//!
//! The only data that crosses a context switch. The sender builds one on its
//! own stack and passes its address as the switch word; the receiver copies it
//! out immediately after the switch completes, before the sender's stack can
//! be touched again.

use crate::chain::CallChain;
use crate::link::Link;

/// Why control is being transferred
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Origin {
    /// Sent from the root stack: an outermost call/resume, or the root
    /// handing control back after running a callback
    Root,
    /// Sent from a coroutine stack: a nested call/resume, a yield, or a
    /// finished body returning to its caller
    Nested,
    /// A coroutine asks the root stack to run the chain's pending closure
    RootCallback,
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct Envelope {
    pub(crate) origin: Origin,
    /// Coroutine this transfer concerns
    pub(crate) target: *const Link,
    /// Chain coordinating the current invocation graph (not owned)
    pub(crate) chain: *const CallChain,
}

impl Envelope {
    pub(crate) fn new(origin: Origin, target: *const Link, chain: *const CallChain) -> Self {
        Envelope {
            origin,
            target,
            chain,
        }
    }

    pub(crate) fn as_word(&self) -> usize {
        self as *const Envelope as usize
    }

    /// # Safety
    /// `word` must come from [`Envelope::as_word`] on an envelope whose
    /// sender is parked in a switch.
    pub(crate) unsafe fn from_word(word: usize) -> Self {
        unsafe { *(word as *const Envelope) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_word_round_trip_copies_fields() {
        let target = 0x1000 as *const Link;
        let chain = 0x2000 as *const CallChain;
        let sent = Envelope::new(Origin::RootCallback, target, chain);

        let received = unsafe { Envelope::from_word(sent.as_word()) };
        assert_eq!(received.origin, Origin::RootCallback);
        assert_eq!(received.target, target);
        assert_eq!(received.chain, chain);
    }
}
