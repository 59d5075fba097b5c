//! Switching core shared by coroutines and call chains
//!
//! A [`Link`] is the type-erased part of a coroutine: its two execution
//! contexts and the bookkeeping the engine needs to route control. It is only
//! ever reached through raw pointers; every mutable field is a `Cell` or an
//! `UnsafeCell`, and at most one side of a switch is live at a time.
//!
//! The thread-local `ACTIVE` pointer names the coroutine that owns the stack
//! currently executing (null on the root stack). Every flow that switches away
//! remembers `ACTIVE` and restores it when it is switched back into, so the
//! invariant holds without any side knowing who will resume it.

use crate::chain::CallChain;
use crate::coroutine::CoroutineState;
use crate::envelope::Envelope;
use crate::{observer, stats};
use costack_core::{ExecutionContext, Lane};
use std::cell::{Cell, UnsafeCell};
use std::sync::Arc;
use tracing::trace;

thread_local! {
    static ACTIVE: Cell<*const Link> = const { Cell::new(std::ptr::null()) };
}

/// Coroutine owning the current stack, null on the root stack
pub(crate) fn active() -> *const Link {
    ACTIVE.with(|a| a.get())
}

/// Whether the current thread is executing inside a coroutine body
pub fn in_coroutine() -> bool {
    !active().is_null()
}

pub(crate) struct Link {
    pub(crate) id: u64,
    pub(crate) name: Option<Arc<str>>,
    /// Where control returns on yield/finish; captured on every call/resume
    pub(crate) caller: UnsafeCell<ExecutionContext>,
    /// Where the body resumes; fresh until first entry
    pub(crate) callee: UnsafeCell<ExecutionContext>,
    pub(crate) state: Cell<CoroutineState>,
    /// Chain of the invocation graph this coroutine is running in
    pub(crate) chain: Cell<*const CallChain>,
    /// Coroutine whose stack issued the last call/resume, null for root
    pub(crate) resumer: Cell<*const Link>,
}

impl Link {
    pub(crate) fn new(id: u64, name: Option<Arc<str>>) -> Self {
        Link {
            id,
            name,
            caller: UnsafeCell::new(ExecutionContext::empty()),
            callee: UnsafeCell::new(ExecutionContext::empty()),
            state: Cell::new(CoroutineState::Idle),
            chain: Cell::new(std::ptr::null()),
            resumer: Cell::new(std::ptr::null()),
        }
    }

    /// Receiving side of a switch into this coroutine
    pub(crate) fn adopt(&self, envelope: &Envelope) {
        self.chain.set(envelope.chain);
        self.state.set(CoroutineState::Running);
    }
}

/// Observer-facing identity of the stack owned by `link`
///
/// # Safety
/// `link` must be null or point to a live `Link`.
pub(crate) unsafe fn lane_of(link: *const Link) -> Lane {
    if link.is_null() {
        return Lane::root();
    }
    unsafe {
        let link = &*link;
        match (*link.callee.get()).lane() {
            Some(lane) => lane.clone(),
            None => Lane::new(link.id, link.name.clone(), None),
        }
    }
}

fn id_of(link: *const Link) -> u64 {
    if link.is_null() {
        Lane::ROOT_ID
    } else {
        unsafe { (*link).id }
    }
}

/// Switch from the current flow into `to`, owned by `to_owner`
///
/// Returns the envelope delivered by whoever switches back into `from`.
///
/// # Safety
/// Same contract as [`ExecutionContext::switch`]; additionally `to_owner` must
/// be null exactly when `to` runs on the root stack.
pub(crate) unsafe fn transfer(
    from: *mut ExecutionContext,
    to: *const ExecutionContext,
    to_owner: *const Link,
    envelope: &Envelope,
) -> Envelope {
    let saved = active();
    observer::notify(saved, to_owner);
    stats::record_switch();
    trace!(
        origin = ?envelope.origin,
        from = id_of(saved),
        to = id_of(to_owner),
        "context switch"
    );

    ACTIVE.with(|a| a.set(to_owner));
    let word = unsafe { ExecutionContext::switch(from, to, envelope.as_word()) };
    ACTIVE.with(|a| a.set(saved));

    unsafe { Envelope::from_word(word) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::Origin;

    #[test]
    fn test_root_stack_is_not_in_coroutine() {
        assert!(!in_coroutine());
        assert!(active().is_null());
    }

    #[test]
    fn test_lane_of_root_and_untagged_link() {
        assert!(unsafe { lane_of(std::ptr::null()) }.is_root());

        let link = Link::new(42, Some(Arc::from("loader")));
        let lane = unsafe { lane_of(&link) };
        assert_eq!(lane.id(), 42);
        assert_eq!(lane.name(), Some("loader"));
        assert_eq!(lane.stack(), None);
    }

    #[test]
    fn test_adopt_takes_chain_and_runs() {
        let link = Link::new(1, None);
        let chain = 0x40 as *const CallChain;
        link.adopt(&Envelope::new(Origin::Root, &link, chain));
        assert_eq!(link.state.get(), CoroutineState::Running);
        assert_eq!(link.chain.get(), chain);
    }
}
