//! Call Chains
//!
//! One [`CallChain`] exists per outermost `call`/`resume`, i.e. one issued
//! from the root stack. It lives in that call's stack frame and every
//! coroutine entered transitively from it holds a plain pointer to it.
//!
//! Its job is to let any coroutine in the graph borrow the root stack for a
//! closure, then come back exactly where it left off:
//!
//! ```text
//!  root stack                        coroutine C (any nesting depth)
//!  ──────────                        ───────────────────────────────
//!  call/resume ──────── Root ──────►  ...
//!                                     run_on_main_stack(f)
//!  drive() ◄────── RootCallback ────  (parks inside transfer)
//!   f()
//!   ─────────────────── Root ──────►  returns f's result
//!                                     ...
//!  drive() ◄──── Nested (yield) ────  yield / return to the outermost caller
//! ```
//!
//! The root context saved in the chain is the caller slot of the outermost
//! coroutine, so the root can always be reached in one switch no matter how
//! deep the requesting coroutine is nested. The requester's own caller slot is
//! never touched, so nested callers are resumed normally afterwards.

use crate::envelope::{Envelope, Origin};
use crate::link::{Link, transfer};
use crate::stats;
use costack_core::ExecutionContext;
use std::any::Any;
use std::cell::Cell;
use std::panic::{AssertUnwindSafe, catch_unwind, resume_unwind};
use tracing::debug;

type PendingFn = *mut (dyn FnMut() + 'static);

pub(crate) struct CallChain {
    /// Caller slot of the outermost coroutine; holds the root stack while
    /// any coroutine of this graph runs
    root: *mut ExecutionContext,
    /// Closure parked on the requesting coroutine's stack
    pending: Cell<Option<PendingFn>>,
    /// Panic raised by the pending closure, re-raised on the requester's stack
    panic: Cell<Option<Box<dyn Any + Send>>>,
}

impl CallChain {
    pub(crate) fn new(root: *mut ExecutionContext) -> Self {
        stats::record_root_chain();
        debug!("call chain created");
        CallChain {
            root,
            pending: Cell::new(None),
            panic: Cell::new(None),
        }
    }

    /// Root side: serve callback requests until a plain yield or return arrives
    ///
    /// # Safety
    /// Must run on the root stack, inside the outermost call that created
    /// this chain, with `reply` freshly received from a switch out of `root`.
    pub(crate) unsafe fn drive(&self, mut reply: Envelope) -> Envelope {
        while reply.origin == Origin::RootCallback {
            let requester = reply.target;
            self.run_pending();

            let back = Envelope::new(Origin::Root, requester, self);
            reply = unsafe { transfer(self.root, (*requester).callee.get(), requester, &back) };
        }
        reply
    }

    fn run_pending(&self) {
        // Every RootCallback envelope is sent right after storing its closure
        let callback = self.pending.take();
        debug_assert!(callback.is_some(), "root callback requested without a pending closure");
        let Some(callback) = callback else {
            return;
        };
        stats::record_root_callback();

        // SAFETY: the closure lives on the requester's stack, which stays
        // parked until we switch back to it.
        let outcome = catch_unwind(AssertUnwindSafe(|| unsafe { (*callback)() }));
        if let Err(payload) = outcome {
            self.panic.set(Some(payload));
        }
    }

    /// Coroutine side: run `callback` on the root stack, then return here
    ///
    /// A panic raised by `callback` is resumed on the calling stack.
    ///
    /// # Safety
    /// `link` must be the running coroutine and this must be its chain.
    pub(crate) unsafe fn run_on_root_stack(&self, link: *const Link, callback: &mut dyn FnMut()) {
        let callback: *mut (dyn FnMut() + '_) = callback;
        // SAFETY: this frame does not resume until the root side has called
        // and released the closure, so the erased lifetime is never exceeded.
        let callback: PendingFn = unsafe { std::mem::transmute(callback) };
        self.pending.set(Some(callback));

        let request = Envelope::new(Origin::RootCallback, link, self);
        let reply = unsafe { transfer((*link).callee.get(), self.root, std::ptr::null(), &request) };
        debug_assert_eq!(reply.origin, Origin::Root);
        unsafe { (*link).adopt(&reply) };

        if let Some(payload) = self.panic.take() {
            resume_unwind(payload);
        }
    }
}

/// Run `f` on the root stack on behalf of the running coroutine `link`
///
/// # Safety
/// `link` must be the running coroutine on this thread.
pub(crate) unsafe fn run_on_chain<T>(link: *const Link, f: impl FnOnce() -> T) -> T {
    let mut f = Some(f);
    let mut out = None;
    let mut thunk = || {
        if let Some(f) = f.take() {
            out = Some(f());
        }
    };

    unsafe {
        let chain = (*link).chain.get();
        (*chain).run_on_root_stack(link, &mut thunk);
    }

    match out {
        Some(value) => value,
        None => unreachable!("root callback returned without running"),
    }
}
