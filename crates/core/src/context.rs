//! Execution Contexts
//!
//! An [`ExecutionContext`] is the saved register state of one suspended flow
//! of control, tagged with the [`Lane`] it belongs to. The only operation on it
//! is [`ExecutionContext::switch`], which is `unsafe`: the engine above this
//! crate is responsible for never resuming a stale context.
//!
//! ## Lifecycle
//!
//! ```text
//! empty() ──switch(from=this)──► captured ──switch(to=this)──► consumed
//!                                    ▲                             │
//!                                    └──────── switch(from=this) ◄─┘
//! fresh(top, entry) ──switch(to=this)──► entry(word) runs on the new stack
//! ```

use crate::arch::Registers;
use crate::stack::StackBounds;
use std::sync::Arc;

/// Function run on the first activation of a fresh context
///
/// Receives the word handed to the switch that activated it. Must never
/// return and must not unwind out.
pub type EntryFn = unsafe extern "C" fn(usize) -> !;

/// Identity of one stack for external tooling (sanitizers, profilers)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lane {
    id: u64,
    name: Option<Arc<str>>,
    stack: Option<StackBounds>,
}

impl Lane {
    /// Id reserved for the root (non-coroutine) stack
    pub const ROOT_ID: u64 = 0;

    /// The original thread stack
    pub fn root() -> Self {
        Lane {
            id: Self::ROOT_ID,
            name: None,
            stack: None,
        }
    }

    pub fn new(id: u64, name: Option<Arc<str>>, stack: Option<StackBounds>) -> Self {
        Lane { id, name, stack }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Usable range of the lane's stack; `None` for the root stack
    pub fn stack(&self) -> Option<StackBounds> {
        self.stack
    }

    pub fn is_root(&self) -> bool {
        self.id == Self::ROOT_ID
    }
}

impl std::fmt::Display for Lane {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (&self.name, self.is_root()) {
            (_, true) => write!(f, "root"),
            (Some(name), false) => write!(f, "{}#{}", name, self.id),
            (None, false) => write!(f, "coroutine#{}", self.id),
        }
    }
}

/// Saved state of a suspended flow of control
#[derive(Debug, Default)]
pub struct ExecutionContext {
    regs: Registers,
    lane: Option<Lane>,
}

impl ExecutionContext {
    /// A slot to be filled by the next `switch` that leaves from it
    pub fn empty() -> Self {
        Self::default()
    }

    /// A context whose first activation runs `entry` on the stack ending at `stack_top`
    ///
    /// # Safety
    /// `stack_top` must be the end of a mapped, writable stack that stays
    /// mapped for as long as the context can be resumed.
    pub unsafe fn fresh(stack_top: usize, entry: EntryFn, lane: Option<Lane>) -> Self {
        ExecutionContext {
            regs: unsafe { Registers::fresh(stack_top, entry) },
            lane,
        }
    }

    /// Lane this context executes on, when tagged
    pub fn lane(&self) -> Option<&Lane> {
        self.lane.as_ref()
    }

    /// Suspend the current flow into `from` and resume `to`, handing it `word`
    ///
    /// Returns the word delivered by whichever flow later switches back into
    /// `from`. There is no failure path: control either transfers or the
    /// process dies of stack corruption.
    ///
    /// # Safety
    /// - `from` must be valid for writes and must not be resumed by anyone
    ///   until this call has saved into it.
    /// - `to` must be a context from [`ExecutionContext::fresh`] that was never
    ///   activated, or one captured by a `switch` and not resumed since.
    /// - The stack `to` runs on must stay mapped until it is switched away from.
    pub unsafe fn switch(from: *mut ExecutionContext, to: *const ExecutionContext, word: usize) -> usize {
        unsafe { crate::arch::switch(&raw mut (*from).regs, &raw const (*to).regs, word) }
    }
}
