//! Coroutines
//!
//! A [`Coroutine`] runs an entry closure on its own private stack. The caller
//! enters it with [`Coroutine::call`], the body hands control back with
//! [`Yielder::yield_with`], and the caller picks it up again with
//! [`Coroutine::resume`]:
//!
//! ```text
//!         call(arg)            yield_with(v)           resume()
//!  Idle ────────────► Running ──────────────► Suspended ───────► Running
//!                        │                                         │
//!                        └───────────── body returns ──────────────┴──► Finished
//! ```
//!
//! `call`/`resume` return `Ok(true)` when the body yielded and `Ok(false)`
//! when it finished. A coroutine entered from the root stack mints a fresh
//! call chain; one entered from inside another coroutine joins that
//! coroutine's chain.
//!
//! ## Abandonment
//!
//! Dropping a Suspended coroutine releases its stack without unwinding it:
//! locals of the suspended body, including the entry closure, are never
//! dropped. Run a coroutine to completion when its body owns resources that
//! need cleanup.
//!
//! ## Stack overflow
//!
//! Overflowing the stack hits the guard page and kills the process. Size
//! stacks for the deepest call path the body can take.

use crate::chain::{CallChain, run_on_chain};
use crate::config::CoroutineConfig;
use crate::envelope::{Envelope, Origin};
use crate::error::{CoroutineError, format_panic_payload};
use crate::link::{self, Link, transfer};
use crate::stats;
use costack_core::{ExecutionContext, Lane, PageSource, StackArena, StackBounds, SystemPages};
use std::any::Any;
use std::panic::{AssertUnwindSafe, catch_unwind, resume_unwind};
use std::ptr::NonNull;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, warn};

// Unique coroutine ID generation (0 is the root lane)
static NEXT_COROUTINE_ID: AtomicU64 = AtomicU64::new(1);

/// Lifecycle of a coroutine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoroutineState {
    /// Constructed, never entered; the stack is not allocated yet
    Idle,
    /// The body is executing
    Running,
    /// The body yielded and waits for `resume`
    Suspended,
    /// The body returned (or panicked); cannot be entered again
    Finished,
}

impl std::fmt::Display for CoroutineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            CoroutineState::Idle => "idle",
            CoroutineState::Running => "running",
            CoroutineState::Suspended => "suspended",
            CoroutineState::Finished => "finished",
        };
        f.write_str(name)
    }
}

type Body<R, A> = Box<dyn FnOnce(&Yielder<R>, A) -> R>;

// `link` must stay the first field: the entry trampoline only receives a
// `Link` pointer and casts it back to the full `Inner`.
#[repr(C)]
struct Inner<R, A> {
    link: Link,
    body: Option<Body<R, A>>,
    arg: Option<A>,
    value: Option<R>,
    panic: Option<Box<dyn Any + Send>>,
    arena: Option<StackArena>,
    config: CoroutineConfig,
    source: Arc<dyn PageSource>,
}

/// Configures a coroutine before construction
pub struct CoroutineBuilder {
    config: CoroutineConfig,
    name: Option<Arc<str>>,
    source: Arc<dyn PageSource>,
}

impl Default for CoroutineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl CoroutineBuilder {
    /// Start from the process-wide configuration (see [`CoroutineConfig::global`])
    pub fn new() -> Self {
        CoroutineBuilder {
            config: CoroutineConfig::global().clone(),
            name: None,
            source: Arc::new(SystemPages),
        }
    }

    /// Requested usable stack size in bytes, rounded up to whole pages
    pub fn stack_size(mut self, size: usize) -> Self {
        self.config.stack_size = size;
        self
    }

    /// Whether the page below the stack is made inaccessible
    pub fn guard_page(mut self, guard: bool) -> Self {
        self.config.guard_page = guard;
        self
    }

    /// Name reported to switch observers and logs
    pub fn name(mut self, name: impl Into<Arc<str>>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Where stack memory comes from (defaults to [`SystemPages`])
    pub fn page_source(mut self, source: Arc<dyn PageSource>) -> Self {
        self.source = source;
        self
    }

    pub fn build<R, A, F>(self, body: F) -> Coroutine<R, A>
    where
        R: 'static,
        A: 'static,
        F: FnOnce(&Yielder<R>, A) -> R + 'static,
    {
        let id = NEXT_COROUTINE_ID.fetch_add(1, Ordering::Relaxed);
        stats::record_created();

        let inner = Box::new(Inner {
            link: Link::new(id, self.name),
            body: Some(Box::new(body)),
            arg: None,
            value: None,
            panic: None,
            arena: None,
            config: self.config,
            source: self.source,
        });

        Coroutine {
            inner: NonNull::from(Box::leak(inner)),
        }
    }
}

/// A body with its own stack that can suspend and be resumed
///
/// `R` is the type of yielded and returned values, `A` the argument passed
/// to [`Coroutine::call`]. Not `Send`: a coroutine and its caller share one
/// thread.
pub struct Coroutine<R, A = ()> {
    inner: NonNull<Inner<R, A>>,
}

// Concrete so `Coroutine::builder()` needs no type annotations; the
// coroutine's types are fixed later by `CoroutineBuilder::build`.
impl Coroutine<(), ()> {
    pub fn builder() -> CoroutineBuilder {
        CoroutineBuilder::new()
    }
}

impl<R: 'static, A: 'static> Coroutine<R, A> {
    /// Coroutine with the process-wide default configuration
    pub fn new<F>(body: F) -> Self
    where
        F: FnOnce(&Yielder<R>, A) -> R + 'static,
    {
        CoroutineBuilder::new().build(body)
    }

    /// Enter the body with `arg`
    ///
    /// Only valid while Idle. Allocates the stack first; if that fails the
    /// coroutine stays Idle and `arg` is dropped.
    ///
    /// Returns `Ok(true)` if the body yielded, `Ok(false)` if it returned.
    /// A panic in the body propagates out of this call.
    pub fn call(&mut self, arg: A) -> Result<bool, CoroutineError> {
        let inner = self.inner.as_ptr();
        let state = self.state();
        if state != CoroutineState::Idle {
            return Err(CoroutineError::InvalidState {
                operation: "call",
                state: Some(state),
            });
        }

        unsafe {
            if (*inner).arena.is_none() {
                self.activate_stack()?;
            }
            (*inner).arg = Some(arg);
            Ok(self.enter())
        }
    }

    /// Continue the body after its last yield
    ///
    /// Only valid while Suspended. Same return convention as [`Coroutine::call`].
    pub fn resume(&mut self) -> Result<bool, CoroutineError> {
        let state = self.state();
        if state != CoroutineState::Suspended {
            return Err(CoroutineError::InvalidState {
                operation: "resume",
                state: Some(state),
            });
        }
        Ok(unsafe { self.enter() })
    }

    /// Allocate the arena and prepare the first activation
    unsafe fn activate_stack(&mut self) -> Result<(), CoroutineError> {
        let inner = self.inner.as_ptr();
        unsafe {
            let config = &(*inner).config;
            let arena =
                StackArena::acquire((*inner).source.clone(), config.stack_size, config.guard_page)?;
            stats::record_arena_acquired(arena.mapped_size());

            let link = &(*inner).link;
            let lane = Lane::new(link.id, link.name.clone(), arena.bounds());
            *link.callee.get() =
                ExecutionContext::fresh(arena.top(), coroutine_main::<R, A>, Some(lane));
            (*inner).arena = Some(arena);
        }
        Ok(())
    }

    /// Switch into the body and wait until it yields or finishes
    unsafe fn enter(&mut self) -> bool {
        let inner = self.inner.as_ptr();
        unsafe {
            let link: *const Link = &raw const (*inner).link;
            let active = link::active();
            (*link).resumer.set(active);

            let reply = if active.is_null() {
                let chain = CallChain::new((*link).caller.get());
                let envelope = Envelope::new(Origin::Root, link, &chain);
                let reply = transfer((*link).caller.get(), (*link).callee.get(), link, &envelope);
                chain.drive(reply)
            } else {
                let envelope = Envelope::new(Origin::Nested, link, (*active).chain.get());
                transfer((*link).caller.get(), (*link).callee.get(), link, &envelope)
            };
            debug_assert_eq!(reply.target, link);

            (*link).chain.set(std::ptr::null());
            match (*link).state.get() {
                CoroutineState::Suspended => true,
                CoroutineState::Finished => {
                    if let Some(payload) = (*inner).panic.take() {
                        resume_unwind(payload);
                    }
                    false
                }
                state @ (CoroutineState::Idle | CoroutineState::Running) => {
                    unreachable!("coroutine {} handed back control while {}", (*link).id, state)
                }
            }
        }
    }

    /// Latest value passed to `yield_with` or returned by the body
    pub fn return_value(&self) -> Option<&R> {
        unsafe { (*self.inner.as_ptr()).value.as_ref() }
    }

    /// Move the latest yielded or returned value out
    pub fn take_return_value(&mut self) -> Option<R> {
        unsafe { (*self.inner.as_ptr()).value.take() }
    }

    /// Change the stack size used by the next `call`; only while Idle
    pub fn set_stack_size(&mut self, size: usize) -> Result<(), CoroutineError> {
        let state = self.state();
        if state != CoroutineState::Idle {
            return Err(CoroutineError::InvalidState {
                operation: "resize the stack of",
                state: Some(state),
            });
        }
        unsafe { (*self.inner.as_ptr()).config.stack_size = size };
        Ok(())
    }
}

impl<R, A> Coroutine<R, A> {
    pub fn state(&self) -> CoroutineState {
        self.link().state.get()
    }

    /// True while Running or Suspended
    pub fn is_running(&self) -> bool {
        matches!(
            self.state(),
            CoroutineState::Running | CoroutineState::Suspended
        )
    }

    pub fn is_finished(&self) -> bool {
        self.state() == CoroutineState::Finished
    }

    pub fn id(&self) -> u64 {
        self.link().id
    }

    pub fn name(&self) -> Option<&str> {
        self.link().name.as_deref()
    }

    /// Requested stack size in bytes
    pub fn stack_size(&self) -> usize {
        unsafe { (*self.inner.as_ptr()).config.stack_size }
    }

    /// Whether the stack is currently mapped
    pub fn has_stack(&self) -> bool {
        unsafe { (*self.inner.as_ptr()).arena.is_some() }
    }

    /// Usable address range of the stack, once allocated
    pub fn stack_bounds(&self) -> Option<StackBounds> {
        unsafe { (*self.inner.as_ptr()).arena.as_ref().and_then(StackArena::bounds) }
    }

    fn link(&self) -> &Link {
        unsafe { &(*self.inner.as_ptr()).link }
    }
}

impl<R, A> Drop for Coroutine<R, A> {
    fn drop(&mut self) {
        // SAFETY: `inner` was leaked from a Box in `build` and is only freed here.
        let mut inner = unsafe { Box::from_raw(self.inner.as_ptr()) };
        let id = inner.link.id;

        match inner.link.state.get() {
            CoroutineState::Suspended => {
                stats::record_abandoned();
                warn!(
                    coroutine = id,
                    "dropping suspended coroutine; its stack is released without unwinding"
                );
            }
            CoroutineState::Running => {
                // Dropped from code running on its own stack (shared
                // ownership); that stack must stay mapped.
                std::process::abort();
            }
            CoroutineState::Idle | CoroutineState::Finished => {}
        }

        if let Some(mut arena) = inner.arena.take() {
            stats::record_arena_released(arena.mapped_size());
            arena.release();
        }
        debug!(coroutine = id, "coroutine dropped");
    }
}

impl<R, A> std::fmt::Debug for Coroutine<R, A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Coroutine")
            .field("id", &self.id())
            .field("name", &self.name())
            .field("state", &self.state())
            .field("stack_size", &self.stack_size())
            .finish()
    }
}

/// Handle given to a coroutine body for suspending itself
///
/// Only usable from the body it was handed to, while that body is running.
pub struct Yielder<R> {
    link: *const Link,
    value: *mut Option<R>,
}

impl<R> Yielder<R> {
    /// Suspend without recording a value; `return_value` keeps its previous content
    pub fn yield_now(&self) -> Result<(), CoroutineError> {
        self.suspend(None)
    }

    /// Record `value` as the latest value and suspend
    ///
    /// Returns once the caller resumes this coroutine.
    pub fn yield_with(&self, value: R) -> Result<(), CoroutineError> {
        self.suspend(Some(value))
    }

    /// Run `f` on the root stack and return its result here
    ///
    /// Not a yield: the caller of `call`/`resume` does not regain control.
    /// A panic inside `f` is resumed at this call site.
    pub fn run_on_main_stack<T>(&self, f: impl FnOnce() -> T) -> Result<T, CoroutineError> {
        self.check("run_on_main_stack")?;
        Ok(unsafe { run_on_chain(self.link, f) })
    }

    /// Id of the coroutine this handle belongs to
    pub fn id(&self) -> u64 {
        unsafe { (*self.link).id }
    }

    fn check(&self, operation: &'static str) -> Result<(), CoroutineError> {
        if link::active() != self.link {
            return Err(CoroutineError::InvalidState {
                operation,
                state: None,
            });
        }
        let state = unsafe { (*self.link).state.get() };
        if state != CoroutineState::Running {
            return Err(CoroutineError::InvalidState {
                operation,
                state: Some(state),
            });
        }
        Ok(())
    }

    fn suspend(&self, value: Option<R>) -> Result<(), CoroutineError> {
        self.check("yield")?;
        unsafe {
            if let Some(value) = value {
                *self.value = Some(value);
            }

            let link = self.link;
            (*link).state.set(CoroutineState::Suspended);
            let envelope = Envelope::new(Origin::Nested, link, (*link).chain.get());
            let reply = transfer(
                (*link).callee.get(),
                (*link).caller.get(),
                (*link).resumer.get(),
                &envelope,
            );
            (*link).adopt(&reply);
        }
        Ok(())
    }
}

/// Run `f` on the root stack on behalf of the coroutine executing this code
///
/// For library code deep inside a body that has no [`Yielder`] at hand.
/// Fails with `InvalidState` outside any coroutine.
pub fn run_on_main_stack<T>(f: impl FnOnce() -> T) -> Result<T, CoroutineError> {
    let link = link::active();
    if link.is_null() {
        return Err(CoroutineError::InvalidState {
            operation: "run_on_main_stack",
            state: None,
        });
    }
    Ok(unsafe { run_on_chain(link, f) })
}

/// First function executed on a fresh coroutine stack
unsafe extern "C" fn coroutine_main<R: 'static, A: 'static>(word: usize) -> ! {
    unsafe {
        let envelope = Envelope::from_word(word);
        let link = envelope.target;
        (*link).adopt(&envelope);

        let inner = link.cast_mut().cast::<Inner<R, A>>();
        let (Some(body), Some(arg)) = ((*inner).body.take(), (*inner).arg.take()) else {
            // `call` always stores both before the first switch
            std::process::abort();
        };

        let yielder = Yielder {
            link,
            value: &raw mut (*inner).value,
        };
        match catch_unwind(AssertUnwindSafe(|| body(&yielder, arg))) {
            Ok(value) => (*inner).value = Some(value),
            Err(payload) => {
                debug!(
                    coroutine = (*link).id,
                    panic = %format_panic_payload(&payload),
                    "coroutine body panicked"
                );
                (*inner).panic = Some(payload);
            }
        }
        drop(yielder);

        finish(link)
    }
}

/// Hand control back to the caller for the last time
unsafe fn finish(link: *const Link) -> ! {
    unsafe {
        (*link).state.set(CoroutineState::Finished);
        stats::record_finished();
        let envelope = Envelope::new(Origin::Nested, link, (*link).chain.get());
        transfer(
            (*link).callee.get(),
            (*link).caller.get(),
            (*link).resumer.get(),
            &envelope,
        );
    }
    // A finished coroutine is never switched back into
    std::process::abort()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_link_is_first_field() {
        assert_eq!(std::mem::offset_of!(Inner<String, Vec<u8>>, link), 0);
        assert_eq!(std::mem::offset_of!(Inner<(), ()>, link), 0);
    }

    #[test]
    fn test_state_display() {
        assert_eq!(CoroutineState::Idle.to_string(), "idle");
        assert_eq!(CoroutineState::Suspended.to_string(), "suspended");
    }

    #[test]
    fn test_builder_overrides() {
        let co = Coroutine::builder()
            .stack_size(96 * 1024)
            .guard_page(false)
            .name("probe")
            .build(|_: &Yielder<()>, ()| ());
        assert_eq!(co.stack_size(), 96 * 1024);
        assert_eq!(co.name(), Some("probe"));
        assert_eq!(co.state(), CoroutineState::Idle);
        assert!(!co.has_stack());
        unsafe { assert!(!(*co.inner.as_ptr()).config.guard_page) };
    }

    #[test]
    fn test_ids_are_unique_and_nonzero() {
        let a = Coroutine::new(|_: &Yielder<()>, ()| ());
        let b = Coroutine::new(|_: &Yielder<()>, ()| ());
        assert_ne!(a.id(), Lane::ROOT_ID);
        assert!(b.id() > a.id());
    }
}
