//! costack: stackful cooperative coroutines
//!
//! A [`Coroutine`] runs a closure on its own private stack and can suspend at
//! any call depth. The caller decides when it continues:
//!
//! ```ignore
//! use costack::{Coroutine, Yielder};
//!
//! let mut gen = Coroutine::new(|y: &Yielder<i32>, start: i32| {
//!     y.yield_with(start + 1).unwrap();
//!     y.yield_with(start + 2).unwrap();
//!     start + 3
//! });
//!
//! assert!(gen.call(10)?);                       // yielded 11
//! assert!(gen.resume()?);                       // yielded 12
//! assert!(!gen.resume()?);                      // returned 13
//! assert_eq!(gen.return_value(), Some(&13));
//! ```
//!
//! Key design principles:
//! - Nesting: a coroutine may call or resume others; each yield returns to
//!   whichever stack issued the matching call/resume.
//! - Root callbacks: any coroutine, at any depth, can run a closure on the
//!   original thread stack with [`Yielder::run_on_main_stack`] and continue
//!   with its result.
//! - Single-threaded: coroutines are `!Send` and never preempted.
//!
//! # Modules
//!
//! - `coroutine`: [`Coroutine`], [`Yielder`], [`CoroutineBuilder`]
//! - `config`: defaults and `COSTACK_*` environment variables
//! - `observer`: [`SwitchObserver`] hooks for sanitizers and profilers
//! - `stats`, `report`, `diagnostics`: counters and ways to dump them

mod chain;
pub mod config;
pub mod coroutine;
pub mod diagnostics;
mod envelope;
pub mod error;
mod link;
pub mod observer;
pub mod report;
pub mod stats;

pub use config::{CoroutineConfig, DEFAULT_STACK_SIZE, MIN_STACK_SIZE};
pub use coroutine::{Coroutine, CoroutineBuilder, CoroutineState, Yielder, run_on_main_stack};
pub use error::CoroutineError;
pub use link::in_coroutine;
pub use observer::{SwitchObserver, set_switch_observer};
pub use stats::StatsSnapshot;

// Core types callers see through builders and observers
pub use costack_core::{AllocError, Lane, PageSource, StackBounds, SystemPages, TrackingPages};
