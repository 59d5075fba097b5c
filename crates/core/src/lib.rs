//! costack Core: the unsafe foundation of the coroutine engine
//!
//! This crate owns the two primitives that cannot be written in safe Rust:
//! private stack memory and the register-level switch between stacks.
//! Everything above it (`costack`) operates on these through opaque handles.
//!
//! # Modules
//!
//! - `page`: OS page mapping behind the [`PageSource`] trait
//! - `stack`: [`StackArena`], a guard-protected, page-aligned stack
//! - `context`: [`ExecutionContext`] and the raw `switch`
//! - `error`: [`AllocError`]

mod arch;
pub mod context;
pub mod error;
pub mod page;
pub mod stack;

pub use context::{EntryFn, ExecutionContext, Lane};
pub use error::AllocError;
pub use page::{PageSource, Protection, SystemPages, TrackingPages, page_size, round_to_pages};
pub use stack::{StackArena, StackBounds};
