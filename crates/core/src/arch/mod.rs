//! Per-architecture register save/restore
//!
//! Each backend exports the same three items:
//! - `Registers`: callee-saved state of one suspended flow of control
//! - `Registers::fresh`: a context whose first activation enters the trampoline
//! - `switch`: save into one `Registers`, restore another, hand over one word

#[cfg(not(unix))]
compile_error!("costack requires a Unix target (mmap-backed stacks)");

#[cfg(all(unix, target_arch = "x86_64"))]
mod x86_64;
#[cfg(all(unix, target_arch = "x86_64"))]
pub(crate) use self::x86_64::{Registers, switch};

#[cfg(all(unix, target_arch = "aarch64"))]
mod aarch64;
#[cfg(all(unix, target_arch = "aarch64"))]
pub(crate) use self::aarch64::{Registers, switch};

#[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
compile_error!("costack only supports x86_64 and aarch64");
