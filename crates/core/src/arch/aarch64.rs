//! aarch64 (AAPCS64) context switching

use crate::context::EntryFn;
use std::arch::naked_asm;

/// Callee-saved state of a suspended flow of control
///
/// x19-x28, fp, lr, sp and the low halves of v8-v15 (d8-d15).
/// Offsets are hard-coded in `switch`; keep the field order in sync.
#[allow(dead_code)]
#[repr(C)]
#[derive(Debug, Clone, Default)]
pub(crate) struct Registers {
    sp: usize,  // 0x00
    lr: usize,  // 0x08
    fp: usize,  // 0x10
    x19: usize, // 0x18
    x20: usize,
    x21: usize,
    x22: usize,
    x23: usize,
    x24: usize,
    x25: usize,
    x26: usize,
    x27: usize,
    x28: usize, // 0x60
    d8: u64,    // 0x68
    d9: u64,
    d10: u64,
    d11: u64,
    d12: u64,
    d13: u64,
    d14: u64,
    d15: u64, // 0xa0
}

impl Registers {
    /// Context whose first activation runs `entry(word)` on the stack ending at `stack_top`
    ///
    /// # Safety
    /// `stack_top` must be the end of a writable stack region.
    pub(crate) unsafe fn fresh(stack_top: usize, entry: EntryFn) -> Self {
        // `ret` jumps to lr, so nothing needs to be written to the stack.
        Registers {
            sp: stack_top & !0xF,
            lr: trampoline as *const () as usize,
            x19: entry as *const () as usize,
            ..Default::default()
        }
    }
}

/// First instruction run on a fresh stack
///
/// x0 carries the word handed to `switch`; x19 carries the entry function.
#[unsafe(naked)]
unsafe extern "C" fn trampoline() {
    naked_asm!(
        // Terminate frame-record walks here
        "mov x29, xzr",
        "mov x30, xzr",
        "blr x19",
        // Entry functions never return
        "brk #0",
    );
}

/// Save the current state into `from`, restore `to`, deliver `word`
///
/// Returns the word passed by whoever later switches back into `from`.
///
/// # Safety
/// `from` must be writable. `to` must hold a context produced by `fresh`
/// or captured by an earlier `switch` that has not been resumed since.
#[unsafe(naked)]
pub(crate) unsafe extern "C" fn switch(
    _from: *mut Registers,
    _to: *const Registers,
    _word: usize,
) -> usize {
    // x0 = from, x1 = to, x2 = word
    naked_asm!(
        // Save callee-saved state to `from`
        "mov x9, sp",
        "str x9,  [x0, #0x00]",
        "str lr,  [x0, #0x08]",
        "str fp,  [x0, #0x10]",
        "stp x19, x20, [x0, #0x18]",
        "stp x21, x22, [x0, #0x28]",
        "stp x23, x24, [x0, #0x38]",
        "stp x25, x26, [x0, #0x48]",
        "stp x27, x28, [x0, #0x58]",
        "stp d8,  d9,  [x0, #0x68]",
        "stp d10, d11, [x0, #0x78]",
        "stp d12, d13, [x0, #0x88]",
        "stp d14, d15, [x0, #0x98]",
        // Restore callee-saved state from `to`
        "ldr x9,  [x1, #0x00]",
        "mov sp, x9",
        "ldr lr,  [x1, #0x08]",
        "ldr fp,  [x1, #0x10]",
        "ldp x19, x20, [x1, #0x18]",
        "ldp x21, x22, [x1, #0x28]",
        "ldp x23, x24, [x1, #0x38]",
        "ldp x25, x26, [x1, #0x48]",
        "ldp x27, x28, [x1, #0x58]",
        "ldp d8,  d9,  [x1, #0x68]",
        "ldp d10, d11, [x1, #0x78]",
        "ldp d12, d13, [x1, #0x88]",
        "ldp d14, d15, [x1, #0x98]",
        // Hand the word over as the return value of the resumed `switch`
        // (or in x0 to the trampoline on a fresh stack)
        "mov x0, x2",
        "ret",
    );
}
