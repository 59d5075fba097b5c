//! x86_64 (System V) context switching

use crate::context::EntryFn;
use std::arch::naked_asm;

/// Default MXCSR: all exceptions masked, round to nearest
const MXCSR_DEFAULT: u32 = 0x1F80;
/// Default x87 control word: extended precision, all exceptions masked
const FPU_CW_DEFAULT: u16 = 0x037F;

/// Callee-saved state of a suspended flow of control
///
/// Offsets are hard-coded in `switch`; keep the field order in sync.
#[allow(dead_code)]
#[repr(C)]
#[derive(Debug, Clone, Default)]
pub(crate) struct Registers {
    rsp: usize, // 0x00
    rbp: usize, // 0x08
    rbx: usize, // 0x10
    r12: usize, // 0x18
    r13: usize, // 0x20
    r14: usize, // 0x28
    r15: usize, // 0x30
    mxcsr: u32, // 0x38
    fpu_cw: u16, // 0x3c
}

impl Registers {
    /// Context whose first activation runs `entry(word)` on the stack ending at `stack_top`
    ///
    /// # Safety
    /// The 16 bytes below `stack_top` must be writable.
    pub(crate) unsafe fn fresh(stack_top: usize, entry: EntryFn) -> Self {
        // `ret` in `switch` pops the trampoline address, leaving RSP at
        // stack_top - 8. The trampoline realigns before calling `entry`.
        let rsp = (stack_top & !0xF) - 16;
        unsafe { (rsp as *mut usize).write(trampoline as *const () as usize) };

        Registers {
            rsp,
            r15: entry as *const () as usize,
            mxcsr: MXCSR_DEFAULT,
            fpu_cw: FPU_CW_DEFAULT,
            ..Default::default()
        }
    }
}

/// First instruction run on a fresh stack
///
/// RAX carries the word handed to `switch`; R15 carries the entry function.
#[unsafe(naked)]
unsafe extern "C" fn trampoline() {
    naked_asm!(
        "mov rdi, rax",
        // Terminate frame-pointer walks here
        "xor ebp, ebp",
        "and rsp, -16",
        "call r15",
        // Entry functions never return
        "ud2",
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
    naked_asm!(
        // Save callee-saved state to `from` (rdi)
        "mov [rdi + 0x00], rsp",
        "mov [rdi + 0x08], rbp",
        "mov [rdi + 0x10], rbx",
        "mov [rdi + 0x18], r12",
        "mov [rdi + 0x20], r13",
        "mov [rdi + 0x28], r14",
        "mov [rdi + 0x30], r15",
        "stmxcsr [rdi + 0x38]",
        "fnstcw [rdi + 0x3c]",
        // Restore callee-saved state from `to` (rsi)
        "mov rsp, [rsi + 0x00]",
        "mov rbp, [rsi + 0x08]",
        "mov rbx, [rsi + 0x10]",
        "mov r12, [rsi + 0x18]",
        "mov r13, [rsi + 0x20]",
        "mov r14, [rsi + 0x28]",
        "mov r15, [rsi + 0x30]",
        "ldmxcsr [rsi + 0x38]",
        "fldcw [rsi + 0x3c]",
        // Hand the word over as the return value of the resumed `switch`
        // (or in RAX to the trampoline on a fresh stack)
        "mov rax, rdx",
        "ret",
    );
}
