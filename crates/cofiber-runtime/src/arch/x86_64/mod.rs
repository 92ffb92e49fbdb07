//! x86_64 context switching implementation
//!
//! Saves the System V callee-saved registers plus the SSE/x87 control
//! words. Everything else is caller-saved, so the compiler already spilled
//! it around the call to `switch_context`.

use super::EntryFn;
use std::arch::naked_asm;

/// Saved execution context
#[repr(C)]
#[derive(Debug, Default, Clone, Copy)]
pub struct Context {
    pub rsp: u64,   // 0x00
    pub rip: u64,   // 0x08
    pub rbx: u64,   // 0x10
    pub rbp: u64,   // 0x18
    pub r12: u64,   // 0x20
    pub r13: u64,   // 0x28
    pub r14: u64,   // 0x30
    pub r15: u64,   // 0x38
    pub mxcsr: u32, // 0x40
    pub fpucw: u16, // 0x44
    _pad: u16,
}

impl Context {
    /// Saved stack pointer (0 for a context that was never saved or initialized)
    #[inline]
    pub fn stack_pointer(&self) -> usize {
        self.rsp as usize
    }
}

/// Default MXCSR: all exceptions masked, round to nearest
const MXCSR_DEFAULT: u32 = 0x1F80;

/// Default x87 control word: all exceptions masked, 64-bit precision
const FPUCW_DEFAULT: u16 = 0x037F;

/// Initialize a fresh context
///
/// When first switched to, the context runs `entry(arg)` on the stack that
/// ends at `stack_top`. `entry` must never return.
///
/// # Safety
///
/// `ctx` must be valid for writes. `stack_top` must be the one-past-the-end
/// address of a writable stack of at least a few hundred bytes.
#[inline]
pub unsafe fn init_context(ctx: *mut Context, stack_top: *mut u8, entry: EntryFn, arg: usize) {
    // 16-byte aligned top, then one slot holding a null return address so
    // stack walkers stop at the trampoline. The trampoline is entered by a
    // jump with rsp == top - 16, so its `call` leaves the callee aligned
    // exactly as after a normal call.
    let top = (stack_top as usize) & !0xF;
    let sp = top - 16;
    core::ptr::write(sp as *mut u64, 0);
    core::ptr::write((sp + 8) as *mut u64, 0);

    *ctx = Context {
        rsp: sp as u64,
        rip: fiber_entry_trampoline as usize as u64,
        rbx: 0,
        rbp: 0,
        r12: entry as usize as u64,
        r13: arg as u64,
        r14: 0,
        r15: 0,
        mxcsr: MXCSR_DEFAULT,
        fpucw: FPUCW_DEFAULT,
        _pad: 0,
    };
}

/// First code run on a fresh stack: calls `r12(r13)`
#[unsafe(naked)]
unsafe extern "C" fn fiber_entry_trampoline() {
    naked_asm!(
        "mov rdi, r13",
        "call r12",
        // entry functions never return
        "ud2",
    );
}

/// Save the running context into `old` and resume `new`
///
/// Returns when some later switch resumes `old`.
///
/// # Safety
///
/// `old` must be valid for writes, `new` must hold a context produced by
/// `init_context` or by a previous switch, whose stack is still alive.
#[unsafe(naked)]
pub unsafe extern "C" fn switch_context(_old: *mut Context, _new: *const Context) {
    naked_asm!(
        // Save into old (RDI); rsp points at our return address
        "mov [rdi + 0x00], rsp",
        "lea rax, [rip + 2f]",
        "mov [rdi + 0x08], rax",
        "mov [rdi + 0x10], rbx",
        "mov [rdi + 0x18], rbp",
        "mov [rdi + 0x20], r12",
        "mov [rdi + 0x28], r13",
        "mov [rdi + 0x30], r14",
        "mov [rdi + 0x38], r15",
        "stmxcsr [rdi + 0x40]",
        "fnstcw [rdi + 0x44]",
        // Load from new (RSI)
        "mov rsp, [rsi + 0x00]",
        "mov rbx, [rsi + 0x10]",
        "mov rbp, [rsi + 0x18]",
        "mov r12, [rsi + 0x20]",
        "mov r13, [rsi + 0x28]",
        "mov r14, [rsi + 0x30]",
        "mov r15, [rsi + 0x38]",
        "ldmxcsr [rsi + 0x40]",
        "fldcw [rsi + 0x44]",
        "jmp qword ptr [rsi + 0x08]",
        // Resume point of a saved context
        "2:",
        "ret",
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_layout() {
        assert_eq!(core::mem::offset_of!(Context, rip), 0x08);
        assert_eq!(core::mem::offset_of!(Context, r15), 0x38);
        assert_eq!(core::mem::offset_of!(Context, mxcsr), 0x40);
        assert_eq!(core::mem::offset_of!(Context, fpucw), 0x44);
    }

    extern "C" fn never(_arg: usize) -> ! {
        unreachable!()
    }

    #[test]
    fn test_init_context_alignment() {
        let mut stack = vec![0xAAu8; 4096 + 7];
        let top = unsafe { stack.as_mut_ptr().add(stack.len()) };
        let mut ctx = Context::default();
        unsafe { init_context(&mut ctx, top, never, 7) };

        assert_eq!(ctx.rsp % 16, 0);
        assert!(ctx.rsp as usize <= top as usize - 16);
        assert_eq!(ctx.r13, 7);
        assert_eq!(ctx.r12, never as usize as u64);
        assert_eq!(unsafe { *(ctx.rsp as *const u64) }, 0);
    }
}
