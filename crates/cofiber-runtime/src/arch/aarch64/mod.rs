//! aarch64 context switching implementation
//!
//! Saves the AAPCS64 callee-saved set: x19-x28, frame pointer, link
//! register, sp and the low halves of v8-v15.

use super::EntryFn;
use std::arch::naked_asm;

/// Saved execution context
#[repr(C)]
#[derive(Debug, Default, Clone, Copy)]
pub struct Context {
    pub x: [u64; 10], // 0x00 x19..x28
    pub fp: u64,      // 0x50 x29
    pub lr: u64,      // 0x58 x30
    pub sp: u64,      // 0x60
    _pad: u64,
    pub d: [u64; 8],  // 0x70 d8..d15
}

impl Context {
    #[inline]
    pub fn stack_pointer(&self) -> usize {
        self.sp as usize
    }
}

/// Initialize a fresh context
///
/// # Safety
///
/// Same contract as the x86_64 version: `ctx` writable, `stack_top` the end
/// of a live, writable stack.
#[inline]
pub unsafe fn init_context(ctx: *mut Context, stack_top: *mut u8, entry: EntryFn, arg: usize) {
    let sp = (stack_top as usize) & !0xF;

    let mut fresh = Context::default();
    fresh.x[0] = entry as usize as u64; // x19
    fresh.x[1] = arg as u64; // x20
    fresh.fp = 0;
    fresh.lr = fiber_entry_trampoline as usize as u64;
    fresh.sp = sp as u64;
    *ctx = fresh;
}

/// First code run on a fresh stack: calls `x19(x20)`
#[unsafe(naked)]
unsafe extern "C" fn fiber_entry_trampoline() {
    naked_asm!(
        "mov x0, x20",
        "blr x19",
        // entry functions never return
        "brk #0x1",
    );
}

/// Save the running context into `old` and resume `new`
///
/// # Safety
///
/// See the x86_64 version.
#[unsafe(naked)]
pub unsafe extern "C" fn switch_context(_old: *mut Context, _new: *const Context) {
    naked_asm!(
        // Save into old (x0)
        "stp x19, x20, [x0, #0x00]",
        "stp x21, x22, [x0, #0x10]",
        "stp x23, x24, [x0, #0x20]",
        "stp x25, x26, [x0, #0x30]",
        "stp x27, x28, [x0, #0x40]",
        "stp x29, x30, [x0, #0x50]",
        "mov x9, sp",
        "str x9, [x0, #0x60]",
        "stp d8, d9, [x0, #0x70]",
        "stp d10, d11, [x0, #0x80]",
        "stp d12, d13, [x0, #0x90]",
        "stp d14, d15, [x0, #0xa0]",
        // Load from new (x1)
        "ldp x19, x20, [x1, #0x00]",
        "ldp x21, x22, [x1, #0x10]",
        "ldp x23, x24, [x1, #0x20]",
        "ldp x25, x26, [x1, #0x30]",
        "ldp x27, x28, [x1, #0x40]",
        "ldp x29, x30, [x1, #0x50]",
        "ldr x9, [x1, #0x60]",
        "mov sp, x9",
        "ldp d8, d9, [x1, #0x70]",
        "ldp d10, d11, [x1, #0x80]",
        "ldp d12, d13, [x1, #0x90]",
        "ldp d14, d15, [x1, #0xa0]",
        // x30 is the saved return address, or the trampoline for a fresh context
        "ret",
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_layout() {
        assert_eq!(core::mem::offset_of!(Context, fp), 0x50);
        assert_eq!(core::mem::offset_of!(Context, sp), 0x60);
        assert_eq!(core::mem::offset_of!(Context, d), 0x70);
    }
}
