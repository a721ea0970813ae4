// Every target exposes the same two symbols, written in assembly with `global_asm!`:
// * `fcontext_make(stack_top: *mut u8, stack_size: usize, entry: ContextFn) -> Context`
// * `fcontext_jump(from: *mut Context, to: Context, data: usize, preserve_fpu: bool) -> Transfer`
// plus the constants `CONTEXT_FRAME_SIZE` and `STACK_ALIGN`.
//
// ### fcontext_make
// Rounds `stack_top` down to `STACK_ALIGN` and reserves one register save frame below it. The frame
// is filled in exactly like a frame that `fcontext_jump` would have pushed, so the first jump into
// it restores "registers" and jumps to `entry`. Here is how the fresh frames look:
// ```
//      +------------------+        +------------------+
//      |trampoline        | 0x40   |padding / FPCR    | 0xa8
//      +------------------+        +------------------+
//      |entry (resume pc) | 0x38   |entry (resume pc) | 0xa0
//      +------------------+        +------------------+
//      |rbp = 0           | 0x30   |x30 = trampoline  | 0x98
//      +------------------+        +------------------+
//      |rbx r15 r14 r13   |        |x29 = 0           | 0x90
//      |r12               |        +------------------+
//      +------------------+        |x19 - x28         |
//      |mxcsr | x87 cw    | 0x00   +------------------+
//      +------------------+        |d8 - d15          | 0x00
//                                  +------------------+
//         linux x86_64               linux aarch64
// ```
// The trampoline is what `entry` sees as its return address. Entry functions must never return, if
// one does the trampoline calls `context_fell_through` which aborts the process.
//
// ### fcontext_jump
// 1. Pushes the callee saved registers of the ABI (and the FPU control state if asked to).
// 2. Stores the stack pointer into `*from`.
// 3. Loads the stack pointer from `to` and pops the registers saved there.
// 4. Returns `Transfer { data, context: <old stack pointer> }` to the resumed code, either as the
//    return value of the `fcontext_jump` call that suspended it or as the argument of `entry`.
//
// None of the targets share code. Each one follows its own calling convention.

#[cfg(all(target_os = "linux", target_arch = "x86_64"))]
mod linux_x86_64;
#[cfg(all(target_os = "linux", target_arch = "x86_64"))]
pub(crate) use self::linux_x86_64::*;

#[cfg(all(target_os = "linux", target_arch = "aarch64"))]
mod linux_aarch64;
#[cfg(all(target_os = "linux", target_arch = "aarch64"))]
pub(crate) use self::linux_aarch64::*;

#[cfg(not(all(target_os = "linux", any(target_arch = "x86_64", target_arch = "aarch64"))))]
compile_error!("fcontext only supports linux on x86_64 and aarch64");

use crate::context::{Context, ContextFn, Transfer};

extern "C" {
    pub(crate) fn fcontext_make(stack_top: *mut u8, stack_size: usize, entry: ContextFn) -> Context;

    pub(crate) fn fcontext_jump(
        from: *mut Context,
        to: Context,
        data: usize,
        preserve_fpu: bool,
    ) -> Transfer;
}

/// Landing spot for entry functions that return. There is no frame to go back to.
extern "C" fn context_fell_through() -> ! {
    tracing::error!("context entry function returned, terminating the process");
    std::process::abort()
}
