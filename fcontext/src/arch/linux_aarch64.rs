use std::arch::global_asm;

/// Size of the register save frame: d8-d15, x19-x30, the resume address and the FPCR slot.
pub(crate) const CONTEXT_FRAME_SIZE: usize = 0xb0;
/// Alignment of `sp` required at all times by AAPCS64.
pub(crate) const STACK_ALIGN: usize = 16;

// AAPCS64. Arguments: x0 = from, x1 = to, x2 = data, w3 = preserve_fpu.
// The `Transfer` return value goes into x0:x1, for a fresh context it is the argument in x0:x1.
// d8-d15 are always saved, the compiler is free to keep integers in them across calls.
// `preserve_fpu` only adds the floating point control register.
global_asm!(
    ".pushsection .text.fcontext_jump,\"ax\",%progbits",
    ".globl fcontext_jump",
    ".type fcontext_jump,%function",
    ".p2align 2",
    "fcontext_jump:",
    "    sub sp, sp, #0xb0",
    "    stp d8, d9, [sp, #0x00]",
    "    stp d10, d11, [sp, #0x10]",
    "    stp d12, d13, [sp, #0x20]",
    "    stp d14, d15, [sp, #0x30]",
    "    stp x19, x20, [sp, #0x40]",
    "    stp x21, x22, [sp, #0x50]",
    "    stp x23, x24, [sp, #0x60]",
    "    stp x25, x26, [sp, #0x70]",
    "    stp x27, x28, [sp, #0x80]",
    "    stp x29, x30, [sp, #0x90]",
    // Resume right after the `bl` that got us here.
    "    str x30, [sp, #0xa0]",
    "    and w3, w3, #0xff",
    "    cbz w3, .Lfcontext_jump_skip_save",
    "    mrs x9, fpcr",
    "    str x9, [sp, #0xa8]",
    ".Lfcontext_jump_skip_save:",
    "    mov x5, sp",
    "    str x5, [x0]",
    "    mov sp, x1",
    "    cbz w3, .Lfcontext_jump_skip_restore",
    "    ldr x9, [sp, #0xa8]",
    "    msr fpcr, x9",
    ".Lfcontext_jump_skip_restore:",
    "    ldp d8, d9, [sp, #0x00]",
    "    ldp d10, d11, [sp, #0x10]",
    "    ldp d12, d13, [sp, #0x20]",
    "    ldp d14, d15, [sp, #0x30]",
    "    ldp x19, x20, [sp, #0x40]",
    "    ldp x21, x22, [sp, #0x50]",
    "    ldp x23, x24, [sp, #0x60]",
    "    ldp x25, x26, [sp, #0x70]",
    "    ldp x27, x28, [sp, #0x80]",
    "    ldp x29, x30, [sp, #0x90]",
    "    mov x0, x2",
    "    mov x1, x5",
    "    ldr x4, [sp, #0xa0]",
    "    add sp, sp, #0xb0",
    "    ret x4",
    ".size fcontext_jump,.-fcontext_jump",
    ".popsection",
);

// Arguments: x0 = stack_top, x1 = stack_size (unused), x2 = entry.
// The trampoline goes into the x30 slot so `entry` returns into it.
global_asm!(
    ".pushsection .text.fcontext_make,\"ax\",%progbits",
    ".globl fcontext_make",
    ".type fcontext_make,%function",
    ".p2align 2",
    "fcontext_make:",
    "    and x0, x0, #0xfffffffffffffff0",
    "    sub x0, x0, #0xb0",
    "    str x2, [x0, #0xa0]",
    "    adr x1, .Lfcontext_make_trampoline",
    "    stp xzr, x1, [x0, #0x90]",
    "    mrs x9, fpcr",
    "    str x9, [x0, #0xa8]",
    "    ret",
    ".Lfcontext_make_trampoline:",
    "    bl {fell_through}",
    "    brk #0x1",
    ".size fcontext_make,.-fcontext_make",
    ".popsection",
    fell_through = sym super::context_fell_through,
);
