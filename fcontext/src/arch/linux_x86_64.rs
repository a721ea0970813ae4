use std::arch::global_asm;

/// Size of the register save frame: FPU slot, 6 callee saved registers and the resume address.
pub(crate) const CONTEXT_FRAME_SIZE: usize = 0x48;
/// Alignment of the stack pointer at a call boundary.
pub(crate) const STACK_ALIGN: usize = 16;

// System V AMD64. Arguments: rdi = from, rsi = to, rdx = data, cl = preserve_fpu.
// The `Transfer` return value goes into rax:rdx, for a fresh context it is the argument in rdi:rsi.
// xmm registers are all caller saved, only MXCSR and the x87 control word need preserving.
global_asm!(
    ".pushsection .text.fcontext_jump,\"ax\",@progbits",
    ".globl fcontext_jump",
    ".type fcontext_jump,@function",
    ".p2align 4",
    "fcontext_jump:",
    "    push rbp",
    "    push rbx",
    "    push r15",
    "    push r14",
    "    push r13",
    "    push r12",
    // Slot for mxcsr (4 bytes) and the x87 control word (2 bytes).
    "    lea rsp, [rsp - 8]",
    "    test cl, cl",
    "    je .Lfcontext_jump_skip_save",
    "    stmxcsr dword ptr [rsp]",
    "    fnstcw word ptr [rsp + 4]",
    ".Lfcontext_jump_skip_save:",
    "    mov [rdi], rsp",
    "    mov r9, rsp",
    "    mov rsp, rsi",
    "    test cl, cl",
    "    je .Lfcontext_jump_skip_restore",
    "    ldmxcsr dword ptr [rsp]",
    "    fldcw word ptr [rsp + 4]",
    ".Lfcontext_jump_skip_restore:",
    "    lea rsp, [rsp + 8]",
    "    pop r12",
    "    pop r13",
    "    pop r14",
    "    pop r15",
    "    pop rbx",
    "    pop rbp",
    "    pop r8",
    "    mov rax, rdx",
    "    mov rdi, rdx",
    "    mov rsi, r9",
    "    mov rdx, r9",
    "    jmp r8",
    ".size fcontext_jump,.-fcontext_jump",
    ".popsection",
);

// Arguments: rdi = stack_top, rsi = stack_size (unused), rdx = entry.
// On entry `rsp` points at the trampoline slot, so `rsp + 8` is 16 byte aligned as after a `call`.
global_asm!(
    ".pushsection .text.fcontext_make,\"ax\",@progbits",
    ".globl fcontext_make",
    ".type fcontext_make,@function",
    ".p2align 4",
    "fcontext_make:",
    "    mov rax, rdi",
    "    and rax, -16",
    "    lea rax, [rax - 0x48]",
    "    mov [rax + 0x38], rdx",
    "    mov qword ptr [rax + 0x30], 0",
    "    stmxcsr dword ptr [rax]",
    "    fnstcw word ptr [rax + 4]",
    "    lea rcx, [rip + .Lfcontext_make_trampoline]",
    "    mov [rax + 0x40], rcx",
    "    ret",
    ".Lfcontext_make_trampoline:",
    "    call {fell_through}@PLT",
    "    ud2",
    ".size fcontext_make,.-fcontext_make",
    ".popsection",
    fell_through = sym super::context_fell_through,
);
