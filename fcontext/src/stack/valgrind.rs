//! Valgrind needs to be told about stacks it didn't see the program create, otherwise every
//! switch to one looks like a wild stack pointer change. The client request API is a set of C
//! macros that boil down to a magic instruction sequence. On real hardware the sequence does
//! nothing and the "default" value comes back, so all of this is a no-op outside of Valgrind.
#![allow(non_camel_case_types)]

pub type stack_id_t = u32;

const RUNNING_ON_VALGRIND: usize = 0x1001;
const STACK_REGISTER: usize = 0x1501;
const STACK_DEREGISTER: usize = 0x1502;

#[cfg(target_arch = "x86_64")]
#[inline(always)]
unsafe fn client_request(default: usize, args: &[usize; 6]) -> usize {
    let result;
    std::arch::asm!(
        "rol rdi, 3",
        "rol rdi, 13",
        "rol rdi, 61",
        "rol rdi, 51",
        "xchg rbx, rbx",
        inout("rdx") default => result,
        in("rax") args.as_ptr(),
        inout("rdi") 0usize => _,
        options(nostack),
    );
    result
}

#[cfg(target_arch = "aarch64")]
#[inline(always)]
unsafe fn client_request(default: usize, args: &[usize; 6]) -> usize {
    let result;
    std::arch::asm!(
        "ror x12, x12, #3",
        "ror x12, x12, #13",
        "ror x12, x12, #51",
        "ror x12, x12, #61",
        "orr x10, x10, x10",
        inout("x3") default => result,
        in("x4") args.as_ptr(),
        inout("x12") 0usize => _,
        inout("x10") 0usize => _,
        options(nostack),
    );
    result
}

pub fn running_on_valgrind() -> bool {
    unsafe { client_request(0, &[RUNNING_ON_VALGRIND, 0, 0, 0, 0, 0]) != 0 }
}

/// Register a stack with Valgrind. Returns an ID that is needed to deregister the stack, or 0
/// when not running under Valgrind.
/// `start < end`.
pub unsafe fn stack_register(start: *const u8, end: *const u8) -> stack_id_t {
    if !running_on_valgrind() {
        return 0;
    }
    client_request(0, &[STACK_REGISTER, start as usize, end as usize, 0, 0, 0]) as stack_id_t
}

/// Deregister a stack, takes the ID returned on registration.
pub unsafe fn stack_deregister(id: stack_id_t) {
    if running_on_valgrind() {
        client_request(0, &[STACK_DEREGISTER, id as usize, 0, 0, 0, 0]);
    }
}
