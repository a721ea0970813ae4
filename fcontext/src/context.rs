use std::ffi::c_void;
use std::fmt;
use std::ptr;

use crate::arch;

/// A suspended line of execution.
///
/// Internally it's just the stack pointer of a register save frame, but it can only be consumed
/// (by [`jump_context`]), never copied. Each jump produces a new `Context` describing whoever
/// got suspended by it.
#[repr(transparent)]
pub struct Context(*mut c_void);

impl Context {
    /// An empty slot, ready to be passed as the `from` argument of [`jump_context`].
    pub const fn empty() -> Self {
        Context(ptr::null_mut())
    }

    /// Returns true if this slot never received a context.
    pub fn is_empty(&self) -> bool {
        self.0.is_null()
    }

    pub(crate) fn as_ptr(&self) -> *const c_void {
        self.0
    }
}

impl Default for Context {
    fn default() -> Self {
        Context::empty()
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Context").field(&self.as_ptr()).finish()
    }
}

/// What a resumed context receives: the word passed to the jump and the context of the code that
/// jumped, so it can always jump back.
#[repr(C)]
#[derive(Debug)]
pub struct Transfer {
    pub data: usize,
    pub context: Context,
}

/// Entry point of a fresh context. It receives the [`Transfer`] of the first jump into it.
///
/// It must never return. The only way to leave it is to jump to another context that never jumps
/// back. Returning aborts the process.
pub type ContextFn = unsafe extern "C" fn(Transfer);

/// Prepares a context that will run `entry` once jumped into.
///
/// Nothing runs yet, a register save frame is written just below the 16 byte aligned `stack_top`.
///
/// # Safety
/// `stack_top` must be the highest address of a writable region of at least `stack_size` bytes that
/// stays alive for as long as the returned context (or any context derived from it) is in use.
pub unsafe fn make_context(stack_top: *mut u8, stack_size: usize, entry: ContextFn) -> Context {
    debug_assert!(stack_size >= arch::CONTEXT_FRAME_SIZE + arch::STACK_ALIGN);
    arch::fcontext_make(stack_top, stack_size, entry)
}

/// Suspends the current line of execution into `from` and resumes `to`, handing it `data`.
///
/// The call "returns" only once some other context jumps to the context stored in `from`, with the
/// data it passed and its own freshly suspended context.
///
/// If `preserve_fpu` is set the floating point control state travels with the contexts as well.
///
/// # Safety
/// `to` must come from [`make_context`] or a previous jump, its stack must still be alive and it
/// must not be resumed anywhere else. Nothing is checked here.
#[inline(always)]
pub unsafe fn jump_context(
    from: &mut Context,
    to: Context,
    data: usize,
    preserve_fpu: bool,
) -> Transfer {
    arch::fcontext_jump(from, to, data, preserve_fpu)
}

#[cfg(test)]
mod tests {
    use super::*;

    unsafe extern "C" fn never_entered(_: Transfer) {}

    #[test]
    fn frame_sits_below_aligned_top() {
        let mut memory = vec![0u8; 4096];
        let base = memory.as_mut_ptr();
        for misalignment in 0..arch::STACK_ALIGN {
            let top = unsafe { base.add(4096 - 64 + misalignment) };
            let context = unsafe { make_context(top, 4096 - 64, never_entered) };
            let aligned_top = top as usize & !(arch::STACK_ALIGN - 1);
            assert_eq!(
                context.as_ptr() as usize,
                aligned_top - arch::CONTEXT_FRAME_SIZE
            );
        }
    }

    #[test]
    fn empty_slot() {
        let slot = Context::default();
        assert!(slot.is_empty());
    }
}
