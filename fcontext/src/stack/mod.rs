//! Memory that contexts run on.
//!
//! A stack is either a plain heap block (no overflow detection) or an anonymous mapping whose
//! lowest pages are made inaccessible, so that running off the end faults right away instead of
//! silently scribbling over a neighbour:
//! ```text
//!   bottom ->  +------------------+  highest address, initial stack pointer
//!              |                  |
//!              |  usable          |  stacksize
//!              |                  |
//!   limit  ->  +------------------+
//!              |  guard (no r/w)  |  guardsize
//!              +------------------+  lowest address, start of the mapping
//! ```

mod class;
mod config;
pub(crate) mod every_second;
mod valgrind;

pub use class::StackClass;
pub use config::{config, set_config, StackConfig};

use std::io::Error;
use std::ptr;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Once;

use libc::{mmap, mprotect, munmap};
use libc::{MAP_ANON, MAP_FAILED, MAP_PRIVATE, PROT_NONE, PROT_READ, PROT_WRITE};
use once_cell::sync::Lazy;

use crate::error::StackError;
use every_second::error_every_second;

static STACK_COUNT: AtomicI64 = AtomicI64::new(0);

static PAGE_SIZE: Lazy<usize> = Lazy::new(|| checked_page_size(unsafe { libc::sysconf(libc::_SC_PAGESIZE) }));

const FALLBACK_PAGE_SIZE: usize = 4096;

fn checked_page_size(raw: libc::c_long) -> usize {
    match usize::try_from(raw) {
        Ok(size) if size.is_power_of_two() => size,
        _ => {
            tracing::error!(
                sysconf = raw,
                fallback = FALLBACK_PAGE_SIZE,
                "sysconf(_SC_PAGESIZE) returned a bogus page size"
            );
            FALLBACK_PAGE_SIZE
        }
    }
}

static UNALIGNED_MMAP: Once = Once::new();

/// Size of a memory page on this system.
pub fn page_size() -> usize {
    *PAGE_SIZE
}

/// Number of stacks allocated and not yet deallocated, process wide.
pub fn stack_count() -> i64 {
    STACK_COUNT.load(Ordering::Relaxed)
}

/// A region a context can run on. Stacks grow down, so `bottom` is the highest address.
///
/// The storage is not released on drop, it has to be handed back to [`deallocate`] by its owner.
#[derive(Debug)]
pub struct StackStorage {
    bottom: *mut u8,
    stacksize: usize,
    guardsize: usize,
    valgrind_stack_id: valgrind::stack_id_t,
}

unsafe impl Send for StackStorage {}

impl Default for StackStorage {
    /// A zeroed handle that owns nothing. Deallocating it does nothing.
    fn default() -> Self {
        Self {
            bottom: ptr::null_mut(),
            stacksize: 0,
            guardsize: 0,
            valgrind_stack_id: 0,
        }
    }
}

impl StackStorage {
    fn new(bottom: *mut u8, stacksize: usize, guardsize: usize) -> Self {
        let valgrind_stack_id =
            unsafe { valgrind::stack_register(bottom.wrapping_sub(stacksize), bottom) };
        Self {
            bottom,
            stacksize,
            guardsize,
            valgrind_stack_id,
        }
    }

    /// Highest address of the usable region, where the stack pointer starts.
    #[inline(always)]
    pub fn bottom(&self) -> *mut u8 {
        self.bottom
    }

    /// Lowest usable address. The guard region, if any, starts right below it.
    #[inline(always)]
    pub fn limit(&self) -> *mut u8 {
        self.bottom.wrapping_sub(self.stacksize)
    }

    #[inline(always)]
    pub fn stacksize(&self) -> usize {
        self.stacksize
    }

    #[inline(always)]
    pub fn guardsize(&self) -> usize {
        self.guardsize
    }

    #[inline(always)]
    pub fn is_guarded(&self) -> bool {
        self.guardsize > 0
    }
}

fn round_to_pages(size: usize, page: usize) -> Option<usize> {
    Some(size.checked_add(page - 1)? & !(page - 1))
}

/// Allocates a stack of at least `stacksize` bytes (rounded up to whole pages, two at minimum).
///
/// If `guardsize > 0` the stack is mmapped with at least one page worth of inaccessible memory
/// below it, otherwise it's a plain malloc with no overflow detection.
pub fn allocate(stacksize: usize, guardsize: isize) -> Result<StackStorage, StackError> {
    let page = page_size();
    let rounded = round_to_pages(stacksize.max(2 * page), page).ok_or(StackError::SizeOverflow {
        requested: stacksize,
    })?;

    if guardsize <= 0 {
        allocate_unguarded(rounded)
    } else {
        allocate_guarded(rounded, guardsize as usize)
    }
}

/// Allocates a stack of the configured size for `class`, guarded as configured.
pub fn allocate_class(class: StackClass) -> Result<StackStorage, StackError> {
    let size = class
        .default_size()
        .ok_or(StackError::UnsupportedClass(class))?;
    allocate(size, config().guard_page_size)
}

fn allocate_unguarded(stacksize: usize) -> Result<StackStorage, StackError> {
    let mem = unsafe { libc::malloc(stacksize) } as *mut u8;
    if mem.is_null() {
        error_every_second!(size = stacksize, "failed to malloc an unguarded stack");
        return Err(StackError::OutOfMemory { size: stacksize });
    }
    STACK_COUNT.fetch_add(1, Ordering::Relaxed);
    Ok(StackStorage::new(
        unsafe { mem.add(stacksize) },
        stacksize,
        0,
    ))
}

fn allocate_guarded(stacksize: usize, guardsize: usize) -> Result<StackStorage, StackError> {
    let page = page_size();
    let guardsize = round_to_pages(guardsize.max(page), page).ok_or(StackError::SizeOverflow {
        requested: guardsize,
    })?;
    let memsize = stacksize
        .checked_add(guardsize)
        .ok_or(StackError::SizeOverflow {
            requested: stacksize,
        })?;

    let mem = unsafe {
        mmap(
            ptr::null_mut(),
            memsize,
            PROT_READ | PROT_WRITE,
            MAP_PRIVATE | MAP_ANON,
            -1,
            0,
        )
    };
    if mem == MAP_FAILED {
        let source = Error::last_os_error();
        let live = stack_count();
        // May fail due to the limit of max_map_count (65530 by default).
        error_every_second!(
            size = memsize,
            stack_count = live,
            error = %source,
            "failed to mmap a stack, possibly limited by /proc/sys/vm/max_map_count"
        );
        return Err(StackError::MapFailed {
            size: memsize,
            live,
            source,
        });
    }
    let mem = mem as *mut u8;

    // Only platforms without a page aligned mmap can end up with an offset here.
    let offset = ((mem as usize + page - 1) & !(page - 1)) - mem as usize;
    if offset != 0 {
        UNALIGNED_MMAP.call_once(|| {
            tracing::error!(addr = ?mem, page_size = page, "mmap returned an address not aligned by page size");
        });
    }
    if guardsize <= offset {
        unsafe { munmap(mem.cast(), memsize) };
        error_every_second!(addr = ?mem, offset, guardsize, "misaligned mmap leaves no room for the guard");
        return Err(StackError::GuardSwallowed {
            addr: mem as usize,
            offset,
            guard: guardsize,
        });
    }

    let guard = unsafe { mem.add(offset) };
    let len = guardsize - offset;
    if unsafe { mprotect(guard.cast(), len, PROT_NONE) } != 0 {
        let source = Error::last_os_error();
        unsafe { munmap(mem.cast(), memsize) };
        error_every_second!(addr = ?guard, len, error = %source, "failed to mprotect the stack guard");
        return Err(StackError::ProtectFailed {
            addr: guard as usize,
            len,
            source,
        });
    }

    STACK_COUNT.fetch_add(1, Ordering::Relaxed);
    Ok(StackStorage::new(
        unsafe { mem.add(memsize) },
        stacksize,
        guardsize,
    ))
}

/// Gives the memory of `storage` back to the system.
///
/// Degenerate handles (like `StackStorage::default()`) are ignored.
///
/// # Safety
/// No context may still be running on, or be resumed onto, this stack.
pub unsafe fn deallocate(storage: StackStorage) {
    let memsize = storage.stacksize.saturating_add(storage.guardsize);
    // Not a proof of validity, only keeps zeroed handles from being freed.
    if storage.bottom as usize <= memsize {
        return;
    }
    valgrind::stack_deregister(storage.valgrind_stack_id);
    STACK_COUNT.fetch_sub(1, Ordering::Relaxed);

    let base = storage.bottom.sub(memsize);
    if storage.guardsize == 0 {
        libc::free(base.cast());
    } else {
        let result = munmap(base.cast(), memsize);
        debug_assert_eq!(result, 0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rounds_to_whole_pages() {
        assert_eq!(round_to_pages(1, 4096), Some(4096));
        assert_eq!(round_to_pages(4096, 4096), Some(4096));
        assert_eq!(round_to_pages(4097, 16384), Some(16384));
        assert_eq!(round_to_pages(usize::MAX, 4096), None);
    }

    #[test]
    fn page_size_is_a_power_of_two() {
        assert!(page_size().is_power_of_two());
        assert!(page_size() >= 4096);
    }

    #[test]
    fn bogus_page_size_falls_back() {
        assert_eq!(checked_page_size(-1), FALLBACK_PAGE_SIZE);
        assert_eq!(checked_page_size(0), FALLBACK_PAGE_SIZE);
        assert_eq!(checked_page_size(3000), FALLBACK_PAGE_SIZE);
        assert_eq!(checked_page_size(16384), 16384);
    }
}
