use std::io;

use thiserror::Error;

use crate::stack::StackClass;

/// Reasons a stack allocation can fail.
///
/// A failed allocation never leaks a mapping: anything obtained from the OS before the failing step
/// is released before the error is returned.
#[derive(Error, Debug)]
pub enum StackError {
    #[error("failed to malloc an unguarded stack (size={size})")]
    OutOfMemory { size: usize },

    #[error(
        "failed to mmap size={size} stack_count={live}, possibly limited by /proc/sys/vm/max_map_count"
    )]
    MapFailed {
        size: usize,
        live: i64,
        #[source]
        source: io::Error,
    },

    #[error("failed to mprotect {addr:#x} length={len}")]
    ProtectFailed {
        addr: usize,
        len: usize,
        #[source]
        source: io::Error,
    },

    #[error("mmap returned {addr:#x}, misaligned by {offset} bytes, leaving nothing of the {guard} byte guard")]
    GuardSwallowed {
        addr: usize,
        offset: usize,
        guard: usize,
    },

    #[error("requested stack size {requested} overflows when rounded up to whole pages")]
    SizeOverflow { requested: usize },

    #[error("stacks of class {0:?} are not allocated here")]
    UnsupportedClass(StackClass),
}

impl StackError {
    /// Returns true if the host ran out of a resource (memory or mappings), as opposed to the
    /// guard protection step or the request itself being at fault.
    pub fn is_resource_exhaustion(&self) -> bool {
        matches!(self, StackError::OutOfMemory { .. } | StackError::MapFailed { .. })
    }
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value {value:?} for {var}")]
    InvalidValue { var: &'static str, value: String },
}
