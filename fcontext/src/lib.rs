//! Fcontext provides the bare substrate for stackful coroutines.
//!
//! It consists of two independent parts:
//! 1. A [context switch](fn.jump_context.html) that moves execution between two stacks saving only
//!    the registers the calling convention requires.
//! 2. A [stack allocator](stack/fn.allocate.html) handing out page aligned stacks, optionally
//!    protected by guard pages.
//!
//! Anything resembling a coroutine or a scheduler is built on top of these.
//! ## Example
//! ```
//! use fcontext::stack;
//! use fcontext::{jump_context, make_context, Context, Transfer};
//!
//! unsafe extern "C" fn add_one(t: Transfer) {
//!     let mut from = Context::empty();
//!     let mut t = jump_context(&mut from, t.context, t.data + 1, false);
//!     loop {
//!         t = jump_context(&mut from, t.context, t.data + 1, false);
//!     }
//! }
//!
//! fn main() {
//!     let storage = stack::allocate(64 * 1024, 4096).unwrap();
//!     let mut main = Context::empty();
//!     unsafe {
//!         let ctx = make_context(storage.bottom(), storage.stacksize(), add_one);
//!         let t = jump_context(&mut main, ctx, 2, false);
//!         assert_eq!(t.data, 3);
//!         let t = jump_context(&mut main, t.context, 127, false);
//!         assert_eq!(t.data, 128);
//!         // `add_one` stays suspended forever, its stack can go.
//!         stack::deallocate(storage);
//!     }
//! }
//! ```

mod arch;
mod context;
pub mod error;
pub mod stack;

pub use context::{jump_context, make_context, Context, ContextFn, Transfer};
pub use error::{ConfigError, StackError};
