//! Bfiber builds stackful fibers out of the two halves of [fcontext](../fcontext/index.html): a
//! stack from its allocator and a context switched onto that stack.
//!
//! ## Example
//! ```
//! use bfiber::{Fiber, FiberOutcome};
//! use fcontext::stack::StackClass;
//!
//! fn main() {
//!     let mut add_one = Fiber::new(StackClass::Small, |suspender, mut input: i32| {
//!         loop {
//!             if input == 0 {
//!                 break;
//!             }
//!             input = suspender.suspend(input + 1);
//!         }
//!     })
//!     .unwrap();
//!
//!     assert_eq!(add_one.resume(2), FiberOutcome::Suspended(3));
//!     assert_eq!(add_one.resume(127), FiberOutcome::Suspended(128));
//!     assert_eq!(add_one.resume(0), FiberOutcome::Terminated);
//!     assert_eq!(add_one.resume(0), FiberOutcome::Terminated);
//! }
//! ```

use std::any::Any;
use std::cell::Cell;
use std::marker::PhantomData;
use std::mem::{self, ManuallyDrop};
use std::panic::{catch_unwind, resume_unwind, AssertUnwindSafe};
use std::ptr;

use fcontext::stack::{self, StackClass, StackStorage};
use fcontext::{jump_context, make_context, Context, StackError, Transfer};

pub use fcontext::stack::stack_count;

// Communicates how the fiber handed control back.
enum FiberMessage<Output> {
    // The fiber suspended itself with a value.
    Value(Output),
    // The closure returned, the fiber will never run again.
    Finished,
    // The closure panicked. This value is passed to `resume_unwind` to continue the unwind
    // in the resuming context.
    Panic(Box<dyn Any + Send + 'static>),
}

/// What [`Fiber::resume`] observed.
#[derive(Debug, PartialEq, Eq)]
pub enum FiberOutcome<Output> {
    /// The fiber suspended itself, handing out a value.
    Suspended(Output),
    /// The fiber's closure is done. Resuming again keeps returning `Terminated`.
    Terminated,
}

// Unwind payload used to tear down a fiber that is dropped while suspended.
struct Cancel;

/// A closure running on its own stack that can suspend itself any number of times.
///
/// If the closure panics, the panic continues in whoever called [resume](#method.resume).
pub struct Fiber<'a, Input: 'a, Output: 'a> {
    stack: StackStorage,
    context: Option<Context>,
    started: bool,
    preserve_fpu: bool,
    phantom: PhantomData<(&'a (), *mut Input, *const Output)>,
}

impl<'a, Input, Output> Fiber<'a, Input, Output>
where
    Input: 'a,
    Output: 'a,
{
    /// Creates a fiber on a freshly allocated stack of the given class. Floating point control
    /// state is switched together with the fiber.
    pub fn new<F>(class: StackClass, f: F) -> Result<Self, StackError>
    where
        F: FnOnce(&Suspender<Input, Output>, Input) + 'a,
    {
        let stack = stack::allocate_class(class)?;
        Ok(Self::with_stack(stack, true, f))
    }

    /// Creates a fiber on `stack`, for example one taken out of a cache.
    ///
    /// `preserve_fpu` applies to every switch in and out of this fiber.
    pub fn with_stack<F>(stack: StackStorage, preserve_fpu: bool, f: F) -> Self
    where
        F: FnOnce(&Suspender<Input, Output>, Input) + 'a,
    {
        assert!(!stack.bottom().is_null(), "a fiber needs an allocated stack");

        // Entry point of the new context. The first jump only moves `f` onto the fiber's stack and
        // comes right back, the closure starts running on the first `resume`. Never returns.
        unsafe extern "C" fn fiber_entry<Input, Output, F>(t: Transfer)
        where
            F: FnOnce(&Suspender<Input, Output>, Input),
        {
            let (f, preserve_fpu) = ptr::read(t.data as *const (F, bool));
            let suspender = Suspender::new(t.context, preserve_fpu);

            let data = suspender.switch(0);
            if data == 0 {
                // Dropped before it was ever resumed.
                if catch_unwind(AssertUnwindSafe(move || drop(f))).is_err() {
                    tracing::warn!("dropping the closure of a never started fiber panicked");
                }
                suspender.finish(FiberMessage::Finished);
            }
            let input = ptr::read(data as *const Input);

            // It is not safe to unwind across the context switch.
            // The unwind will continue in the resuming context.
            let message = match catch_unwind(AssertUnwindSafe(|| f(&suspender, input))) {
                Ok(()) => FiberMessage::Finished,
                Err(panic) => FiberMessage::Panic(panic),
            };
            suspender.finish(message);
        }

        let context = unsafe {
            make_context(
                stack.bottom(),
                stack.stacksize(),
                fiber_entry::<Input, Output, F>,
            )
        };

        // `f` is moved out by `fiber_entry`, it must not be dropped here as well.
        let start = ManuallyDrop::new((f, preserve_fpu));
        let mut from = Context::empty();
        let t = unsafe {
            jump_context(
                &mut from,
                context,
                &start as *const ManuallyDrop<(F, bool)> as usize,
                preserve_fpu,
            )
        };

        Fiber {
            stack,
            context: Some(t.context),
            started: false,
            preserve_fpu,
            phantom: PhantomData,
        }
    }

    /// Runs the fiber until it suspends or finishes.
    #[inline(always)]
    pub fn resume(&mut self, input: Input) -> FiberOutcome<Output> {
        let context = match self.context.take() {
            Some(context) => context,
            None => return FiberOutcome::Terminated,
        };
        self.started = true;

        let input = ManuallyDrop::new(input);
        let mut from = Context::empty();
        let t = unsafe {
            jump_context(
                &mut from,
                context,
                &input as *const ManuallyDrop<Input> as usize,
                self.preserve_fpu,
            )
        };

        match unsafe { ptr::read(t.data as *const FiberMessage<Output>) } {
            FiberMessage::Value(value) => {
                self.context = Some(t.context);
                FiberOutcome::Suspended(value)
            }
            FiberMessage::Finished => FiberOutcome::Terminated,
            FiberMessage::Panic(panic) => resume_unwind(panic),
        }
    }

    /// Returns true if the closure started running.
    #[inline(always)]
    pub fn started(&self) -> bool {
        self.started
    }

    /// Returns true if the closure finished (or panicked).
    #[inline(always)]
    pub fn finished(&self) -> bool {
        self.context.is_none()
    }

    /// Tears the fiber down and hands its stack back instead of deallocating it.
    pub fn into_stack(mut self) -> StackStorage {
        self.cancel();
        mem::take(&mut self.stack)
        // Drop for Fiber runs here with an empty stack, deallocating it is a no-op.
    }

    // Unwinds a suspended fiber (or drops a closure that never ran) so nothing is left on its stack.
    fn cancel(&mut self) {
        if let Some(context) = self.context.take() {
            let mut from = Context::empty();
            unsafe {
                let t = jump_context(&mut from, context, 0, self.preserve_fpu);
                // The cancel payload comes back as a panic, it is not resumed here.
                drop(ptr::read(t.data as *const FiberMessage<Output>));
            }
        }
    }
}

impl<'a, Input, Output> Drop for Fiber<'a, Input, Output>
where
    Input: 'a,
    Output: 'a,
{
    fn drop(&mut self) {
        self.cancel();
        unsafe { stack::deallocate(mem::take(&mut self.stack)) };
    }
}

/// Handed to every fiber's closure, used to give control back to whoever resumed it.
pub struct Suspender<Input, Output> {
    caller: Cell<Context>,
    preserve_fpu: bool,
    phantom: PhantomData<(*const Input, *mut Output)>,
}

impl<Input, Output> Suspender<Input, Output> {
    fn new(caller: Context, preserve_fpu: bool) -> Self {
        Suspender {
            caller: Cell::new(caller),
            preserve_fpu,
            phantom: PhantomData,
        }
    }

    /// Suspends the fiber, `resume` returns `Suspended(value)`. Returns the input of the next
    /// `resume`.
    #[inline(always)]
    pub fn suspend(&self, value: Output) -> Input {
        let message = ManuallyDrop::new(FiberMessage::Value(value));
        let data =
            unsafe { self.switch(&message as *const ManuallyDrop<FiberMessage<Output>> as usize) };

        // A 0 data pointer means the fiber is being dropped. Unwind its stack.
        if data == 0 {
            resume_unwind(Box::new(Cancel));
        }
        unsafe { ptr::read(data as *const Input) }
    }

    // Jumps back to the last resumer and remembers who resumes us next.
    #[inline(always)]
    unsafe fn switch(&self, data: usize) -> usize {
        let mut from = Context::empty();
        let caller = self.caller.replace(Context::empty());
        let t = jump_context(&mut from, caller, data, self.preserve_fpu);
        self.caller.set(t.context);
        t.data
    }

    // Last switch out of a fiber, nothing jumps back after it.
    unsafe fn finish(&self, message: FiberMessage<Output>) -> ! {
        let message = ManuallyDrop::new(message);
        self.switch(&message as *const ManuallyDrop<FiberMessage<Output>> as usize);
        tracing::error!("a finished fiber was resumed");
        std::process::abort()
    }
}
