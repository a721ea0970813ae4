use fcontext::stack::{self, StackClass};
use fcontext::{jump_context, make_context, Context, Transfer};

unsafe extern "C" fn pong(mut t: Transfer) {
    let mut from = Context::empty();
    loop {
        println!("pong {}", t.data);
        t = jump_context(&mut from, t.context, t.data + 1, false);
    }
}

fn main() {
    let storage = stack::allocate_class(StackClass::Small).unwrap();
    println!(
        "stack: {} bytes + {} guard, {} live",
        storage.stacksize(),
        storage.guardsize(),
        stack::stack_count()
    );

    let mut main = Context::empty();
    let mut peer = unsafe { make_context(storage.bottom(), storage.stacksize(), pong) };
    let mut value = 0;
    for _ in 0..3 {
        println!("ping {}", value);
        let t = unsafe { jump_context(&mut main, peer, value, false) };
        value = t.data + 1;
        peer = t.context;
    }

    // `pong` is left suspended, nothing will ever jump back into it.
    unsafe { stack::deallocate(storage) };
    println!("{} live", stack::stack_count());
}
