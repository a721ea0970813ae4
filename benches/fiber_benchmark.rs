use criterion::{criterion_group, criterion_main, BatchSize, Criterion};

use bfiber::{Fiber, FiberOutcome};
use fcontext::stack::StackClass;

fn fiber_bench(c: &mut Criterion) {
    c.bench_function("fiber create and finish", |b| {
        b.iter_batched(
            || (),
            |_| {
                let mut fiber = Fiber::new(StackClass::Small, |_suspender, input: u64| {
                    let _ = input;
                })
                .unwrap();
                let outcome: FiberOutcome<u64> = fiber.resume(1);
                outcome
            },
            BatchSize::SmallInput,
        )
    });

    c.bench_function("fiber resume", |b| {
        let mut fiber = Fiber::new(StackClass::Small, |suspender, mut input: u64| loop {
            input = suspender.suspend(input + 1);
        })
        .unwrap();
        b.iter(|| fiber.resume(1))
    });
}

criterion_group!(benches, fiber_bench);
criterion_main!(benches);
