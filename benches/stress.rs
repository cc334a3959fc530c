//! Randomized allocate/release churn across several size classes.
use core::mem::MaybeUninit;
use core::ptr::NonNull;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use tlsf_pool::Tlsf;

const ARENA_LEN: usize = 1 << 20;

struct Xorshift32(u32);

impl Xorshift32 {
    fn next(&mut self) -> u32 {
        self.0 ^= self.0 << 13;
        self.0 ^= self.0 >> 17;
        self.0 ^= self.0 << 5;
        self.0
    }
}

fn stress(c: &mut Criterion) {
    let mut group = c.benchmark_group("churn");

    for &(min_size, mask) in &[
        (1usize, 7usize),
        (1, 63),
        (1, 255),
        (16, 63),
        (64, 127),
        (128, 1023),
    ] {
        let size_range = min_size..min_size + mask + 1;
        group.bench_with_input(
            BenchmarkId::from_parameter(format!("{:?}", size_range)),
            &(min_size, mask),
            |b, &(min_size, mask)| {
                let mut arena = vec![MaybeUninit::<u8>::uninit(); ARENA_LEN].into_boxed_slice();
                let mut tlsf = Tlsf::create_with_pool(&mut arena).unwrap();

                let mut rng = Xorshift32(0x1234_5689);
                let mut next_size = move || (rng.next() as usize & mask) + min_size;

                // Keep the pool about half occupied, then churn one slot per
                // iteration so every round does one release and one allocate
                // against a realistically fragmented pool.
                let slots = (ARENA_LEN / (min_size + mask + 1) / 2).min(256);
                let mut allocs: Vec<NonNull<u8>> = (0..slots)
                    .map(|_| tlsf.allocate(next_size()).unwrap())
                    .collect();

                let mut victim = 0;
                b.iter(|| {
                    unsafe { tlsf.release(allocs[victim].as_ptr()) };
                    allocs[victim] = tlsf.allocate(next_size()).unwrap();
                    victim = (victim + 1) % allocs.len();
                });
            },
        );
    }

    group.finish();
}

criterion_group!(benches, stress);
criterion_main!(benches);
