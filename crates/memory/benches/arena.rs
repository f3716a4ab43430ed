use std::hint::black_box;

use criterion::{Criterion, criterion_group, criterion_main};
use mcpd_memory::Arena;

fn arena_benches(c: &mut Criterion) {
    c.bench_function("arena_alloc_raw_64", |b| {
        let mut arena = Arena::with_block_size(64 * 1024);
        b.iter(|| {
            arena.reset();
            for _ in 0..128 {
                black_box(arena.alloc_raw(64, 1).unwrap());
            }
        });
    });

    c.bench_function("arena_alloc_str", |b| {
        let mut arena = Arena::with_block_size(64 * 1024);
        let payload = "a typical json string value, escaped and copied";
        b.iter(|| {
            arena.reset();
            for _ in 0..128 {
                black_box(arena.alloc_str(payload).unwrap());
            }
        });
    });

    // The per-request cycle: steady state must be allocation-free.
    c.bench_function("arena_reset_cycle", |b| {
        let mut arena = Arena::with_block_size(32 * 1024);
        let _ = arena.alloc_raw(16 * 1024, 1).unwrap();
        b.iter(|| {
            arena.reset();
            black_box(arena.alloc_raw(16 * 1024, 1).unwrap());
        });
    });
}

criterion_group!(benches, arena_benches);
criterion_main!(benches);
