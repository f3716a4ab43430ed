//! Arena-per-worker lifecycle as the runtime drives it: bind at thread
//! startup, reset between requests, unbind at exit.

use std::sync::Arc;

use mcpd_memory::{Arena, BufferPool, current};

#[test]
fn worker_thread_binds_resets_and_unbinds() {
    let handle = std::thread::spawn(|| {
        let _guard = current::bind(Arena::with_block_size(4 * 1024));

        for request in 0..100 {
            current::reset();
            let len = current::with(|arena| {
                let method = arena.alloc_str("tools/call").unwrap();
                let body = arena
                    .alloc_str(&format!("payload for request {request}"))
                    .unwrap();
                method.len() + body.len()
            });
            assert!(len > 0);
        }

        current::with(|arena| arena.stats().block_count)
    });

    let blocks = handle.join().unwrap();
    // Steady state: the first request grew the arena, later ones reused it.
    assert_eq!(blocks, 1);
}

#[test]
fn handler_threads_share_the_buffer_pool_not_the_arena() {
    let pool = BufferPool::new(1024, 4).unwrap();

    let handles: Vec<_> = (0..4)
        .map(|worker| {
            let pool = Arc::clone(&pool);
            std::thread::spawn(move || {
                let _guard = current::bind(Arena::default());
                let mut buf = pool.acquire().unwrap();
                current::with(|arena| {
                    let tag = arena.alloc(worker as u64).unwrap();
                    buf[0] = *tag as u8;
                });
                buf[0]
            })
        })
        .collect();

    let mut seen: Vec<u8> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    seen.sort_unstable();
    assert_eq!(seen, vec![0, 1, 2, 3]);
    assert_eq!(pool.in_use(), 0);
}
