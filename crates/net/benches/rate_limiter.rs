use std::hint::black_box;
use std::time::Duration;

use criterion::{Criterion, criterion_group, criterion_main};
use mcpd_net::{RateLimiter, RateLimiterConfig};

fn rate_limiter_benches(c: &mut Criterion) {
    c.bench_function("rate_limiter_hot_client", |b| {
        let limiter = RateLimiter::new(RateLimiterConfig {
            capacity: 1024,
            window: Duration::from_secs(1),
            quota: u32::MAX,
            shards: 8,
        })
        .unwrap();
        b.iter(|| black_box(limiter.check("192.0.2.1")));
    });

    c.bench_function("rate_limiter_client_churn", |b| {
        let limiter = RateLimiter::new(RateLimiterConfig {
            capacity: 64,
            window: Duration::from_secs(1),
            quota: 100,
            shards: 8,
        })
        .unwrap();
        let mut n: u32 = 0;
        b.iter(|| {
            n = n.wrapping_add(1);
            black_box(limiter.check(&format!("client-{}", n % 1024)))
        });
    });
}

criterion_group!(benches, rate_limiter_benches);
criterion_main!(benches);
