//! Channel Benchmarks: rendezvous handoff, buffered throughput, and select arbitration.
//!
//! Run with: `cargo bench`
//!
//! ## Real-world scenario: request/response rendezvous
//!
//! A worker pool where each request blocks until a free worker is ready for it — no buffering,
//! pure handoff. This is the cost of the direct-handoff path in `put_raw`/`get_raw`: no buffer
//! allocation, just a queue push/pop and a waker.
//!
//! ## Real-world scenario: bounded producer/consumer throughput
//! A producer pushing faster than a consumer drains, backed by a `Fixed` buffer absorbing the
//! burst — the common shape of a bounded work queue.
//!
//! ## Real-world scenario: fan-in arbitration
//! A `select` across several channels, as a dispatcher polling multiple upstreams would — this is
//! the cost `SelectFlag`/`SelectHandler` add on top of a plain get.

use criterion::{criterion_group, criterion_main, Criterion};
use tokio::task::LocalSet;

use cochan::buffer::Kind;
use cochan::channel::Chan;
use cochan::select::select;

fn local_block_on<F: std::future::Future>(fut: F) -> F::Output {
    let rt = tokio::runtime::Builder::new_current_thread().enable_time().build().unwrap();
    let local = LocalSet::new();
    local.block_on(&rt, fut)
}

fn rendezvous_handoff(c: &mut Criterion) {
    c.bench_function("rendezvous_put_get_roundtrip", |b| {
        b.iter(|| {
            local_block_on(async {
                let ch: Chan<i32> = Chan::rendezvous();
                let putter = ch.put(1);
                let (sent, got) = futures_util::future::join(putter, ch.get()).await;
                criterion::black_box((sent, got));
            });
        });
    });
}

fn fixed_buffer_throughput(c: &mut Criterion) {
    c.bench_function("fixed_buffer_1k_roundtrip", |b| {
        b.iter(|| {
            local_block_on(async {
                let ch: Chan<i32> = Chan::new(Kind::Fixed(64));
                for i in 0..1_000 {
                    ch.put(i).await;
                    criterion::black_box(ch.get().await);
                }
            });
        });
    });
}

fn select_arbitration(c: &mut Criterion) {
    c.bench_function("select_across_four_channels", |b| {
        b.iter(|| {
            local_block_on(async {
                let chans: Vec<Chan<i32>> =
                    (0..4).map(|_| Chan::new(Kind::Fixed(1))).collect();
                chans[2].put_nowait(42, true);
                let cases = chans.iter().map(|c| c.get_case(|v| v)).collect();
                criterion::black_box(select(cases, false, None).await);
            });
        });
    });
}

criterion_group!(benches, rendezvous_handoff, fixed_buffer_throughput, select_arbitration);
criterion_main!(benches);
