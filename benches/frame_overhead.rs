/// Frame enter/exit overhead
///
/// Measures the per-call cost of the shadow stack with pooled frames,
/// against plain boxed allocation, and the cost of edge aggregation
/// under the different measurement modes.
use calltrace::clock::ManualClock;
use calltrace::frame_pool::FramePool;
use calltrace::{CallSite, TraceContext, TraceFlags};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::time::Duration;

fn bench_pool_vs_heap(c: &mut Criterion) {
    let mut group = c.benchmark_group("frame_allocation");
    group.measurement_time(Duration::from_secs(5));
    group.throughput(Throughput::Elements(1000));

    group.bench_function("heap_1000_frames", |b| {
        b.iter(|| {
            for _ in 0..1000 {
                let frame = Box::new([0u64; 16]);
                black_box(&frame);
            }
        });
    });

    group.bench_function("pool_1000_frames", |b| {
        let mut pool = FramePool::new();
        b.iter(|| {
            for _ in 0..1000 {
                let frame = pool.acquire();
                black_box(&frame);
                pool.release(frame);
            }
        });
    });

    group.finish();
}

fn bench_enter_exit(c: &mut Criterion) {
    let mut group = c.benchmark_group("enter_exit");
    group.measurement_time(Duration::from_secs(5));

    let calls = [
        CallSite::method("Db", "query"),
        CallSite::function("render"),
        CallSite::method("Cache", "get"),
    ];

    for (name, flags) in [
        ("wall_only", TraceFlags::empty()),
        ("cpu", TraceFlags::CPU),
        ("memory", TraceFlags::MEMORY),
    ] {
        group.bench_with_input(BenchmarkId::new("flags", name), &flags, |b, &flags| {
            let mut ctx = TraceContext::new();
            ctx.begin(flags);
            b.iter(|| {
                for call in &calls {
                    ctx.enter_frame(black_box(call));
                    ctx.exit_frame();
                }
            });
            ctx.shutdown();
        });
    }

    group.finish();
}

fn bench_recursion_depth(c: &mut Criterion) {
    let mut group = c.benchmark_group("recursion");

    for depth in [10usize, 100, 1000] {
        group.throughput(Throughput::Elements(depth as u64));
        group.bench_with_input(BenchmarkId::from_parameter(depth), &depth, |b, &depth| {
            let mut ctx = TraceContext::with_clock(ManualClock::new(0));
            ctx.begin(TraceFlags::empty());
            let call = CallSite::function("fib");
            b.iter(|| {
                for _ in 0..depth {
                    ctx.enter_frame(&call);
                }
                for _ in 0..depth {
                    ctx.exit_frame();
                }
            });
            ctx.shutdown();
        });
    }

    group.finish();
}

criterion_group!(benches, bench_pool_vs_heap, bench_enter_exit, bench_recursion_depth);
criterion_main!(benches);
