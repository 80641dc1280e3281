//! Allocator benchmarks.

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use tagalloc_core::{Heap, HeapConfig, SafetyLevel};
use tagalloc_harness::{Pattern, TraceRunner, generate};

const MODES: [SafetyLevel; 3] = [SafetyLevel::Off, SafetyLevel::Strict, SafetyLevel::Hardened];

fn heap(mode: SafetyLevel) -> Heap {
    let config = HeapConfig::default()
        .with_safety(mode)
        .with_log_capacity(0);
    match Heap::new(config) {
        Ok(heap) => heap,
        Err(err) => panic!("heap init failed: {err}"),
    }
}

fn bench_alloc_free_cycle(c: &mut Criterion) {
    let sizes: &[usize] = &[16, 64, 256, 1024, 4096, 32768];
    let mut group = c.benchmark_group("alloc_free_cycle");

    for &size in sizes {
        group.bench_with_input(BenchmarkId::new("system", size), &size, |b, &sz| {
            b.iter(|| {
                let v = vec![0u8; sz];
                criterion::black_box(v);
            });
        });
        for mode in [SafetyLevel::Off, SafetyLevel::Strict] {
            let mut heap = heap(mode);
            group.bench_with_input(BenchmarkId::new(mode.as_str(), size), &size, |b, &sz| {
                b.iter(|| {
                    let ptr = heap.malloc(sz);
                    heap.free(criterion::black_box(ptr.unwrap_or(0)));
                });
            });
        }
    }
    group.finish();
}

fn bench_alloc_burst(c: &mut Criterion) {
    let mut group = c.benchmark_group("alloc_burst");

    group.bench_function("system/1000x64B", |b| {
        b.iter(|| {
            let allocs: Vec<Vec<u8>> = (0..1000).map(|_| vec![0u8; 64]).collect();
            criterion::black_box(allocs);
        });
    });
    for mode in MODES {
        let mut heap = heap(mode);
        let mut ptrs = Vec::with_capacity(1000);
        group.bench_function(format!("{}/1000x64B", mode.as_str()), |b| {
            b.iter(|| {
                ptrs.extend((0..1000).filter_map(|_| heap.malloc(64)));
                for ptr in ptrs.drain(..).rev() {
                    heap.free(ptr);
                }
            });
        });
    }

    group.finish();
}

fn bench_realloc_growth(c: &mut Criterion) {
    let mut group = c.benchmark_group("realloc_growth");

    group.bench_function("system/16B..64KiB", |b| {
        b.iter(|| {
            let mut v: Vec<u8> = Vec::with_capacity(16);
            let mut size = 16;
            while size <= 64 * 1024 {
                v.reserve_exact(size);
                size *= 2;
            }
            criterion::black_box(v);
        });
    });
    for mode in [SafetyLevel::Off, SafetyLevel::Strict] {
        let mut heap = heap(mode);
        group.bench_function(format!("{}/16B..64KiB", mode.as_str()), |b| {
            b.iter(|| {
                let mut ptr = heap.malloc(16).unwrap_or(0);
                let mut size = 32;
                while size <= 64 * 1024 && ptr != 0 {
                    ptr = heap.realloc(ptr, size).unwrap_or(0);
                    size *= 2;
                }
                heap.free(ptr);
            });
        });
    }

    group.finish();
}

fn bench_trace_replay(c: &mut Criterion) {
    let mut group = c.benchmark_group("trace_replay");
    group.sample_size(20);

    for pattern in Pattern::ALL {
        let trace = generate(pattern, 0xDEAD_BEEF, 2000);
        let runner = TraceRunner::new(HeapConfig::default().with_log_capacity(0));
        group.bench_function(pattern.as_str(), |b| {
            b.iter(|| criterion::black_box(runner.run(&trace).is_ok()));
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_alloc_free_cycle,
    bench_alloc_burst,
    bench_realloc_growth,
    bench_trace_replay
);
criterion_main!(benches);
