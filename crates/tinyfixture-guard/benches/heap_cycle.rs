//! Guarded heap benchmarks.

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use tinyfixture_guard::{GuardedHeap, TrackingLevel};

fn bench_allocate_release_cycle(c: &mut Criterion) {
    let sizes: &[usize] = &[16, 64, 256, 1024, 4096];
    let mut group = c.benchmark_group("allocate_release_cycle");

    for &size in sizes {
        group.bench_with_input(BenchmarkId::new("guarded", size), &size, |b, &sz| {
            let mut heap = GuardedHeap::with_system().with_tracking(TrackingLevel::Off);
            heap.start_epoch();
            b.iter(|| {
                let p = heap.allocate(sz).expect("allocate");
                heap.release(criterion::black_box(p.as_ptr()))
                    .expect("release");
            });
        });
        group.bench_with_input(BenchmarkId::new("system", size), &size, |b, &sz| {
            b.iter(|| {
                let v = vec![0u8; sz];
                criterion::black_box(v);
            });
        });
    }
    group.finish();
}

fn bench_epoch_burst(c: &mut Criterion) {
    let mut group = c.benchmark_group("epoch_burst");

    for tracking in [TrackingLevel::Off, TrackingLevel::Origin] {
        group.bench_function(format!("100x64B/{}", tracking.as_str()), |b| {
            let mut heap = GuardedHeap::with_system().with_tracking(tracking);
            b.iter(|| {
                heap.start_epoch();
                let blocks: Vec<_> = (0..100)
                    .map(|_| heap.allocate(64).expect("allocate"))
                    .collect();
                for p in blocks.into_iter().rev() {
                    heap.release(p.as_ptr()).expect("release");
                }
                heap.end_epoch().expect("balanced epoch");
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_allocate_release_cycle, bench_epoch_burst);
criterion_main!(benches);
