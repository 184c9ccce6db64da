//! Benchmarks for dispatch latency against a host loop

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use offload::gpu::probe_devices;
use offload::host::{elementwise_add_reference, random_array};
use offload::prelude::*;
use rand::rngs::StdRng;
use rand::SeedableRng;

const KERNEL: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/kernels/vector_ops.wgsl");
const SIZES: [usize; 3] = [1 << 16, 1 << 20, 1 << 24];

fn inputs(n: usize) -> (Vec<i32>, Vec<i32>) {
    let mut rng = StdRng::seed_from_u64(42);
    (random_array(n, &mut rng), random_array(n, &mut rng))
}

fn bench_host_add(c: &mut Criterion) {
    let mut group = c.benchmark_group("host_add");

    for &n in &SIZES {
        let (a, b) = inputs(n);
        group.bench_with_input(BenchmarkId::from_parameter(n), &n, |bench, _| {
            bench.iter(|| black_box(elementwise_add_reference(&a, &b)));
        });
    }

    group.finish();
}

fn bench_device_add(c: &mut Criterion) {
    let instance = wgpu::Instance::new(wgpu::InstanceDescriptor::default());
    if probe_devices(&instance, wgpu::Backends::all()).is_empty() {
        eprintln!("no adapter available, skipping device benchmarks");
        return;
    }

    let mut group = c.benchmark_group("device_add");
    group.sample_size(10);

    for &n in &SIZES {
        let config = Config::builder()
            .elements(n)
            .kernel_path(KERNEL)
            .build()
            .unwrap();
        let pipeline = Pipeline::new(&config).unwrap();
        let (a, b) = inputs(n);

        group.bench_with_input(BenchmarkId::from_parameter(n), &n, |bench, _| {
            bench.iter(|| {
                let elapsed = pipeline.run(&a, &b).unwrap().elapsed;
                // Keep the per-stage sample list from growing across iterations.
                pipeline.metrics().reset();
                black_box(elapsed)
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_host_add, bench_device_add);
criterion_main!(benches);
