//! Relay benchmarks

use azure_upload_relay::storage::{MemoryBackend, StorageBackend};
use azure_upload_relay::upload::UploadRelay;
use bytes::Bytes;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::sync::Arc;

fn benchmark_relay_sizes(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let mut group = c.benchmark_group("relay_sizes");

    for size in [1024, 10 * 1024, 100 * 1024, 1024 * 1024].iter() {
        group.throughput(Throughput::Bytes(*size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, &size| {
            let backend: Arc<dyn StorageBackend> = Arc::new(MemoryBackend::default());
            let relay = UploadRelay::new(backend, "bench");
            let data = Bytes::from(vec![0u8; size]);
            b.to_async(&runtime).iter(|| {
                let relay = relay.clone();
                let data = data.clone();
                async move { black_box(relay.relay_buffered(data, "bench.bin").await) }
            });
        });
    }

    group.finish();
}

fn benchmark_queue_depth(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let mut group = c.benchmark_group("queue_depth");
    let data = Bytes::from(vec![0u8; 1024 * 1024]);
    group.throughput(Throughput::Bytes(data.len() as u64));

    for depth in [1, 4, 16].iter() {
        group.bench_with_input(BenchmarkId::from_parameter(depth), depth, |b, &depth| {
            let backend: Arc<dyn StorageBackend> = Arc::new(MemoryBackend::default());
            let relay = UploadRelay::new(backend, "bench").with_queue_depth(depth);
            b.to_async(&runtime).iter(|| {
                let relay = relay.clone();
                let data = data.clone();
                async move { black_box(relay.relay_buffered(data, "bench.bin").await) }
            });
        });
    }

    group.finish();
}

criterion_group!(benches, benchmark_relay_sizes, benchmark_queue_depth);
criterion_main!(benches);
