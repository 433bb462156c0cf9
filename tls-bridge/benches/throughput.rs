//! Throughput benchmarks for the TLS bridge
//!
//! Measures encrypted bytes per second over an in-memory pair for:
//! - Small messages (100 bytes)
//! - Medium messages (1 KB)
//! - Large messages (10 KB)
//! - Each crypto backend
//! - The raw inbound queue

use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tls_bridge::backpressure::{BoundedQueue, Pop};
use tls_bridge::pool::ManualPool;
use tls_bridge::transport::{
    Backend, Identity, MemoryTransport, TlsBridge, TlsConfig, Transport, TransportState,
};

const SIZES: [usize; 3] = [100, 1024, 10 * 1024];

struct Connected {
    pool: Arc<ManualPool>,
    client: Arc<TlsBridge>,
    received: Arc<AtomicUsize>,
    _server: Arc<TlsBridge>,
}

fn connect(backend: Backend) -> Connected {
    let identity = Identity::self_signed(["localhost"]).unwrap();
    let pool = Arc::new(ManualPool::new());
    let (client_end, server_end) = MemoryTransport::pair(pool.clone());

    let server = TlsBridge::builder(server_end)
        .config(TlsConfig::new().with_identity(identity.clone()).with_backend(backend))
        .pool(pool.clone())
        .build()
        .unwrap();
    let client = TlsBridge::builder(client_end)
        .config(
            TlsConfig::new()
                .with_host("localhost")
                .with_root_certificates(identity.trust_store().unwrap())
                .with_backend(backend),
        )
        .pool(pool.clone())
        .build()
        .unwrap();

    let received = Arc::new(AtomicUsize::new(0));
    let counter = received.clone();
    server.on_recv(Some(Arc::new(move |message| {
        if let Some(data) = message {
            counter.fetch_add(data.len(), Ordering::Relaxed);
        }
    })));

    server.start().unwrap();
    client.start().unwrap();
    pool.run_until_idle();
    assert_eq!(client.state(), TransportState::Connected);

    Connected {
        pool,
        client,
        received,
        _server: server,
    }
}

fn bench_send_recv(c: &mut Criterion) {
    let mut group = c.benchmark_group("send_recv");
    group.measurement_time(Duration::from_secs(10));

    for backend in [Backend::Buffered, Backend::Stream, Backend::Unbuffered] {
        let connected = connect(backend);
        for size in SIZES {
            let payload = vec![0u8; size];
            group.throughput(Throughput::Bytes(size as u64));
            group.bench_with_input(BenchmarkId::new(backend.as_str(), size), &payload, |b, payload| {
                b.iter(|| {
                    let before = connected.received.load(Ordering::Relaxed);
                    connected.client.send(black_box(payload.clone())).unwrap();
                    connected.pool.run_until_idle();
                    assert_eq!(connected.received.load(Ordering::Relaxed) - before, payload.len());
                });
            });
        }
    }

    group.finish();
}

fn bench_batch_throughput(c: &mut Criterion) {
    let mut group = c.benchmark_group("batch_throughput");

    for batch_size in [10u64, 100, 1000] {
        let connected = connect(Backend::Buffered);
        let payload = vec![0u8; 1024];
        group.throughput(Throughput::Bytes(batch_size * 1024));
        group.bench_with_input(BenchmarkId::from_parameter(batch_size), &batch_size, |b, &batch_size| {
            b.iter(|| {
                for _ in 0..batch_size {
                    connected.client.send(payload.clone()).unwrap();
                }
                // Deliveries and receive tasks interleave until the batch is through.
                connected.pool.run_until_idle();
            });
        });
    }

    group.finish();
}

fn bench_queue(c: &mut Criterion) {
    let mut group = c.benchmark_group("bounded_queue");
    group.throughput(Throughput::Elements(1));

    let queue = BoundedQueue::new(1024 * 1024);
    group.bench_function("push_pop_1kb", |b| {
        b.iter(|| {
            queue.push(black_box(vec![0u8; 1024]));
            match queue.pop() {
                Pop::Message(message) => black_box(message),
                Pop::Empty | Pop::Closed => unreachable!(),
            };
        });
    });

    group.finish();
}

criterion_group!(benches, bench_send_recv, bench_batch_throughput, bench_queue);
criterion_main!(benches);
