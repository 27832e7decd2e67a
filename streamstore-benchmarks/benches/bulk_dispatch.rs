use async_trait::async_trait;
use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use serde_json::json;
use std::hint::black_box;
use std::sync::Arc;
use streamstore::errors::HandlerError;
use streamstore::{
    BulkInvoker, ChannelKey, DelayedConfig, DelayedRegistry, DispatchContext, Invocation,
    MessageHandler,
};
use streamstore_memory::InMemoryDelayedChannel;
use tokio::runtime::Runtime;

struct Noop;

#[async_trait]
impl MessageHandler for Noop {
    fn name(&self) -> &str {
        "Noop"
    }

    async fn handle(&self, invocation: &Invocation) -> Result<(), HandlerError> {
        black_box(invocation);
        Ok(())
    }
}

fn registry() -> DelayedRegistry {
    (0..50).fold(DelayedRegistry::new(), |registry, n| {
        registry.with("Noop", &format!("Message{n}"), DelayedConfig::count(10))
    })
}

/// Benchmark memoized channel classification
fn bench_classification(c: &mut Criterion) {
    let invoker = BulkInvoker::new(Arc::new(registry()));

    c.bench_function("classify_memoized", |b| {
        b.iter(|| black_box(invoker.classification("Noop", "Message7")));
    });
    c.bench_function("channel_key", |b| {
        b.iter(|| black_box(ChannelKey::new("Noop", "Message7")));
    });
}

/// Benchmark parking messages and draining them in batches
fn bench_batches(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let mut group = c.benchmark_group("bulk_batches");

    for batch in [1_usize, 10, 100] {
        let registry = DelayedRegistry::new().with("Noop", "Ping", DelayedConfig::count(batch));
        let invoker = BulkInvoker::new(Arc::new(registry))
            .with_channel(Arc::new(InMemoryDelayedChannel::new()));
        group.throughput(Throughput::Elements(batch as u64));

        group.bench_with_input(BenchmarkId::from_parameter(batch), &batch, |b, &size| {
            b.to_async(&rt).iter(|| async {
                for n in 0..size {
                    let message = Invocation::new(format!("m{n}"), "Ping", json!({ "n": n }));
                    let context = DispatchContext::for_invocation(&message);
                    black_box(invoker.invoke(&Noop, &message, context).await.unwrap());
                }
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_classification, bench_batches);
criterion_main!(benches);
