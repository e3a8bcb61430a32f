//! Benchmarks for the per-execution hot path using criterion.
//!
//! - Configuration resolution against the in-memory credential registry
//! - Sanitizing a resolved configuration for logging
//! - Appending captured log lines to the in-memory store

#![allow(missing_docs)]

use std::hint::black_box;

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use nimport::*;
use nimport_testkit::fixtures;
use tokio::runtime::Runtime;

/// Creates a tokio runtime for async benchmarks.
fn create_runtime() -> Runtime {
    Runtime::new().expect("Failed to create tokio runtime")
}

/// Benchmark: Resolve a payload with inventory, network and batfish references.
fn bench_resolve(c: &mut Criterion) {
    let rt = create_runtime();
    let resolver = ConfigResolver::new(fixtures::credential_store());
    let payload = fixtures::settings();

    let mut group = c.benchmark_group("resolve");
    group.bench_function("full_payload", |b| {
        b.to_async(&rt).iter(|| async {
            let _ = resolver
                .resolve(fixtures::SITE, black_box(&payload))
                .await
                .expect("resolve should succeed");
        });
    });
    group.finish();
}

/// Benchmark: Produce the redacted form of a resolved configuration.
fn bench_sanitize(c: &mut Criterion) {
    let rt = create_runtime();
    let resolver = ConfigResolver::new(fixtures::credential_store());
    let config = rt
        .block_on(resolver.resolve(fixtures::SITE, &fixtures::settings()))
        .expect("resolve should succeed");

    c.bench_function("sanitize", |b| {
        b.iter(|| black_box(config.sanitized()));
    });
}

/// Benchmark: Append log lines to one job.
fn bench_append_log(c: &mut Criterion) {
    let rt = create_runtime();

    let mut group = c.benchmark_group("append_log");
    for lines in [10usize, 100] {
        group.throughput(Throughput::Elements(lines as u64));
        group.bench_with_input(BenchmarkId::from_parameter(lines), &lines, |b, &lines| {
            b.to_async(&rt).iter(|| async move {
                let store = InMemoryJobStore::new();
                let job = store
                    .create(fixtures::job(JobMode::Check))
                    .await
                    .expect("create should succeed");
                for i in 0..lines {
                    store
                        .append_log(
                            job.id,
                            NewLogEntry::new(LogLevel::Info, format!("line {i}"), EXECUTION_TARGET),
                        )
                        .await
                        .expect("append should succeed");
                }
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_resolve, bench_sanitize, bench_append_log);
criterion_main!(benches);
