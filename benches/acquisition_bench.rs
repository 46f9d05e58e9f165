//! Benchmarks for lease acquisition on the in-memory job store.
//!
//! Benchmarks cover:
//! - Batch claims of due jobs at different batch sizes
//! - Single-job claims
//! - Expired-lock sweeps
//! - Claims over a table shared by many tenants

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use rand::Rng;
use std::hint::black_box;
use std::time::Duration;

use prometheus_job_executor::core::{Job, JobStore};
use prometheus_job_executor::infra::InMemoryJobStore;
use prometheus_job_executor::util::TenantId;

const LEASE: Duration = Duration::from_secs(300);

// ============================================================================
// Fixtures
// ============================================================================

fn tenant(n: usize) -> TenantId {
    TenantId::new(format!("tenant-{n}"))
}

fn seeded_store(tenants: usize, jobs: usize) -> InMemoryJobStore {
    let store = InMemoryJobStore::new();
    let mut rng = rand::rng();
    for _ in 0..jobs {
        let owner = tenant(rng.random_range(0..tenants));
        let job = Job::new_async(owner, "bench", serde_json::json!({ "n": 1 }), 3);
        // Infallible for fresh ids.
        let _ = store.insert(job);
    }
    store
}

// ============================================================================
// Benchmarks
// ============================================================================

fn bench_batch_claims(c: &mut Criterion) {
    let mut group = c.benchmark_group("lock_next_due_jobs");
    for batch in [1usize, 10, 100] {
        group.throughput(Throughput::Elements(batch as u64));
        group.bench_with_input(BenchmarkId::from_parameter(batch), &batch, |b, &batch| {
            b.iter_batched(
                || seeded_store(1, 1_000),
                |store| {
                    let claimed = store
                        .lock_next_due_jobs(&tenant(0), batch, u128::MAX / 2, "bench", LEASE)
                        .unwrap_or_default();
                    black_box(claimed.len())
                },
                criterion::BatchSize::LargeInput,
            );
        });
    }
    group.finish();
}

fn bench_single_claim(c: &mut Criterion) {
    c.bench_function("lock_job", |b| {
        b.iter_batched(
            || {
                let store = seeded_store(1, 1_000);
                let id = store.jobs_of(&tenant(0))[0].id;
                (store, id)
            },
            |(store, id)| {
                black_box(
                    store
                        .lock_job(&tenant(0), &id, u128::MAX / 2, "bench", LEASE)
                        .ok()
                        .flatten()
                        .is_some(),
                )
            },
            criterion::BatchSize::LargeInput,
        );
    });
}

fn bench_expired_sweep(c: &mut Criterion) {
    c.bench_function("find_and_clear_expired_locks", |b| {
        b.iter_batched(
            || {
                let store = seeded_store(1, 1_000);
                let _ = store.lock_next_due_jobs(&tenant(0), 1_000, 0, "crashed", Duration::ZERO);
                store
            },
            |store| {
                let expired = store
                    .find_expired_locks(&tenant(0), 1, 100)
                    .unwrap_or_default();
                let cleared = expired
                    .iter()
                    .filter(|job| store.clear_lock(job).unwrap_or(false))
                    .count();
                black_box(cleared)
            },
            criterion::BatchSize::LargeInput,
        );
    });
}

fn bench_multi_tenant_table(c: &mut Criterion) {
    let mut group = c.benchmark_group("multi_tenant_claims");
    for tenants in [1usize, 16, 128] {
        group.bench_with_input(BenchmarkId::from_parameter(tenants), &tenants, |b, &tenants| {
            b.iter_batched(
                || seeded_store(tenants, 2_000),
                |store| {
                    let mut rng = rand::rng();
                    let who = tenant(rng.random_range(0..tenants));
                    black_box(
                        store
                            .lock_next_due_jobs(&who, 10, u128::MAX / 2, "bench", LEASE)
                            .map(|jobs| jobs.len())
                            .unwrap_or_default(),
                    )
                },
                criterion::BatchSize::LargeInput,
            );
        });
    }
    group.finish();
}

criterion_group!(
    benches,
    bench_batch_claims,
    bench_single_claim,
    bench_expired_sweep,
    bench_multi_tenant_table
);
criterion_main!(benches);
