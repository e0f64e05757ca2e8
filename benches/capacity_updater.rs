//! Benchmark for capacity report application
//!
//! Target: a 100-storage cluster report well under a millisecond

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use primary_storage_framework::capacity::merge_capacity;
use primary_storage_framework::{
    CapacityRecord, CapacityScope, CapacityUpdater, CapacityUpdaterConfig,
    CreatePrimaryStorageRequest, Persistence, PrimaryStorageRecord, StorageId,
};
use std::sync::Arc;

const STORAGES: usize = 100;

fn populated(rt: &tokio::runtime::Runtime) -> (Persistence, Arc<CapacityUpdater>) {
    let persistence = Persistence::in_memory();
    rt.block_on(async {
        for i in 0..STORAGES {
            let id = StorageId::new(format!("ps-{:03}", i));
            let request = CreatePrimaryStorageRequest::new("bench", "zone-1", "X")
                .with_cluster_name("c1");
            let record = PrimaryStorageRecord::from_request(id.clone(), &request);
            persistence.records.insert(record).await.unwrap();
            persistence
                .capacity
                .insert(&id, CapacityRecord::empty())
                .await
                .unwrap();
        }
    });
    let updater = CapacityUpdater::new(
        persistence.records.clone(),
        persistence.capacity.clone(),
        CapacityUpdaterConfig::default(),
    );
    (persistence, updater)
}

fn bench_merge(c: &mut Criterion) {
    let mut group = c.benchmark_group("capacity");
    group.throughput(Throughput::Elements(1));

    let current = CapacityRecord {
        total_capacity: 100,
        available_capacity: 80,
        total_physical_capacity: 100,
        available_physical_capacity: 80,
        version: 7,
    };
    group.bench_function("merge_capacity", |b| {
        b.iter(|| merge_capacity(black_box(&current), black_box(120), black_box(60)));
    });

    group.finish();
}

fn bench_cluster_report(c: &mut Criterion) {
    let mut group = c.benchmark_group("capacity");
    group.throughput(Throughput::Elements(STORAGES as u64));

    let rt = tokio::runtime::Runtime::new().unwrap();
    let (_persistence, updater) = populated(&rt);
    let scope = CapacityScope::cluster("X", "c1");

    group.bench_function("cluster_report_100_storages", |b| {
        let mut available = 0u64;
        b.iter(|| {
            available = (available + 1) % 1000;
            rt.block_on(updater.update(black_box(&scope), 1000, available))
                .unwrap();
        });
    });

    group.finish();
}

fn bench_concurrent_reports(c: &mut Criterion) {
    let mut group = c.benchmark_group("capacity");
    group.throughput(Throughput::Elements(16));

    let rt = tokio::runtime::Runtime::new().unwrap();
    let (_persistence, updater) = populated(&rt);

    group.bench_function("concurrent_16_reports", |b| {
        b.iter(|| {
            rt.block_on(async {
                let mut handles = Vec::new();
                for i in 0..16u64 {
                    let updater = updater.clone();
                    handles.push(tokio::spawn(async move {
                        let scope = CapacityScope::cluster("X", "c1");
                        updater.update(&scope, 1000, i).await
                    }));
                }
                for handle in handles {
                    let _ = handle.await;
                }
            });
        });
    });

    group.finish();
}

criterion_group!(benches, bench_merge, bench_cluster_report, bench_concurrent_reports);
criterion_main!(benches);
