use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use clientdesk_core::payload::string_map;
use clientdesk_infra::audit::{Action, InMemoryLogStore, LogPersistHandler, LogProducer, NewLogRecord};
use clientdesk_infra::config::LogQueueConfig;
use clientdesk_infra::jobs::{InMemoryJobQueue, JobQueue, QueueWorker, WorkerConfig};
use serde_json::json;
use tokio::runtime::Runtime;

fn runtime() -> Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("failed to build tokio runtime")
}

fn sample_record() -> NewLogRecord {
    NewLogRecord {
        action: Action::Create,
        route: "/client".to_string(),
        method: "POST".to_string(),
        params: Default::default(),
        query: string_map([("page", "1")]),
        body: json!({ "name": "Acme", "salary": 1000, "companyValue": 250000 }),
        user_id: None,
        status_code: 201,
        response: json!({ "id": "0190f3a0-0000-7000-8000-000000000000", "name": "Acme" }),
        timestamp: Utc::now(),
        duration: 4,
        job_id: None,
    }
}

fn config() -> LogQueueConfig {
    LogQueueConfig {
        backoff: Duration::ZERO,
        ..LogQueueConfig::default()
    }
}

fn bench_enqueue_throughput(c: &mut Criterion) {
    let rt = runtime();
    let mut group = c.benchmark_group("enqueue_throughput");

    for batch_size in [1usize, 10, 100].iter() {
        group.throughput(Throughput::Elements(*batch_size as u64));
        group.bench_with_input(
            BenchmarkId::from_parameter(batch_size),
            batch_size,
            |b, &batch_size| {
                let queue = InMemoryJobQueue::arc();
                let producer = LogProducer::new(queue, &config());
                let record = sample_record();
                b.iter(|| {
                    rt.block_on(async {
                        for _ in 0..batch_size {
                            black_box(producer.enqueue(&record).await.unwrap());
                        }
                    })
                });
            },
        );
    }

    group.finish();
}

fn bench_enqueue_and_persist(c: &mut Criterion) {
    let rt = runtime();
    let mut group = c.benchmark_group("pipeline");
    group.sample_size(200);

    group.bench_function("enqueue_claim_persist", |b| {
        let queue = InMemoryJobQueue::arc();
        let store = InMemoryLogStore::arc();
        let producer = LogProducer::new(queue.clone(), &config());
        let worker = QueueWorker::new(queue.clone() as Arc<dyn JobQueue>, WorkerConfig::for_queue("logs"))
            .register_handler("log", Arc::new(LogPersistHandler::new(store)));
        let record = sample_record();

        b.iter(|| {
            rt.block_on(async {
                producer.enqueue(&record).await.unwrap();
                black_box(worker.process_next().await.unwrap());
            })
        });
    });

    group.finish();
}

fn bench_classification(c: &mut Criterion) {
    c.bench_function("classify_route", |b| {
        b.iter(|| {
            black_box(Action::classify(black_box("GET"), black_box("/client/:id")));
            black_box(Action::classify(black_box("PATCH"), black_box("/client/:id")));
        })
    });
}

criterion_group!(
    benches,
    bench_enqueue_throughput,
    bench_enqueue_and_persist,
    bench_classification
);
criterion_main!(benches);
