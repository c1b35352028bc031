use std::time::Instant;

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};

use swarmkb::containers::{CircularBuffer, Counter};
use swarmkb::{EvalSettings, InProcessHub, KnowledgeBase, TransportKind, TransportSettings, Value};

fn seeded_store(keys: usize) -> KnowledgeBase {
    let kb = KnowledgeBase::new();
    for i in 0..keys {
        kb.set(&format!("agent.{i}.state"), i64::try_from(i).unwrap_or(0)).unwrap();
    }
    kb.clear_modifieds().unwrap();
    kb
}

fn bench_local_writes(c: &mut Criterion) {
    let mut group = c.benchmark_group("store");
    group.throughput(Throughput::Elements(1));

    group.bench_function("set_delayed", |b| {
        let kb = seeded_store(256);
        let settings = EvalSettings::delayed();
        let mut i = 0u64;
        b.iter(|| {
            i += 1;
            kb.set_with("agent.0.state", Value::from(i64::try_from(i).unwrap_or(0)), &settings)
                .unwrap();
        });
    });

    group.bench_function("get_hit", |b| {
        let kb = seeded_store(256);
        b.iter(|| black_box(kb.get("agent.128.state").unwrap()));
    });

    group.bench_function("to_map_prefix", |b| {
        let kb = seeded_store(1024);
        b.iter(|| black_box(kb.to_map("agent.1*").unwrap().len()));
    });

    group.finish();
}

fn bench_containers(c: &mut Criterion) {
    let mut group = c.benchmark_group("containers");
    group.throughput(Throughput::Elements(1));

    group.bench_function("counter_inc", |b| {
        let kb = KnowledgeBase::new();
        let counter = Counter::new(&kb, "tasks", 0, 8).unwrap();
        b.iter(|| black_box(counter.inc().unwrap()));
    });

    group.bench_function("ring_add", |b| {
        let kb = KnowledgeBase::new();
        let ring = CircularBuffer::new(&kb, "log", 64).unwrap();
        b.iter(|| black_box(ring.add(1.0).unwrap()));
    });

    group.finish();
}

fn bench_in_process_flush(c: &mut Criterion) {
    let mut group = c.benchmark_group("transport");
    group.throughput(Throughput::Elements(16));

    group.bench_function("flush_16_keys", |b| {
        b.iter_custom(|iters| {
            // Fresh hub per sample so receive queues do not back up between samples.
            let hub = InProcessHub::new();
            let sender = KnowledgeBase::new();
            let receiver = KnowledgeBase::new();
            sender
                .attach_in_process(&hub, TransportSettings::new(TransportKind::InProcess).with_id("tx"))
                .unwrap();
            receiver
                .attach_in_process(&hub, TransportSettings::new(TransportKind::InProcess).with_id("rx"))
                .unwrap();
            let settings = EvalSettings::delayed();

            let start = Instant::now();
            for n in 0..iters {
                for k in 0..16 {
                    sender
                        .set_with(&format!("k.{k}"), i64::try_from(n).unwrap_or(0), &settings)
                        .unwrap();
                }
                sender.send_modifieds().unwrap();
            }
            start.elapsed()
        });
    });

    group.finish();
}

criterion_group!(store_throughput, bench_local_writes, bench_containers, bench_in_process_flush);
criterion_main!(store_throughput);
